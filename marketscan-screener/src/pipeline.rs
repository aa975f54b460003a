//! Screening pipeline.
//!
//! `run()` is the single entry point: snapshot cache, then on a miss the
//! fallback chain, then the screening engine. The result is memoized per
//! snapshot so repeated runs inside one TTL return the same `Arc`.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use marketscan_common::logging::{generate_run_id, short_id};
use marketscan_common::Config;

use crate::data::{
    adapters_from_config, ChainConfig, ChainError, FallbackChain, Field, MarketSnapshot, SnapshotCache,
};
use crate::error::ScreenError;
use crate::screener::{ScreeningEngine, ScreeningResult};

/// Stops the fetch this run started unless the run saw it finish.
///
/// Covers runs that fail, are cancelled, or whose future is simply dropped
/// (a disconnected client, an outer timeout). Later runs must not join it.
struct AbandonOnDrop<'a> {
    cache: &'a SnapshotCache,
    fetch_cancel: CancellationToken,
    started_fetch: Arc<AtomicBool>,
    armed: bool,
}

impl AbandonOnDrop<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed && self.started_fetch.load(Ordering::SeqCst) {
            self.fetch_cancel.cancel();
            self.cache.abandon_inflight();
        }
    }
}

struct Memo {
    captured_at: DateTime<Utc>,
    source_name: String,
    result: Arc<ScreeningResult>,
}

pub struct ScreeningPipeline {
    chain: Arc<FallbackChain>,
    cache: SnapshotCache,
    engine: ScreeningEngine,
    run_deadline: Duration,
    memo: Mutex<Option<Memo>>,
}

impl ScreeningPipeline {
    pub fn new(
        chain: FallbackChain,
        engine: ScreeningEngine,
        snapshot_ttl: Duration,
        run_deadline: Duration,
    ) -> Self {
        Self {
            chain: Arc::new(chain),
            cache: SnapshotCache::new(snapshot_ttl),
            engine,
            run_deadline,
            memo: Mutex::new(None),
        }
    }

    /// Validate the configuration and wire up every enabled source.
    pub fn from_config(config: &Config) -> Result<Self, ScreenError> {
        config.validate()?;

        let adapters = adapters_from_config(config);
        if adapters.is_empty() {
            return Err(ScreenError::InvalidConfiguration(
                "no enabled data source is usable (tushare needs a token)".into(),
            ));
        }

        let screener = &config.screener;
        let chain = FallbackChain::with_adapters(ChainConfig::from(screener), adapters);
        Ok(Self::new(
            chain,
            ScreeningEngine::new(screener.thresholds.clone()),
            Duration::from_secs(screener.snapshot_ttl_secs),
            Duration::from_secs(screener.run_deadline_secs),
        ))
    }

    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn run_deadline(&self) -> Duration {
        self.run_deadline
    }

    /// Screen the current market.
    ///
    /// When every source fails the result is empty rather than an error.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Arc<ScreeningResult>, ScreenError> {
        let run_id = generate_run_id();
        let span = info_span!("screening_run", run_id = %short_id(&run_id));
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<Arc<ScreeningResult>, ScreenError> {
        let started = Instant::now();

        let Some(snapshot) = self.snapshot(cancel).await? else {
            return Ok(Arc::new(ScreeningResult::empty(Utc::now())));
        };

        if let Some(result) = self.memoized(&snapshot) {
            debug!(source = snapshot.source_name(), "Reusing screening result for cached snapshot");
            return Ok(result);
        }

        if !snapshot.supplies(Field::Change60d) {
            info!(
                source = snapshot.source_name(),
                "Source has no 60-day change, watch list will be empty"
            );
        }

        let result = Arc::new(self.engine.screen(&snapshot));
        *self.memo_lock() = Some(Memo {
            captured_at: snapshot.captured_at(),
            source_name: snapshot.source_name().to_string(),
            result: Arc::clone(&result),
        });

        info!(
            source = snapshot.source_name(),
            scanned = snapshot.len(),
            buy = result.buy.len(),
            watch = result.watch.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Screening run complete"
        );
        Ok(result)
    }

    /// Cached or freshly fetched snapshot; `None` when every source failed.
    async fn snapshot(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<MarketSnapshot>>, ScreenError> {
        let fetch_cancel = cancel.child_token();
        let started_fetch = Arc::new(AtomicBool::new(false));

        let fetch = {
            let chain = Arc::clone(&self.chain);
            let fetch_cancel = fetch_cancel.clone();
            let started_fetch = Arc::clone(&started_fetch);
            self.cache.get_or_fetch(move || {
                started_fetch.store(true, Ordering::SeqCst);
                async move { chain.fetch(&fetch_cancel).await }
            })
        };

        let abandon = AbandonOnDrop {
            cache: &self.cache,
            fetch_cancel,
            started_fetch,
            armed: true,
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScreenError::Cancelled),
            fetched = tokio::time::timeout(self.run_deadline, fetch) => {
                fetched.map_err(|_| ScreenError::Timeout(self.run_deadline))
            }
        };

        let fetched = match outcome {
            Ok(fetched) => {
                abandon.disarm();
                fetched
            }
            Err(e) => {
                drop(abandon);
                warn!(error = %e, "Screening run aborted");
                return Err(e);
            }
        };

        match fetched {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => match e.as_ref() {
                ChainError::AllSourcesExhausted { failures } => {
                    for failure in failures {
                        debug!(
                            provider = %failure.provider,
                            kind = %failure.kind,
                            error = %failure.message,
                            "Source failure"
                        );
                    }
                    warn!(
                        failures = failures.len(),
                        "All data sources exhausted, returning empty result"
                    );
                    Ok(None)
                }
                ChainError::Cancelled if cancel.is_cancelled() => Err(ScreenError::Cancelled),
                // Joined a fetch that another run abandoned
                ChainError::Cancelled => Err(ScreenError::Timeout(self.run_deadline)),
            },
        }
    }

    fn memo_lock(&self) -> MutexGuard<'_, Option<Memo>> {
        match self.memo.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn memoized(&self, snapshot: &MarketSnapshot) -> Option<Arc<ScreeningResult>> {
        self.memo_lock()
            .as_ref()
            .filter(|m| m.captured_at == snapshot.captured_at() && m.source_name == snapshot.source_name())
            .map(|m| Arc::clone(&m.result))
    }
}
