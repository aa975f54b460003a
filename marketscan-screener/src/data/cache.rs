//! Single-slot snapshot cache with single-flight refresh.
//!
//! Holds the last good market snapshot for a fixed TTL. On a miss the first
//! caller starts one fetch; everyone arriving before it completes awaits
//! the same shared future and sees the same value or the same failure.
//! Failures are never stored.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::chain::ChainError;
use super::MarketSnapshot;

type FetchResult = Result<Arc<MarketSnapshot>, Arc<ChainError>>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct CacheEntry {
    snapshot: Arc<MarketSnapshot>,
    stored_at: Instant,
}

#[derive(Default)]
struct CacheState {
    slot: Option<CacheEntry>,
    inflight: Option<(u64, SharedFetch)>,
    next_generation: u64,
}

/// Time-boxed cache for the full-market snapshot.
pub struct SnapshotCache {
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fresh(&self, state: &CacheState) -> Option<Arc<MarketSnapshot>> {
        state
            .slot
            .as_ref()
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.snapshot))
    }

    /// Cached snapshot if it is still within the TTL.
    pub fn get(&self) -> Option<Arc<MarketSnapshot>> {
        let state = self.lock();
        self.fresh(&state)
    }

    /// Replace the cached snapshot.
    pub fn put(&self, snapshot: Arc<MarketSnapshot>) {
        self.lock().slot = Some(CacheEntry {
            snapshot,
            stored_at: Instant::now(),
        });
    }

    /// Drop the cached snapshot.
    pub fn invalidate(&self) {
        self.lock().slot = None;
    }

    /// Forget the in-flight fetch so the next miss starts a new one.
    ///
    /// Callers already awaiting it keep their handle.
    pub fn abandon_inflight(&self) {
        if self.lock().inflight.take().is_some() {
            debug!("Abandoned in-flight snapshot fetch");
        }
    }

    /// Return the cached snapshot, or run `fetch` once for all concurrent callers.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> FetchResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<MarketSnapshot, ChainError>> + Send + 'static,
    {
        let (generation, shared) = {
            let mut state = self.lock();
            if let Some(snapshot) = self.fresh(&state) {
                debug!(source = snapshot.source_name(), "Snapshot cache hit");
                return Ok(snapshot);
            }

            // A finished fetch nobody collected: keep its value, drop its failure.
            let finished = state
                .inflight
                .as_ref()
                .and_then(|(_, shared)| shared.peek().cloned());
            match finished {
                Some(Ok(snapshot)) => {
                    state.inflight = None;
                    state.slot = Some(CacheEntry {
                        snapshot: Arc::clone(&snapshot),
                        stored_at: Instant::now(),
                    });
                    return Ok(snapshot);
                }
                Some(Err(_)) => state.inflight = None,
                None => {}
            }

            match state.inflight.clone() {
                Some(joined) => {
                    debug!("Snapshot fetch already in flight, joining");
                    joined
                }
                None => {
                    debug!("Snapshot cache miss, starting fetch");
                    let generation = state.next_generation;
                    state.next_generation += 1;
                    let shared = fetch()
                        .map(|result| result.map(Arc::new).map_err(Arc::new))
                        .boxed()
                        .shared();
                    state.inflight = Some((generation, shared.clone()));
                    (generation, shared)
                }
            }
        };

        let result = shared.await;

        let mut state = self.lock();
        if matches!(&state.inflight, Some((g, _)) if *g == generation) {
            state.inflight = None;
            if let Ok(snapshot) = &result {
                state.slot = Some(CacheEntry {
                    snapshot: Arc::clone(snapshot),
                    stored_at: Instant::now(),
                });
            }
        }
        result
    }
}
