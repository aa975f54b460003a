//! Fallback chain over provider adapters.
//!
//! Tries adapters one at a time in priority order until the combined
//! snapshot covers enough of the market. Each adapter is attempted at most
//! once per fetch and every outcome lands in the chain's health tracker.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fields::FieldSet;
use super::health::{HealthTracker, ProviderHealth};
use super::normalizer::FieldNormalizer;
use super::provider::{bounded, ErrorKind, ProviderAdapter, ProviderError};
use super::MarketSnapshot;

// ============================================================================
// Chain Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Bound for a single provider attempt
    pub provider_timeout: Duration,
    /// Demote a provider once this many attempts in a row have failed
    pub demote_after_failures: u32,
    /// Fraction of rows that must carry core fields
    pub min_coverage_ratio: f64,
    /// Per-provider overrides of `provider_timeout`
    pub source_timeouts: HashMap<String, Duration>,
}

impl ChainConfig {
    pub fn timeout_for(&self, provider: &str) -> Duration {
        self.source_timeouts
            .get(provider)
            .copied()
            .unwrap_or(self.provider_timeout)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(20),
            demote_after_failures: 3,
            min_coverage_ratio: 0.5,
            source_timeouts: HashMap::new(),
        }
    }
}

impl From<&marketscan_common::ScreenerConfig> for ChainConfig {
    fn from(config: &marketscan_common::ScreenerConfig) -> Self {
        Self {
            provider_timeout: Duration::from_secs(config.provider_timeout_secs),
            demote_after_failures: config.demote_after_failures,
            min_coverage_ratio: config.min_coverage_ratio,
            source_timeouts: config
                .sources
                .iter()
                .map(|entry| {
                    let secs = config.source_timeout_secs(entry);
                    (entry.provider.clone(), Duration::from_secs(secs))
                })
                .collect(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// One failed provider attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptFailure {
    pub provider: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("all {} data sources exhausted", .failures.len())]
    AllSourcesExhausted { failures: Vec<AttemptFailure> },

    #[error("snapshot fetch cancelled")]
    Cancelled,
}

// ============================================================================
// Provider status
// ============================================================================

/// Read-only view of one chain link.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub priority: u8,
    pub capabilities: FieldSet,
    /// Position in the current attempt order
    pub order: usize,
    pub health: ProviderHealth,
}

// ============================================================================
// Fallback Chain
// ============================================================================

/// Ordered providers plus their health. Lives for the whole process.
pub struct FallbackChain {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    normalizer: FieldNormalizer,
    health: HealthTracker,
    config: ChainConfig,
}

impl FallbackChain {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            adapters: Vec::new(),
            normalizer: FieldNormalizer::new(),
            health: HealthTracker::new(config.demote_after_failures),
            config,
        }
    }

    /// Build a chain from a list of adapters.
    pub fn with_adapters(config: ChainConfig, adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        let mut chain = Self::new(config);
        for adapter in adapters {
            chain.register(adapter);
        }
        chain
    }

    /// Register an adapter. The list stays sorted by priority; equal
    /// priorities keep registration order.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        info!(
            provider = adapter.name(),
            priority = adapter.priority(),
            "Registered data provider"
        );
        self.adapters.push(adapter);
        self.adapters.sort_by_key(|a| a.priority());
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Adapters in attempt order: healthy ones by priority, then demoted ones.
    pub async fn ordered(&self) -> Vec<Arc<dyn ProviderAdapter>> {
        let mut healthy = Vec::with_capacity(self.adapters.len());
        let mut demoted = Vec::new();
        for adapter in &self.adapters {
            if self.health.is_demoted(adapter.name()).await {
                demoted.push(Arc::clone(adapter));
            } else {
                healthy.push(Arc::clone(adapter));
            }
        }
        healthy.extend(demoted);
        healthy
    }

    pub async fn health(&self, name: &str) -> Option<ProviderHealth> {
        self.health.get(name).await
    }

    /// Status of every link in attempt order.
    pub async fn status(&self) -> Vec<ProviderStatus> {
        let mut status = Vec::with_capacity(self.adapters.len());
        for (order, adapter) in self.ordered().await.into_iter().enumerate() {
            let health = self
                .health
                .get(adapter.name())
                .await
                .unwrap_or_else(|| ProviderHealth::new(adapter.name()));
            status.push(ProviderStatus {
                name: adapter.name().to_string(),
                priority: adapter.priority(),
                capabilities: adapter.capabilities(),
                order,
                health,
            });
        }
        status
    }

    /// Produce one market snapshot.
    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<MarketSnapshot, ChainError> {
        let mut partial: Option<MarketSnapshot> = None;
        let mut failures = Vec::new();

        for adapter in self.ordered().await {
            if cancel.is_cancelled() {
                return Err(ChainError::Cancelled);
            }

            let name = adapter.name();
            let timeout = self.config.timeout_for(name);
            let started = Instant::now();
            debug!(provider = name, "Fetching market snapshot");

            let outcome = bounded(cancel, timeout, adapter.fetch_snapshot(cancel, timeout))
                .await
                .and_then(|payload| self.normalizer.normalize(&payload));

            match outcome {
                Ok(quotes) => {
                    self.health.record_success(name).await;
                    let snapshot = MarketSnapshot::new(name, quotes);
                    let combined = match partial.take() {
                        Some(earlier) => earlier.merge(snapshot),
                        None => snapshot,
                    };
                    let coverage = combined.coverage_ratio();

                    if coverage >= self.config.min_coverage_ratio {
                        info!(
                            provider = name,
                            source = combined.source_name(),
                            rows = combined.len(),
                            coverage,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Market snapshot fetched"
                        );
                        return Ok(combined);
                    }

                    warn!(
                        provider = name,
                        rows = combined.len(),
                        coverage,
                        required = self.config.min_coverage_ratio,
                        "Snapshot coverage too low, trying next provider"
                    );
                    partial = Some(combined);
                }
                Err(ProviderError::Cancelled) => return Err(ChainError::Cancelled),
                Err(e) => {
                    self.health.record_failure(name, &e).await;
                    warn!(
                        provider = name,
                        kind = %e.kind(),
                        error = %e,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Provider error, failing over to next provider"
                    );
                    failures.push(AttemptFailure {
                        provider: name.to_string(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        match partial {
            Some(snapshot) => {
                warn!(
                    source = snapshot.source_name(),
                    rows = snapshot.len(),
                    coverage = snapshot.coverage_ratio(),
                    "Chain exhausted, using best partial snapshot"
                );
                Ok(snapshot)
            }
            None => Err(ChainError::AllSourcesExhausted { failures }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fields::Field;
    use crate::data::provider::{RawPayload, RawRow};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticAdapter {
        name: &'static str,
        priority: u8,
        rows: Vec<RawRow>,
        calls: AtomicU32,
    }

    impl StaticAdapter {
        fn new(name: &'static str, priority: u8, rows: Vec<RawRow>) -> Arc<Self> {
            Arc::new(Self {
                name,
                priority,
                rows,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ProviderAdapter for StaticAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn capabilities(&self) -> FieldSet {
            FieldSet::BASIC
        }

        async fn fetch_snapshot(
            &self,
            _cancel: &CancellationToken,
            _timeout: Duration,
        ) -> Result<RawPayload, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawPayload::new(self.rows.clone()))
        }
    }

    fn basic_row(code: &str) -> RawRow {
        RawRow::new()
            .with(Field::Code, code)
            .with(Field::Price, 10.0)
            .with(Field::ChangePct, 1.0)
    }

    #[tokio::test]
    async fn test_register_sorts_by_priority() {
        let mut chain = FallbackChain::new(ChainConfig::default());
        chain.register(StaticAdapter::new("c", 3, vec![]));
        chain.register(StaticAdapter::new("a", 1, vec![]));
        chain.register(StaticAdapter::new("b", 2, vec![]));
        let names: Vec<String> = chain
            .ordered()
            .await
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_low_coverage_merges_with_next_provider() {
        let basic = StaticAdapter::new("basic", 1, vec![basic_row("600000"), basic_row("600001")]);
        let extra = StaticAdapter::new(
            "extra",
            2,
            vec![basic_row("600000").with(Field::TurnoverRate, 1.5)],
        );
        let chain = FallbackChain::with_adapters(
            ChainConfig::default(),
            vec![basic.clone(), extra.clone()],
        );

        let snapshot = chain.fetch(&CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.source_name(), "basic+extra");
        assert_eq!(snapshot.len(), 2);
        assert!((snapshot.coverage_ratio() - 0.5).abs() < 1e-9);
        assert_eq!(basic.calls.load(Ordering::SeqCst), 1);
        assert_eq!(extra.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_partial_snapshot_returned_when_chain_ends() {
        let basic = StaticAdapter::new("basic", 1, vec![basic_row("600000")]);
        let chain = FallbackChain::with_adapters(ChainConfig::default(), vec![basic]);
        let snapshot = chain.fetch(&CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.source_name(), "basic");
        assert_eq!(snapshot.coverage_ratio(), 0.0);
    }

    #[tokio::test]
    async fn test_empty_chain_is_exhausted() {
        let chain = FallbackChain::new(ChainConfig::default());
        let err = chain.fetch(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ChainError::AllSourcesExhausted { ref failures } if failures.is_empty()));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let adapter = StaticAdapter::new("a", 1, vec![basic_row("600000")]);
        let chain = FallbackChain::with_adapters(ChainConfig::default(), vec![adapter.clone()]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(chain.fetch(&cancel).await, Err(ChainError::Cancelled)));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }
}
