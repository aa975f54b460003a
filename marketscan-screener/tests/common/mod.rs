//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use marketscan_screener::data::{
    ChainConfig, FallbackChain, Field, FieldSet, ProviderAdapter, ProviderError, RawPayload, RawRow,
};

#[derive(Clone)]
pub enum Behavior {
    Rows(Vec<RawRow>),
    Fail(ProviderError),
    /// Sleep, then return the rows
    Slow(Duration, Vec<RawRow>),
}

/// Adapter with scripted output that counts its calls.
pub struct MockAdapter {
    name: &'static str,
    priority: u8,
    behavior: Behavior,
    calls: AtomicU32,
}

impl MockAdapter {
    pub fn new(name: &'static str, priority: u8, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            priority,
            behavior,
            calls: AtomicU32::new(0),
        })
    }

    pub fn ok(name: &'static str, priority: u8, rows: Vec<RawRow>) -> Arc<Self> {
        Self::new(name, priority, Behavior::Rows(rows))
    }

    pub fn failing(name: &'static str, priority: u8) -> Arc<Self> {
        Self::new(
            name,
            priority,
            Behavior::Fail(ProviderError::Network("connection refused".into())),
        )
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> FieldSet {
        FieldSet::FULL
    }

    async fn fetch_snapshot(
        &self,
        cancel: &CancellationToken,
        _timeout: Duration,
    ) -> Result<RawPayload, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Rows(rows) => Ok(RawPayload::new(rows.clone())),
            Behavior::Fail(e) => Err(e.clone()),
            Behavior::Slow(delay, rows) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                    _ = tokio::time::sleep(*delay) => Ok(RawPayload::new(rows.clone())),
                }
            }
        }
    }
}

/// A fully populated row that passes every buy filter with default thresholds.
pub fn buy_row(code: &str) -> RawRow {
    RawRow::new()
        .with(Field::Code, code)
        .with(Field::Name, format!("股票{}", code))
        .with(Field::Price, 12.5)
        .with(Field::ChangePct, 2.0)
        .with(Field::VolumeRatio, 2.0)
        .with(Field::TurnoverRate, 1.5)
        .with(Field::Amount, 3e8)
        .with(Field::Volume, 2.4e7)
        .with(Field::PeRatio, 20.0)
        .with(Field::MarketCap, 1e10)
        .with(Field::Amplitude, 3.0)
}

/// A row that passes the watch filters but not the buy filters.
pub fn watch_row(code: &str) -> RawRow {
    buy_row(code)
        .with(Field::ChangePct, 1.0)
        .with(Field::VolumeRatio, 1.0)
        .with(Field::Change60d, 18.0)
}

/// A row that matches nothing.
pub fn dull_row(code: &str) -> RawRow {
    buy_row(code)
        .with(Field::ChangePct, -1.2)
        .with(Field::VolumeRatio, 0.6)
}

pub fn chain(adapters: Vec<Arc<dyn ProviderAdapter>>) -> FallbackChain {
    FallbackChain::with_adapters(ChainConfig::default(), adapters)
}
