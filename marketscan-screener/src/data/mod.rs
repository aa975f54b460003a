//! Market data layer.
//!
//! Provides:
//! - Provider adapters for the upstream quote sources (Tushare, Eastmoney, Sina, Tencent)
//! - Field normalization into one canonical quote record
//! - A fallback chain with per-provider health tracking
//! - A single-slot snapshot cache with single-flight fetching

pub mod cache;
pub mod chain;
pub mod eastmoney;
pub mod fields;
pub mod health;
pub mod normalizer;
pub mod pool;
pub mod provider;
pub mod rate_limiter;
pub mod sina;
pub mod tencent;
pub mod tushare;

pub use cache::SnapshotCache;
pub use chain::{ChainConfig, ChainError, FallbackChain};
pub use eastmoney::EastmoneyAdapter;
pub use fields::{Field, FieldSet};
pub use health::ProviderHealth;
pub use normalizer::FieldNormalizer;
pub use pool::WorkerPool;
pub use provider::{ErrorKind, ProviderAdapter, ProviderError, RawPayload, RawRow, Unit};
pub use rate_limiter::RateLimiter;
pub use sina::SinaAdapter;
pub use tencent::SinaTencentAdapter;
pub use tushare::TushareAdapter;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use marketscan_common::Config;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Exchange time zone (UTC+8, no DST).
pub fn shanghai_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix())
}

/// Today's calendar date on the exchange.
pub fn shanghai_today() -> NaiveDate {
    Utc::now().with_timezone(&shanghai_offset()).date_naive()
}

// ============================================================================
// Canonical Quote
// ============================================================================

/// One traded security at snapshot time, in canonical units.
///
/// Fields the winning provider could not supply stay zero (or `None` for
/// the 60-day change); `supplied` records which ones are real.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CanonicalQuote {
    /// Exchange-qualified code, e.g. "600519.SH"
    pub code: String,
    pub name: String,
    pub price: f64,
    /// Signed percent
    pub change_pct: f64,
    pub volume_ratio: f64,
    /// Percent
    pub turnover_rate: f64,
    pub amount_yuan: f64,
    /// 0 when unknown or earnings are non-positive
    pub pe_ratio: f64,
    pub market_cap_yuan: f64,
    pub amplitude_pct: f64,
    pub is_st: bool,
    pub is_limit_up: bool,
    pub is_limit_down: bool,
    pub is_halted: bool,
    pub change_60d_pct: Option<f64>,
    #[serde(skip)]
    pub supplied: FieldSet,
}

impl CanonicalQuote {
    /// Price, change% and at least one of volume ratio / turnover are known.
    pub fn has_core_coverage(&self) -> bool {
        self.supplied.contains(Field::Price)
            && self.supplied.contains(Field::ChangePct)
            && (self.supplied.contains(Field::VolumeRatio)
                || self.supplied.contains(Field::TurnoverRate))
    }

    /// Fill fields this row lacks from another row for the same security.
    fn fill_from(&mut self, other: &CanonicalQuote) {
        let had = self.supplied;
        let missing = |f: Field| !had.contains(f) && other.supplied.contains(f);

        if self.name.is_empty() {
            self.name = other.name.clone();
        }
        if missing(Field::Price) {
            self.price = other.price;
            self.is_halted = other.is_halted;
            self.is_limit_up = other.is_limit_up;
            self.is_limit_down = other.is_limit_down;
            self.supplied.insert(Field::Price);
        }
        macro_rules! fill {
            ($field:expr, $attr:ident) => {
                if missing($field) {
                    self.$attr = other.$attr;
                    self.supplied.insert($field);
                }
            };
        }
        fill!(Field::ChangePct, change_pct);
        fill!(Field::VolumeRatio, volume_ratio);
        fill!(Field::TurnoverRate, turnover_rate);
        fill!(Field::Amount, amount_yuan);
        fill!(Field::PeRatio, pe_ratio);
        fill!(Field::MarketCap, market_cap_yuan);
        fill!(Field::Amplitude, amplitude_pct);
        fill!(Field::Change60d, change_60d_pct);
        self.is_st |= other.is_st;
    }
}

// ============================================================================
// Market Snapshot
// ============================================================================

/// Quotes for the whole market from one fetch. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    quotes: Vec<CanonicalQuote>,
    source_name: String,
    captured_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Build a snapshot captured now. Duplicate codes keep their first row.
    pub fn new(source_name: impl Into<String>, quotes: Vec<CanonicalQuote>) -> Self {
        Self::with_captured_at(source_name, quotes, Utc::now())
    }

    pub fn with_captured_at(
        source_name: impl Into<String>,
        quotes: Vec<CanonicalQuote>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let mut seen = HashSet::with_capacity(quotes.len());
        let quotes = quotes
            .into_iter()
            .filter(|q| seen.insert(q.code.clone()))
            .collect();
        Self {
            quotes,
            source_name: source_name.into(),
            captured_at,
        }
    }

    pub fn quotes(&self) -> &[CanonicalQuote] {
        &self.quotes
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    pub fn get(&self, code: &str) -> Option<&CanonicalQuote> {
        self.quotes.iter().find(|q| q.code == code)
    }

    /// Whether any row carries a real value for `field`.
    pub fn supplies(&self, field: Field) -> bool {
        self.quotes.iter().any(|q| q.supplied.contains(field))
    }

    /// Fraction of rows with core coverage (0 for an empty snapshot).
    pub fn coverage_ratio(&self) -> f64 {
        if self.quotes.is_empty() {
            return 0.0;
        }
        let covered = self.quotes.iter().filter(|q| q.has_core_coverage()).count();
        covered as f64 / self.quotes.len() as f64
    }

    /// Combine with a later provider's snapshot.
    ///
    /// Rows keep their order; missing fields are filled from the later
    /// snapshot and rows only the later one has are appended. The source
    /// becomes "a+b" and the earlier capture time is kept.
    pub fn merge(self, later: MarketSnapshot) -> MarketSnapshot {
        let mut quotes = self.quotes;
        let index: std::collections::HashMap<String, usize> = quotes
            .iter()
            .enumerate()
            .map(|(i, q)| (q.code.clone(), i))
            .collect();

        for quote in later.quotes {
            match index.get(&quote.code) {
                Some(&i) => quotes[i].fill_from(&quote),
                None => quotes.push(quote),
            }
        }

        MarketSnapshot {
            quotes,
            source_name: format!("{}+{}", self.source_name, later.source_name),
            captured_at: self.captured_at.min(later.captured_at),
        }
    }
}

// ============================================================================
// Adapter registry
// ============================================================================

/// Build the configured adapters.
///
/// Tushare is only added when a token is configured; unknown providers are
/// rejected by config validation and skipped here.
pub fn adapters_from_config(config: &Config) -> Vec<Arc<dyn ProviderAdapter>> {
    let screener = &config.screener;
    let pool = WorkerPool::new(screener.worker_pool_size);
    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();

    for entry in screener.sources.iter().filter(|s| s.enabled) {
        let adapter: Arc<dyn ProviderAdapter> = match entry.provider.as_str() {
            "tushare" => match config.tushare_token() {
                Some(token) => Arc::new(TushareAdapter::from_entry(entry, token, pool)),
                None => {
                    info!("Tushare token not configured, skipping premium source");
                    continue;
                }
            },
            "eastmoney" => Arc::new(EastmoneyAdapter::from_entry(entry, pool)),
            "sina+tencent" => Arc::new(SinaTencentAdapter::from_entry(entry, pool)),
            "sina" => Arc::new(SinaAdapter::from_entry(entry, pool)),
            other => {
                warn!(provider = other, "Unknown provider in config, skipping");
                continue;
            }
        };
        adapters.push(adapter);
    }

    adapters
}
