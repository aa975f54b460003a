//! Configuration types for the screening services.
//!
//! Configuration lives in `~/.marketscan/` as JSON files that are merged by
//! [`crate::config_loader`]. Every field has a default, so an empty or
//! missing directory yields a working configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config_loader::load_modular_config;

/// Get the configuration directory path (~/.marketscan).
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".marketscan"),
        |dirs| dirs.home_dir().join(".marketscan"),
    )
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub screener: ScreenerConfig,

    #[serde(default)]
    pub secrets: SecretsConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from `~/.marketscan/`.
    pub fn load() -> Result<Self> {
        Self::load_from_dir(&config_dir())
    }

    /// Load and merge the modular files found in `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let value = load_modular_config(Some(dir.to_path_buf()))?;
        serde_json::from_value(value)
            .with_context(|| format!("Failed to parse config from {}", dir.display()))
    }

    /// Load configuration from a single JSON file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("MARKETSCAN_PORT").and_then(|p| p.parse().ok()) {
            self.screener.port = port;
        }
        if let Some(host) = lookup("MARKETSCAN_HOST") {
            self.screener.host = host;
        }
        if let Some(workers) = lookup("MARKETSCAN_WORKERS").and_then(|w| w.parse().ok()) {
            self.screener.worker_pool_size = workers;
        }
        if let Some(token) = lookup("TUSHARE_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.secrets.tushare_token = Some(token);
        }
        if let Some(level) = lookup("MARKETSCAN_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("MARKETSCAN_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Premium data credential, if one is configured and non-blank.
    pub fn tushare_token(&self) -> Option<&str> {
        self.secrets
            .tushare_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

// ============================================================================
// Screener service
// ============================================================================

/// Screening service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Concurrent intra-provider batch requests
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Upper bound for a single provider attempt
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Upper bound for a whole run
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,

    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,

    /// Demote a provider once this many attempts in a row have failed
    #[serde(default = "default_demote_after_failures")]
    pub demote_after_failures: u32,

    /// Fraction of rows that must carry price, change% and volume ratio or turnover
    #[serde(default = "default_min_coverage_ratio")]
    pub min_coverage_ratio: f64,

    #[serde(default = "default_sources")]
    pub sources: Vec<DataSourceEntry>,

    #[serde(default)]
    pub thresholds: ScreeningThresholds,
}

/// Floor for the sina+tencent attempt timeout. Its two rate-limited legs
/// (~55 list pages, then ~70 quote batches) take close to 20s on their own.
pub const SINA_TENCENT_MIN_TIMEOUT_SECS: u64 = 60;

impl ScreenerConfig {
    /// Attempt timeout for one source.
    pub fn source_timeout_secs(&self, entry: &DataSourceEntry) -> u64 {
        entry.timeout_secs.unwrap_or(match entry.provider.as_str() {
            "sina+tencent" => self.provider_timeout_secs.max(SINA_TENCENT_MIN_TIMEOUT_SECS),
            _ => self.provider_timeout_secs,
        })
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    4436
}

fn default_worker_pool_size() -> usize {
    3
}

fn default_provider_timeout_secs() -> u64 {
    20
}

fn default_run_deadline_secs() -> u64 {
    120
}

fn default_snapshot_ttl_secs() -> u64 {
    300
}

fn default_demote_after_failures() -> u32 {
    3
}

fn default_min_coverage_ratio() -> f64 {
    0.5
}

fn default_sources() -> Vec<DataSourceEntry> {
    vec![
        DataSourceEntry::new("tushare", 0),
        DataSourceEntry::new("eastmoney", 1),
        DataSourceEntry::new("sina+tencent", 2),
        DataSourceEntry::new("sina", 3),
    ]
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            worker_pool_size: default_worker_pool_size(),
            provider_timeout_secs: default_provider_timeout_secs(),
            run_deadline_secs: default_run_deadline_secs(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            demote_after_failures: default_demote_after_failures(),
            min_coverage_ratio: default_min_coverage_ratio(),
            sources: default_sources(),
            thresholds: ScreeningThresholds::default(),
        }
    }
}

/// One upstream data source in the fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceEntry {
    /// Provider name: tushare, eastmoney, sina+tencent, sina
    pub provider: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lower value is tried first
    #[serde(default)]
    pub priority: u8,

    /// Override the upstream endpoint (mirrors, tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Request budget for rate-limited sources. For sina+tencent this is
    /// the Tencent quote leg.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,

    /// Request budget for the Sina list leg of sina+tencent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_requests_per_minute: Option<u32>,

    /// Per-attempt timeout, overriding `provider_timeout_secs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl DataSourceEntry {
    pub fn new(provider: impl Into<String>, priority: u8) -> Self {
        Self {
            provider: provider.into(),
            enabled: true,
            priority,
            base_url: None,
            requests_per_minute: None,
            list_requests_per_minute: None,
            timeout_secs: None,
        }
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Screening thresholds
// ============================================================================

/// Filter bounds and score weights for both buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningThresholds {
    /// Maximum candidates per bucket
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Whether an unknown PE (0) passes the PE filter
    #[serde(default = "default_true")]
    pub pe_unknown_passes: bool,

    #[serde(default)]
    pub buy: BuyThresholds,

    #[serde(default)]
    pub watch: WatchThresholds,

    #[serde(default)]
    pub weights: ScoreWeights,
}

fn default_top_n() -> usize {
    5
}

impl Default for ScreeningThresholds {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            pe_unknown_passes: true,
            buy: BuyThresholds::default(),
            watch: WatchThresholds::default(),
            weights: ScoreWeights::default(),
        }
    }
}

/// Buy bucket bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuyThresholds {
    pub min_change_pct: f64,
    pub max_change_pct: f64,
    /// Whether the change% bounds themselves pass
    pub change_bounds_inclusive: bool,
    pub min_volume_ratio: f64,
    /// Exclusive lower bound on traded amount
    pub min_amount_yuan: f64,
    /// Exclusive lower bound on market cap
    pub min_market_cap_yuan: f64,
    pub max_pe: f64,
    /// Exclusive upper bound on amplitude
    pub max_amplitude_pct: f64,
}

impl Default for BuyThresholds {
    fn default() -> Self {
        Self {
            min_change_pct: 0.5,
            max_change_pct: 5.0,
            change_bounds_inclusive: true,
            min_volume_ratio: 1.8,
            min_amount_yuan: 2e8,
            min_market_cap_yuan: 5e9,
            max_pe: 60.0,
            max_amplitude_pct: 8.0,
        }
    }
}

/// Watch bucket bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchThresholds {
    pub min_change_pct: f64,
    pub max_change_pct: f64,
    pub min_turnover_rate: f64,
    pub min_market_cap_yuan: f64,
    pub max_pe: f64,
    pub min_volume_ratio: f64,
    /// Exclusive lower bound on the 60-day change
    pub min_change_60d_pct: f64,
}

impl Default for WatchThresholds {
    fn default() -> Self {
        Self {
            min_change_pct: 0.0,
            max_change_pct: 3.0,
            min_turnover_rate: 0.5,
            min_market_cap_yuan: 5e9,
            max_pe: 80.0,
            min_volume_ratio: 0.8,
            min_change_60d_pct: 10.0,
        }
    }
}

/// Composite score weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub volume_ratio: f64,
    pub change_pct: f64,
    /// Amount is scored in multiples of this unit
    pub amount_unit_yuan: f64,
    pub pe_safety: f64,
    pub market_cap_stability: f64,
    /// Market cap band where stability peaks
    pub cap_band_low_yuan: f64,
    pub cap_band_high_yuan: f64,
    /// Watch bucket only
    pub momentum_60d: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            volume_ratio: 20.0,
            change_pct: 3.0,
            amount_unit_yuan: 2e8,
            pe_safety: 10.0,
            market_cap_stability: 5.0,
            cap_band_low_yuan: 1e10,
            cap_band_high_yuan: 5e10,
            momentum_60d: 0.5,
        }
    }
}

// ============================================================================
// Secrets & observability
// ============================================================================

/// Credentials, usually kept in `secrets.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tushare_token: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}
