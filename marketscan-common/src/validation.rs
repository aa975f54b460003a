//! Configuration validation.
//!
//! Every configuration section is checked at startup; a failure here is
//! fatal for the service.

use std::collections::HashSet;
use thiserror::Error;

use crate::config::{
    BuyThresholds, Config, ObservabilityConfig, ScoreWeights, ScreenerConfig, ScreeningThresholds,
    WatchThresholds,
};

/// Known provider names.
pub const KNOWN_PROVIDERS: &[&str] = &["tushare", "eastmoney", "sina+tencent", "sina"];

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    if errors.is_empty() {
        Ok(())
    } else if errors.len() == 1 {
        Err(errors.remove(0))
    } else {
        Err(ValidationError::Multiple(errors))
    }
}

fn non_negative(value: f64, field: &str, errors: &mut Vec<ValidationError>) {
    if !value.is_finite() || value < 0.0 {
        errors.push(invalid(field, "must be a finite, non-negative number"));
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.screener.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        collect(errors)
    }
}

impl Validate for ScreenerConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push(ValidationError::InvalidPort {
                port: self.port,
                field: "screener.port".into(),
            });
        }
        if self.host.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "screener.host".into(),
            });
        }
        if self.worker_pool_size == 0 {
            errors.push(invalid("screener.worker_pool_size", "must be at least 1"));
        }
        if self.provider_timeout_secs == 0 {
            errors.push(invalid("screener.provider_timeout_secs", "must be at least 1"));
        }
        if self.run_deadline_secs < self.provider_timeout_secs {
            errors.push(ValidationError::Conflict {
                reason: format!(
                    "screener.run_deadline_secs ({}) is shorter than screener.provider_timeout_secs ({})",
                    self.run_deadline_secs, self.provider_timeout_secs
                ),
            });
        }
        if self.snapshot_ttl_secs == 0 {
            errors.push(invalid("screener.snapshot_ttl_secs", "must be at least 1"));
        }
        if self.demote_after_failures == 0 {
            errors.push(invalid("screener.demote_after_failures", "must be at least 1"));
        }
        if !(self.min_coverage_ratio > 0.0 && self.min_coverage_ratio <= 1.0) {
            errors.push(invalid("screener.min_coverage_ratio", "must be in (0, 1]"));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !KNOWN_PROVIDERS.contains(&source.provider.as_str()) {
                errors.push(invalid(
                    "screener.sources.provider",
                    format!(
                        "unknown provider '{}', expected one of: {}",
                        source.provider,
                        KNOWN_PROVIDERS.join(", ")
                    ),
                ));
            }
            if !seen.insert(source.provider.as_str()) {
                errors.push(ValidationError::Conflict {
                    reason: format!("provider '{}' is listed more than once", source.provider),
                });
            }
            if source.requests_per_minute == Some(0) || source.list_requests_per_minute == Some(0) {
                errors.push(invalid(
                    "screener.sources.requests_per_minute",
                    format!("must be at least 1 for '{}'", source.provider),
                ));
            }
            let timeout = self.source_timeout_secs(source);
            if timeout == 0 {
                errors.push(invalid(
                    "screener.sources.timeout_secs",
                    format!("must be at least 1 for '{}'", source.provider),
                ));
            }
            if source.enabled && timeout != self.provider_timeout_secs && timeout > self.run_deadline_secs {
                errors.push(ValidationError::Conflict {
                    reason: format!(
                        "screener.run_deadline_secs ({}) is shorter than the '{}' timeout ({})",
                        self.run_deadline_secs, source.provider, timeout
                    ),
                });
            }
        }
        if !self.sources.iter().any(|s| s.enabled) {
            errors.push(ValidationError::MissingField {
                field: "screener.sources (no enabled provider)".into(),
            });
        }

        if let Err(e) = self.thresholds.validate() {
            errors.push(e);
        }

        collect(errors)
    }
}

impl Validate for ScreeningThresholds {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.top_n == 0 {
            errors.push(invalid("screener.thresholds.top_n", "must be at least 1"));
        }
        for result in [
            self.buy.validate(),
            self.watch.validate(),
            self.weights.validate(),
        ] {
            if let Err(e) = result {
                errors.push(e);
            }
        }

        collect(errors)
    }
}

impl Validate for BuyThresholds {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if !(self.min_change_pct <= self.max_change_pct) {
            errors.push(invalid(
                "screener.thresholds.buy.min_change_pct",
                "must not exceed max_change_pct",
            ));
        }
        non_negative(self.min_volume_ratio, "screener.thresholds.buy.min_volume_ratio", &mut errors);
        non_negative(self.min_amount_yuan, "screener.thresholds.buy.min_amount_yuan", &mut errors);
        non_negative(
            self.min_market_cap_yuan,
            "screener.thresholds.buy.min_market_cap_yuan",
            &mut errors,
        );
        if !(self.max_pe > 0.0) {
            errors.push(invalid("screener.thresholds.buy.max_pe", "must be positive"));
        }
        if !(self.max_amplitude_pct > 0.0) {
            errors.push(invalid(
                "screener.thresholds.buy.max_amplitude_pct",
                "must be positive",
            ));
        }

        collect(errors)
    }
}

impl Validate for WatchThresholds {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if !(self.min_change_pct <= self.max_change_pct) {
            errors.push(invalid(
                "screener.thresholds.watch.min_change_pct",
                "must not exceed max_change_pct",
            ));
        }
        non_negative(
            self.min_turnover_rate,
            "screener.thresholds.watch.min_turnover_rate",
            &mut errors,
        );
        non_negative(
            self.min_market_cap_yuan,
            "screener.thresholds.watch.min_market_cap_yuan",
            &mut errors,
        );
        non_negative(
            self.min_volume_ratio,
            "screener.thresholds.watch.min_volume_ratio",
            &mut errors,
        );
        if !(self.max_pe > 0.0) {
            errors.push(invalid("screener.thresholds.watch.max_pe", "must be positive"));
        }
        if !self.min_change_60d_pct.is_finite() {
            errors.push(invalid(
                "screener.thresholds.watch.min_change_60d_pct",
                "must be finite",
            ));
        }

        collect(errors)
    }
}

impl Validate for ScoreWeights {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for (value, field) in [
            (self.volume_ratio, "screener.thresholds.weights.volume_ratio"),
            (self.change_pct, "screener.thresholds.weights.change_pct"),
            (self.pe_safety, "screener.thresholds.weights.pe_safety"),
            (
                self.market_cap_stability,
                "screener.thresholds.weights.market_cap_stability",
            ),
            (self.momentum_60d, "screener.thresholds.weights.momentum_60d"),
        ] {
            non_negative(value, field, &mut errors);
        }
        if !(self.amount_unit_yuan > 0.0) {
            errors.push(invalid(
                "screener.thresholds.weights.amount_unit_yuan",
                "must be positive",
            ));
        }
        if !(self.cap_band_low_yuan > 0.0 && self.cap_band_low_yuan <= self.cap_band_high_yuan) {
            errors.push(invalid(
                "screener.thresholds.weights.cap_band_low_yuan",
                "must be positive and not exceed cap_band_high_yuan",
            ));
        }

        collect(errors)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(invalid(
                "observability.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(invalid(
                "observability.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        Ok(())
    }
}

/// Load configuration with env overrides, then validate it.
pub fn load_and_validate() -> anyhow::Result<Config> {
    let config = Config::load_with_env()?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;
    Ok(config)
}
