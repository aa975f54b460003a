//! MarketScan Common - Shared configuration, errors and logging for the market screening services.
//!
//! This crate provides:
//! - Configuration types and modular loading
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup and structured logging helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod config_loader;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    BuyThresholds, Config, DataSourceEntry, ObservabilityConfig, ScoreWeights, ScreenerConfig,
    ScreeningThresholds, SecretsConfig, WatchThresholds,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{Config, ScreenerConfig, ScreeningThresholds};
    pub use crate::error::{Error, Result};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
