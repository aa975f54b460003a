//! Errors surfaced by a screening run.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ScreenError {
    /// The run overran its deadline. Retryable.
    #[error("screening run exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("screening run cancelled")]
    Cancelled,
}

impl ScreenError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<marketscan_common::ValidationError> for ScreenError {
    fn from(err: marketscan_common::ValidationError) -> Self {
        Self::InvalidConfiguration(err.to_string())
    }
}

impl From<ScreenError> for marketscan_common::Error {
    fn from(err: ScreenError) -> Self {
        match err {
            ScreenError::Timeout(limit) => Self::Timeout(limit),
            ScreenError::InvalidConfiguration(msg) => Self::Config(msg),
            ScreenError::Cancelled => Self::Cancelled,
        }
    }
}
