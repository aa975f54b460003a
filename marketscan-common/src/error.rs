//! Error types shared by the market screening services.
//!
//! Service-level failures and the HTTP status each one maps to. Typed
//! errors from individual components convert into this at the HTTP edge.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the common error type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation overran its deadline
    #[error("Operation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The operation was cancelled, usually by shutdown
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Timeouts and cancellations can succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Cancelled)
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Timeout(_) | Self::Cancelled => 503,
            Self::Config(_) | Self::Internal(_) => 500,
        }
    }
}
