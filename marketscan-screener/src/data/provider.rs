//! Provider adapter abstraction for full-market snapshots.
//!
//! Defines the `ProviderAdapter` trait every upstream implements, the raw
//! payload adapters hand to the normalizer, and the provider error type the
//! fallback chain recovers from.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::fields::{Field, FieldSet};

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to data providers.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Connection failed or upstream returned an unexpected status
    Network(String),
    /// Credential rejected by a premium source
    Auth(String),
    /// Rate limit exceeded
    RateLimited { retry_after_secs: Option<u64> },
    /// Upstream answered with no rows
    EmptyPayload,
    /// Upstream answered with rows we cannot interpret
    SchemaMismatch(String),
    /// Per-provider time bound exceeded
    Timeout(Duration),
    /// Caller cancelled the run
    Cancelled,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Auth(msg) => write!(f, "Authentication error: {}", msg),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after_secs {
                    write!(f, ", retry after {} seconds", secs)?;
                }
                Ok(())
            }
            Self::EmptyPayload => write!(f, "Empty payload"),
            Self::SchemaMismatch(msg) => write!(f, "Schema mismatch: {}", msg),
            Self::Timeout(limit) => write!(f, "Timed out after {}ms", limit.as_millis()),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Auth(_) => ErrorKind::Auth,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::EmptyPayload => ErrorKind::EmptyPayload,
            Self::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the failure says something about the provider itself.
    ///
    /// Cancellation comes from the caller and is never held against a provider.
    pub fn counts_against_provider(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::SchemaMismatch(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Discriminant of [`ProviderError`], recorded in provider health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Auth,
    RateLimited,
    EmptyPayload,
    SchemaMismatch,
    Timeout,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::EmptyPayload => "empty_payload",
            Self::SchemaMismatch => "schema_mismatch",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Raw payload
// ============================================================================

/// Unit a monetary column is reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unit {
    #[default]
    Yuan,
    ThousandYuan,
    TenThousandYuan,
    HundredMillionYuan,
}

impl Unit {
    pub fn to_yuan(self, value: f64) -> f64 {
        match self {
            Self::Yuan => value,
            Self::ThousandYuan => value * 1e3,
            Self::TenThousandYuan => value * 1e4,
            Self::HundredMillionYuan => value * 1e8,
        }
    }
}

/// One provider row keyed by canonical field, values still in provider form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow(HashMap<Field, Value>);

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: Field, value: impl Into<Value>) {
        self.0.insert(field, value.into());
    }

    /// Builder form of [`RawRow::set`].
    pub fn with(mut self, field: Field, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: Field) -> Option<&Value> {
        self.0.get(&field)
    }

    pub fn has(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }
}

/// Everything one adapter fetched, ready for normalization.
#[derive(Debug, Clone, Default)]
pub struct RawPayload {
    pub rows: Vec<RawRow>,
    units: HashMap<Field, Unit>,
}

impl RawPayload {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self {
            rows,
            units: HashMap::new(),
        }
    }

    /// Declare the unit a monetary column is reported in.
    pub fn with_unit(mut self, field: Field, unit: Unit) -> Self {
        self.units.insert(field, unit);
        self
    }

    pub fn unit(&self, field: Field) -> Unit {
        self.units.get(&field).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ============================================================================
// Provider Adapter Trait
// ============================================================================

/// A single upstream source of full-market quotes.
///
/// Implementations must honour the caller's timeout and cancellation, must
/// not retry internally and have no side effects beyond their network calls.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name (e.g., "eastmoney", "sina")
    fn name(&self) -> &str;

    /// Static priority (lower = tried first)
    fn priority(&self) -> u8;

    /// Canonical fields this provider can populate
    fn capabilities(&self) -> FieldSet;

    /// Fetch one full-market snapshot.
    async fn fetch_snapshot(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<RawPayload, ProviderError>;
}

/// Run `fut` under a timeout, giving up early if `cancel` fires.
pub async fn bounded<T, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    fut: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        res = tokio::time::timeout(timeout, fut) => {
            res.unwrap_or(Err(ProviderError::Timeout(timeout)))
        }
    }
}

// ============================================================================
// HTTP helpers shared by adapters
// ============================================================================

pub(crate) const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Build the HTTP client adapters share.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Map a non-success status into the matching provider error.
pub(crate) fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        429 => {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            Err(ProviderError::RateLimited { retry_after_secs })
        }
        401 | 403 => Err(ProviderError::Auth(format!("HTTP {}", status))),
        _ => Err(ProviderError::Network(format!("HTTP {}", status))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ProviderError::EmptyPayload.kind(), ErrorKind::EmptyPayload);
        assert_eq!(
            ProviderError::RateLimited { retry_after_secs: Some(5) }.kind(),
            ErrorKind::RateLimited
        );
        assert!(!ProviderError::Cancelled.counts_against_provider());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).counts_against_provider());
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::RateLimited { retry_after_secs: Some(30) };
        assert_eq!(err.to_string(), "Rate limited, retry after 30 seconds");
        assert_eq!(
            ProviderError::Timeout(Duration::from_millis(1500)).to_string(),
            "Timed out after 1500ms"
        );
    }

    #[test]
    fn test_unit_scaling() {
        assert_eq!(Unit::Yuan.to_yuan(5.0), 5.0);
        assert_eq!(Unit::ThousandYuan.to_yuan(2.0), 2000.0);
        assert_eq!(Unit::TenThousandYuan.to_yuan(3.0), 30000.0);
        assert_eq!(Unit::HundredMillionYuan.to_yuan(1.5), 150_000_000.0);
    }

    #[test]
    fn test_payload_units_default_to_yuan() {
        let payload = RawPayload::new(vec![RawRow::new().with(Field::Code, "600519")])
            .with_unit(Field::MarketCap, Unit::TenThousandYuan);
        assert_eq!(payload.unit(Field::MarketCap), Unit::TenThousandYuan);
        assert_eq!(payload.unit(Field::Amount), Unit::Yuan);
        assert_eq!(payload.len(), 1);
    }

    #[tokio::test]
    async fn test_bounded_timeout() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = bounded(&cancel, Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_bounded_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> =
            bounded(&cancel, Duration::from_secs(5), async { Ok(()) }).await;
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let cancel = CancellationToken::new();
        let result = bounded(&cancel, Duration::from_secs(5), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
