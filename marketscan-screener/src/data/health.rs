//! Health tracking for data providers.
//!
//! The fallback chain records every attempt here and reads it back to order
//! providers: one that keeps failing is demoted behind the others for the
//! rest of the process lifetime.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;

use super::provider::{ErrorKind, ProviderError};

// ============================================================================
// Health Status
// ============================================================================

/// Health status for a single provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    /// Provider name
    pub name: String,
    /// Failures since the last success
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error_kind: Option<ErrorKind>,
    pub last_error: Option<String>,
    pub total_attempts: u64,
    pub total_failures: u64,
    /// Sticky once set
    pub demoted: bool,
}

impl ProviderHealth {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            consecutive_failures: 0,
            last_success_at: None,
            last_attempt_at: None,
            last_error_kind: None,
            last_error: None,
            total_attempts: 0,
            total_failures: 0,
            demoted: false,
        }
    }

    pub fn record_success(&mut self) {
        let now = Utc::now();
        self.consecutive_failures = 0;
        self.last_success_at = Some(now);
        self.last_attempt_at = Some(now);
        self.total_attempts += 1;
    }

    /// Record a failure. Returns true when this failure demoted the provider.
    pub fn record_failure(&mut self, error: &ProviderError, demote_after: u32) -> bool {
        self.consecutive_failures += 1;
        self.last_attempt_at = Some(Utc::now());
        self.last_error_kind = Some(error.kind());
        self.last_error = Some(error.to_string());
        self.total_attempts += 1;
        self.total_failures += 1;

        if !self.demoted && self.consecutive_failures >= demote_after {
            self.demoted = true;
            warn!(
                provider = %self.name,
                failures = self.consecutive_failures,
                "Provider demoted after {} consecutive failures",
                demote_after
            );
            return true;
        }
        false
    }
}

// ============================================================================
// Health Tracker
// ============================================================================

/// Health of every provider in one chain.
#[derive(Debug)]
pub struct HealthTracker {
    providers: RwLock<HashMap<String, ProviderHealth>>,
    demote_after: u32,
}

impl HealthTracker {
    pub fn new(demote_after: u32) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            demote_after: demote_after.max(1),
        }
    }

    pub async fn record_success(&self, name: &str) {
        let mut providers = self.providers.write().await;
        providers
            .entry(name.to_string())
            .or_insert_with(|| ProviderHealth::new(name))
            .record_success();
    }

    pub async fn record_failure(&self, name: &str, error: &ProviderError) -> bool {
        let mut providers = self.providers.write().await;
        providers
            .entry(name.to_string())
            .or_insert_with(|| ProviderHealth::new(name))
            .record_failure(error, self.demote_after)
    }

    pub async fn is_demoted(&self, name: &str) -> bool {
        self.providers
            .read()
            .await
            .get(name)
            .is_some_and(|h| h.demoted)
    }

    pub async fn get(&self, name: &str) -> Option<ProviderHealth> {
        self.providers.read().await.get(name).cloned()
    }
}
