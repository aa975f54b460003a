//! Screening output.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

use crate::data::{CanonicalQuote, MarketSnapshot};

/// A quote that passed a bucket's filters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreeningCandidate {
    #[serde(flatten)]
    pub quote: CanonicalQuote,
    pub score: f64,
    pub reason: String,
}

impl ScreeningCandidate {
    pub fn code(&self) -> &str {
        &self.quote.code
    }
}

/// Score descending, then traded amount descending, then code ascending.
pub fn rank_order(a: &ScreeningCandidate, b: &ScreeningCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.quote.amount_yuan.total_cmp(&a.quote.amount_yuan))
        .then_with(|| a.quote.code.cmp(&b.quote.code))
}

/// Sort into rank order and keep at most `top_n`.
pub fn rank(mut candidates: Vec<ScreeningCandidate>, top_n: usize) -> Vec<ScreeningCandidate> {
    candidates.sort_by(rank_order);
    candidates.truncate(top_n);
    candidates
}

/// Buy and watch short-lists from one snapshot. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreeningResult {
    pub buy: Vec<ScreeningCandidate>,
    pub watch: Vec<ScreeningCandidate>,
    /// Capture time of the snapshot the lists came from
    pub updated_at: DateTime<Utc>,
}

impl ScreeningResult {
    pub fn assemble(
        snapshot: &MarketSnapshot,
        buy: Vec<ScreeningCandidate>,
        watch: Vec<ScreeningCandidate>,
    ) -> Self {
        Self {
            buy,
            watch,
            updated_at: snapshot.captured_at(),
        }
    }

    /// Result of a run that had no data at all.
    pub fn empty(updated_at: DateTime<Utc>) -> Self {
        Self {
            buy: Vec::new(),
            watch: Vec::new(),
            updated_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buy.is_empty() && self.watch.is_empty()
    }
}
