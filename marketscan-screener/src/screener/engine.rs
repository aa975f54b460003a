//! Screening engine.
//!
//! Applies the hard filters and per-bucket bounds to every quote in a
//! snapshot, scores the survivors and keeps the top N of each bucket.

use std::collections::HashSet;
use tracing::debug;

use marketscan_common::ScreeningThresholds;

use crate::data::{CanonicalQuote, MarketSnapshot};

use super::result::{rank, ScreeningCandidate, ScreeningResult};
use super::scoring::{reason, ScoreModel};

/// Stateless screener over a market snapshot.
#[derive(Debug, Clone)]
pub struct ScreeningEngine {
    thresholds: ScreeningThresholds,
    scores: ScoreModel,
}

impl ScreeningEngine {
    pub fn new(thresholds: ScreeningThresholds) -> Self {
        Self {
            scores: ScoreModel::new(thresholds.clone()),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &ScreeningThresholds {
        &self.thresholds
    }

    pub fn scores(&self) -> &ScoreModel {
        &self.scores
    }

    /// ST, halted and limit-locked securities never reach either bucket.
    pub fn passes_hard_filters(&self, quote: &CanonicalQuote) -> bool {
        !(quote.is_st || quote.is_halted || quote.is_limit_up || quote.is_limit_down)
    }

    /// `0 < pe ≤ max`, or unknown PE when the neutral-pass policy is on.
    fn pe_ok(&self, pe: f64, max_pe: f64) -> bool {
        if pe <= 0.0 {
            self.thresholds.pe_unknown_passes
        } else {
            pe <= max_pe
        }
    }

    pub fn passes_buy(&self, quote: &CanonicalQuote) -> bool {
        let b = &self.thresholds.buy;
        let change = quote.change_pct;
        let change_ok = if b.change_bounds_inclusive {
            change >= b.min_change_pct && change <= b.max_change_pct
        } else {
            change > b.min_change_pct && change < b.max_change_pct
        };

        self.passes_hard_filters(quote)
            && change_ok
            && quote.volume_ratio >= b.min_volume_ratio
            && quote.amount_yuan > b.min_amount_yuan
            && quote.market_cap_yuan > b.min_market_cap_yuan
            && self.pe_ok(quote.pe_ratio, b.max_pe)
            && quote.amplitude_pct < b.max_amplitude_pct
    }

    /// Watch bounds; the buy-list exclusion is applied in [`Self::screen`].
    pub fn passes_watch(&self, quote: &CanonicalQuote) -> bool {
        let w = &self.thresholds.watch;
        let momentum_ok = quote
            .change_60d_pct
            .is_some_and(|c| c > w.min_change_60d_pct);

        self.passes_hard_filters(quote)
            && quote.change_pct >= w.min_change_pct
            && quote.change_pct <= w.max_change_pct
            && quote.turnover_rate >= w.min_turnover_rate
            && quote.market_cap_yuan > w.min_market_cap_yuan
            && self.pe_ok(quote.pe_ratio, w.max_pe)
            && quote.volume_ratio >= w.min_volume_ratio
            && momentum_ok
    }

    pub fn screen_buy(&self, snapshot: &MarketSnapshot) -> Vec<ScreeningCandidate> {
        let candidates = snapshot
            .quotes()
            .iter()
            .filter(|q| self.passes_buy(q))
            .map(|q| ScreeningCandidate {
                quote: q.clone(),
                score: self.scores.buy_score(q),
                reason: reason(q, false),
            })
            .collect();
        rank(candidates, self.thresholds.top_n)
    }

    /// Watch list, excluding anything already on `buy`.
    pub fn screen_watch(
        &self,
        snapshot: &MarketSnapshot,
        buy: &[ScreeningCandidate],
    ) -> Vec<ScreeningCandidate> {
        let buy_codes: HashSet<&str> = buy.iter().map(|c| c.code()).collect();
        let candidates = snapshot
            .quotes()
            .iter()
            .filter(|q| !buy_codes.contains(q.code.as_str()) && self.passes_watch(q))
            .map(|q| ScreeningCandidate {
                quote: q.clone(),
                score: self.scores.watch_score(q),
                reason: reason(q, true),
            })
            .collect();
        rank(candidates, self.thresholds.top_n)
    }

    /// Both short-lists for a snapshot.
    pub fn screen(&self, snapshot: &MarketSnapshot) -> ScreeningResult {
        let buy = self.screen_buy(snapshot);
        let watch = self.screen_watch(snapshot, &buy);

        debug!(
            source = snapshot.source_name(),
            scanned = snapshot.len(),
            buy = buy.len(),
            watch = watch.len(),
            "Screening complete"
        );

        ScreeningResult::assemble(snapshot, buy, watch)
    }
}

impl Default for ScreeningEngine {
    fn default() -> Self {
        Self::new(ScreeningThresholds::default())
    }
}
