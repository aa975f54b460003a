//! Composite scores and reason text.

use marketscan_common::ScreeningThresholds;

use crate::data::CanonicalQuote;

/// Weighted score formulas for both buckets.
#[derive(Debug, Clone)]
pub struct ScoreModel {
    thresholds: ScreeningThresholds,
}

impl ScoreModel {
    pub fn new(thresholds: ScreeningThresholds) -> Self {
        Self { thresholds }
    }

    /// `vr × w + chg × w + amount / unit + pe_safety + cap_stability`, with
    /// the PE ceiling of the bucket being scored.
    fn base_score(&self, quote: &CanonicalQuote, pe_ceiling: f64) -> f64 {
        let w = &self.thresholds.weights;
        let amount_term = if w.amount_unit_yuan > 0.0 {
            quote.amount_yuan / w.amount_unit_yuan
        } else {
            0.0
        };

        quote.volume_ratio * w.volume_ratio
            + quote.change_pct * w.change_pct
            + amount_term
            + self.pe_safety_margin(quote.pe_ratio, pe_ceiling)
            + self.market_cap_stability(quote.market_cap_yuan)
    }

    pub fn buy_score(&self, quote: &CanonicalQuote) -> f64 {
        self.base_score(quote, self.thresholds.buy.max_pe)
    }

    /// Buy formula at the watch PE ceiling plus 60-day momentum.
    pub fn watch_score(&self, quote: &CanonicalQuote) -> f64 {
        let momentum = quote.change_60d_pct.unwrap_or(0.0) * self.thresholds.weights.momentum_60d;
        self.base_score(quote, self.thresholds.watch.max_pe) + momentum
    }

    /// Linear in PE: full weight near zero, nothing at the ceiling.
    /// Unknown PE (0) contributes nothing.
    pub fn pe_safety_margin(&self, pe: f64, ceiling: f64) -> f64 {
        if pe <= 0.0 || ceiling <= 0.0 || pe > ceiling {
            return 0.0;
        }
        self.thresholds.weights.pe_safety * (ceiling - pe) / ceiling
    }

    /// Full weight inside the cap band, decaying linearly below and
    /// inversely above.
    pub fn market_cap_stability(&self, cap: f64) -> f64 {
        let w = &self.thresholds.weights;
        if cap <= 0.0 {
            return 0.0;
        }
        if cap < w.cap_band_low_yuan {
            w.market_cap_stability * cap / w.cap_band_low_yuan
        } else if cap > w.cap_band_high_yuan {
            w.market_cap_stability * w.cap_band_high_yuan / cap
        } else {
            w.market_cap_stability
        }
    }
}

// ============================================================================
// Reason text
// ============================================================================

/// Volume ratio label.
pub fn volume_label(volume_ratio: f64) -> &'static str {
    match volume_ratio {
        v if v < 0.5 => "very light",
        v if v < 0.8 => "light",
        v if v < 1.2 => "normal",
        v if v < 2.0 => "moderate",
        v if v < 3.0 => "heavy",
        _ => "surging",
    }
}

/// "¥7.14B", "¥356.8M", "¥8000"
pub fn format_yuan(value: f64) -> String {
    if value >= 1e9 {
        format!("¥{:.2}B", value / 1e9)
    } else if value >= 1e6 {
        format!("¥{:.1}M", value / 1e6)
    } else {
        format!("¥{:.0}", value)
    }
}

/// Short explanation, e.g. `+3.5% on ¥7.14B turnover, volume ratio 2.1 (heavy), PE 24`.
///
/// Segments for unknown values are left out.
pub fn reason(quote: &CanonicalQuote, with_momentum: bool) -> String {
    let mut parts = vec![format!(
        "{:+.1}% on {} turnover",
        quote.change_pct,
        format_yuan(quote.amount_yuan)
    )];

    if quote.volume_ratio > 0.0 {
        parts.push(format!(
            "volume ratio {:.1} ({})",
            quote.volume_ratio,
            volume_label(quote.volume_ratio)
        ));
    }
    if quote.pe_ratio > 0.0 {
        parts.push(format!("PE {:.0}", quote.pe_ratio));
    }
    if quote.market_cap_yuan > 0.0 {
        parts.push(format!("cap {}", format_yuan(quote.market_cap_yuan)));
    }
    if with_momentum {
        if let Some(change_60d) = quote.change_60d_pct {
            parts.push(format!("60d {:+.1}%", change_60d));
        }
    }

    parts.join(", ")
}
