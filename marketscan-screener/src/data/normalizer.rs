//! Maps raw provider rows onto [`CanonicalQuote`].
//!
//! Numbers may arrive as JSON numbers or as strings carrying `%`, `,` or
//! placeholder dashes. Anything that cannot be read as a finite number is
//! treated as unknown.

use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use super::fields::{Field, FieldSet};
use super::provider::{ProviderError, RawPayload, RawRow};
use super::CanonicalQuote;

/// Price tolerance when comparing against a limit price.
const LIMIT_PRICE_EPSILON: f64 = 0.005;

/// Percent tolerance when inferring limit moves from change% alone.
const LIMIT_PCT_EPSILON: f64 = 0.02;

/// Stateless payload normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldNormalizer;

impl FieldNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize a payload into canonical quotes.
    ///
    /// Rows without a recognisable code are dropped; duplicate codes keep
    /// their first row.
    pub fn normalize(&self, payload: &RawPayload) -> Result<Vec<CanonicalQuote>, ProviderError> {
        if payload.is_empty() {
            return Err(ProviderError::EmptyPayload);
        }

        let mut seen = HashSet::with_capacity(payload.len());
        let mut quotes = Vec::with_capacity(payload.len());
        let mut dropped = 0usize;

        for row in &payload.rows {
            match normalize_row(row, payload) {
                Some(quote) => {
                    if seen.insert(quote.code.clone()) {
                        quotes.push(quote);
                    }
                }
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            debug!(dropped, "Dropped rows without a usable code");
        }

        if !quotes.iter().any(|q| q.supplied.contains(Field::Price)) {
            return Err(ProviderError::SchemaMismatch(format!(
                "none of {} rows carries both a code and a price",
                payload.len()
            )));
        }

        Ok(quotes)
    }
}

fn normalize_row(row: &RawRow, payload: &RawPayload) -> Option<CanonicalQuote> {
    let code = row.get(Field::Code).and_then(text).and_then(|c| canonical_code(&c))?;
    let name = row.get(Field::Name).and_then(text).unwrap_or_default();

    let num = |field: Field| row.get(field).and_then(parse_number);
    let money = |field: Field| num(field).map(|v| payload.unit(field).to_yuan(v));

    let mut supplied = FieldSet::EMPTY.with(Field::Code);
    if !name.is_empty() {
        supplied.insert(Field::Name);
    }

    let price = num(Field::Price).filter(|p| *p > 0.0);
    let prev_close = num(Field::PrevClose).filter(|p| *p > 0.0);
    let change_pct = num(Field::ChangePct).or_else(|| match (price, prev_close) {
        (Some(p), Some(pc)) => Some((p / pc - 1.0) * 100.0),
        _ => None,
    });
    let amplitude = num(Field::Amplitude).or_else(|| {
        match (num(Field::High), num(Field::Low), prev_close) {
            (Some(h), Some(l), Some(pc)) if h >= l => Some((h - l) / pc * 100.0),
            _ => None,
        }
    });
    let volume_ratio = num(Field::VolumeRatio);
    let turnover = num(Field::TurnoverRate);
    let amount = money(Field::Amount);
    let pe = num(Field::PeRatio);
    let market_cap = money(Field::MarketCap);
    let change_60d = num(Field::Change60d);

    for (field, value) in [
        (Field::Price, price),
        (Field::ChangePct, change_pct),
        (Field::VolumeRatio, volume_ratio),
        (Field::TurnoverRate, turnover),
        (Field::Amount, amount),
        (Field::PeRatio, pe),
        (Field::MarketCap, market_cap),
        (Field::Amplitude, amplitude),
        (Field::Change60d, change_60d),
    ] {
        if value.is_some() {
            supplied.insert(field);
        }
    }

    let is_st = row.get(Field::StFlag).and_then(parse_flag).unwrap_or(false)
        || is_st_name(&name);

    let volume = num(Field::Volume);
    let no_trades = matches!((amount, volume), (Some(a), Some(v)) if a <= 0.0 && v <= 0.0);
    let is_halted = row.get(Field::HaltedFlag).and_then(parse_flag).unwrap_or(false)
        || price.is_none()
        || no_trades
        || name.contains('停');

    let (is_limit_up, is_limit_down) = match price {
        Some(p) => limit_flags(
            &code,
            is_st,
            p,
            prev_close,
            change_pct,
            num(Field::LimitUpPrice).filter(|v| *v > 0.0),
            num(Field::LimitDownPrice).filter(|v| *v > 0.0),
        ),
        None => (false, false),
    };

    Some(CanonicalQuote {
        code,
        name,
        price: price.unwrap_or(0.0),
        change_pct: change_pct.unwrap_or(0.0),
        volume_ratio: non_negative(volume_ratio),
        turnover_rate: non_negative(turnover),
        amount_yuan: non_negative(amount),
        pe_ratio: non_negative(pe),
        market_cap_yuan: non_negative(market_cap),
        amplitude_pct: non_negative(amplitude),
        is_st,
        is_limit_up,
        is_limit_down,
        is_halted,
        change_60d_pct: change_60d,
        supplied,
    })
}

fn non_negative(value: Option<f64>) -> f64 {
    value.filter(|v| *v > 0.0).unwrap_or(0.0)
}

/// ST or delisting-arrangement names.
pub fn is_st_name(name: &str) -> bool {
    name.to_uppercase().contains("ST") || name.contains('退')
}

fn limit_flags(
    code: &str,
    is_st: bool,
    price: f64,
    prev_close: Option<f64>,
    change_pct: Option<f64>,
    limit_up: Option<f64>,
    limit_down: Option<f64>,
) -> (bool, bool) {
    let pct = board_limit_pct(code, is_st);

    let up = match (limit_up, prev_close, change_pct) {
        (Some(lu), _, _) => price >= lu - LIMIT_PRICE_EPSILON,
        (None, Some(pc), _) => price >= round_cents(pc * (1.0 + pct / 100.0)) - LIMIT_PRICE_EPSILON,
        (None, None, Some(chg)) => chg >= pct - LIMIT_PCT_EPSILON,
        _ => false,
    };
    let down = match (limit_down, prev_close, change_pct) {
        (Some(ld), _, _) => price <= ld + LIMIT_PRICE_EPSILON,
        (None, Some(pc), _) => price <= round_cents(pc * (1.0 - pct / 100.0)) + LIMIT_PRICE_EPSILON,
        (None, None, Some(chg)) => chg <= -pct + LIMIT_PCT_EPSILON,
        _ => false,
    };
    (up, down)
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Daily price limit in percent for a security's board.
pub fn board_limit_pct(code: &str, is_st: bool) -> f64 {
    if code.ends_with(".BJ") {
        30.0
    } else if code.starts_with("688") || code.starts_with("689") || code.starts_with("30") {
        20.0
    } else if is_st {
        5.0
    } else {
        10.0
    }
}

// ============================================================================
// Value parsing
// ============================================================================

/// Read a numeric cell. Unknown placeholders and non-finite values are `None`.
pub fn parse_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| *c != '%' && *c != ',')
                .collect();
            match cleaned.as_str() {
                "" | "-" | "--" | "null" | "None" | "nan" | "NaN" => None,
                other => other.parse::<f64>().ok(),
            }
        }
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "y" | "yes" => Some(true),
            "0" | "false" | "n" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Canonicalize a security code to `NNNNNN.SH|SZ|BJ`.
///
/// Accepts `sh600519`, `600519.SH`, `1.600519` and bare `600519`.
pub fn canonical_code(raw: &str) -> Option<String> {
    let raw = raw.trim().to_uppercase();

    let (digits, exchange) = if let Some((left, right)) = raw.split_once('.') {
        match (left, right) {
            ("1", d) => (d.to_string(), Some("SH")),
            ("0", d) => (d.to_string(), None),
            (d, "SH") => (d.to_string(), Some("SH")),
            (d, "SZ") => (d.to_string(), Some("SZ")),
            (d, "BJ") => (d.to_string(), Some("BJ")),
            _ => return None,
        }
    } else if raw.len() == 8 && raw.is_char_boundary(2) {
        let (prefix, d) = raw.split_at(2);
        let exchange = match prefix {
            "SH" => "SH",
            "SZ" => "SZ",
            "BJ" => "BJ",
            _ => return None,
        };
        (d.to_string(), Some(exchange))
    } else {
        (raw.clone(), None)
    };

    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let exchange = match exchange {
        Some(e) => e,
        None => infer_exchange(&digits)?,
    };
    Some(format!("{}.{}", digits, exchange))
}

fn infer_exchange(digits: &str) -> Option<&'static str> {
    if digits.starts_with("92") || digits.starts_with('4') || digits.starts_with('8') {
        Some("BJ")
    } else if digits.starts_with('6') || digits.starts_with('9') || digits.starts_with('5') {
        Some("SH")
    } else if digits.starts_with('0') || digits.starts_with('2') || digits.starts_with('3') || digits.starts_with('1') {
        Some("SZ")
    } else {
        None
    }
}
