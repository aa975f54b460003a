//! Invariants of the screening engine over generated snapshots.

use std::collections::HashSet;

use marketscan_common::ScreeningThresholds;
use marketscan_screener::data::{CanonicalQuote, MarketSnapshot};
use marketscan_screener::screener::result::rank_order;
use marketscan_screener::screener::ScreeningEngine;

/// Deterministic xorshift so every run sees the same market.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> f64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 % 1_000_000) as f64 / 1_000_000.0
    }

    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next()
    }

    fn chance(&mut self, p: f64) -> bool {
        self.next() < p
    }
}

fn market(seed: u64, size: usize) -> MarketSnapshot {
    let mut rng = Rng(seed);
    let quotes = (0..size)
        .map(|i| CanonicalQuote {
            code: format!("{:06}.SZ", i),
            name: format!("S{}", i),
            price: rng.range(2.0, 200.0),
            change_pct: (rng.range(-10.0, 10.0) * 100.0).round() / 100.0,
            volume_ratio: rng.range(0.0, 4.0),
            turnover_rate: rng.range(0.0, 10.0),
            // Coarse values so tie-breaks get exercised
            amount_yuan: (rng.range(0.0, 2e9) / 1e8).round() * 1e8,
            pe_ratio: if rng.chance(0.2) { 0.0 } else { rng.range(1.0, 120.0) },
            market_cap_yuan: rng.range(1e9, 2e11),
            amplitude_pct: rng.range(0.0, 12.0),
            is_st: rng.chance(0.05),
            is_limit_up: rng.chance(0.03),
            is_limit_down: rng.chance(0.03),
            is_halted: rng.chance(0.02),
            change_60d_pct: if rng.chance(0.3) { None } else { Some(rng.range(-30.0, 60.0)) },
            ..Default::default()
        })
        .collect();
    MarketSnapshot::new("generated", quotes)
}

fn quote(code: &str) -> CanonicalQuote {
    CanonicalQuote {
        code: code.into(),
        name: "测试".into(),
        price: 10.0,
        change_pct: 2.0,
        volume_ratio: 2.0,
        turnover_rate: 2.0,
        amount_yuan: 3e8,
        pe_ratio: 20.0,
        market_cap_yuan: 1e10,
        amplitude_pct: 3.0,
        change_60d_pct: Some(15.0),
        ..Default::default()
    }
}

#[test]
fn test_buckets_satisfy_their_filters() {
    let engine = ScreeningEngine::default();
    for seed in 1..=20u64 {
        let snapshot = market(seed * 7919, 2_000);
        let result = engine.screen(&snapshot);

        assert!(result.buy.len() <= 5);
        assert!(result.watch.len() <= 5);

        let buy_codes: HashSet<&str> = result.buy.iter().map(|c| c.code()).collect();
        for c in &result.buy {
            assert!(engine.passes_buy(&c.quote), "seed {} buy {}", seed, c.code());
            assert!(!c.quote.is_halted && !c.quote.is_st);
        }
        for c in &result.watch {
            assert!(engine.passes_watch(&c.quote), "seed {} watch {}", seed, c.code());
            assert!(!buy_codes.contains(c.code()));
        }
    }
}

#[test]
fn test_buckets_are_rank_ordered() {
    let engine = ScreeningEngine::default();
    for seed in 1..=20u64 {
        let result = engine.screen(&market(seed * 104_729, 2_000));
        for bucket in [&result.buy, &result.watch] {
            for pair in bucket.windows(2) {
                assert_ne!(
                    rank_order(&pair[0], &pair[1]),
                    std::cmp::Ordering::Greater,
                    "seed {}: {} before {}",
                    seed,
                    pair[0].code(),
                    pair[1].code()
                );
            }
        }
    }
}

#[test]
fn test_ties_broken_by_amount_then_code() {
    let engine = ScreeningEngine::default();
    // Same score: the amount term offsets the volume ratio term
    let a = CanonicalQuote {
        amount_yuan: 4e8,
        volume_ratio: 2.5,
        ..quote("000002.SZ")
    };
    let b = CanonicalQuote {
        amount_yuan: 2.4e9,
        volume_ratio: 2.0,
        ..quote("000003.SZ")
    };
    let c = CanonicalQuote {
        amount_yuan: 4e8,
        volume_ratio: 2.5,
        ..quote("000001.SZ")
    };
    let result = engine.screen(&MarketSnapshot::new("t", vec![a, b, c]));
    let codes: Vec<&str> = result.buy.iter().map(|c| c.code()).collect();
    assert_eq!(codes, vec!["000003.SZ", "000001.SZ", "000002.SZ"]);
    assert_eq!(result.buy[0].score, result.buy[2].score);
}

#[test]
fn test_screening_is_idempotent() {
    let engine = ScreeningEngine::default();
    let snapshot = market(42, 3_000);

    let first = engine.screen(&snapshot);
    let second = engine.screen(&snapshot);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
}

#[test]
fn test_change_boundaries() {
    let engine = ScreeningEngine::default();
    let at = |change: f64| {
        engine.passes_buy(&CanonicalQuote {
            change_pct: change,
            ..quote("600000.SH")
        })
    };
    assert!(at(0.5));
    assert!(at(5.0));
    assert!(!at(5.01));
    assert!(!at(0.49));
}

#[test]
fn test_unknown_pe_is_neutral() {
    let engine = ScreeningEngine::default();
    let unknown = CanonicalQuote {
        pe_ratio: 0.0,
        ..quote("600000.SH")
    };
    assert!(engine.passes_buy(&unknown));
    assert!(engine.passes_watch(&CanonicalQuote {
        change_pct: 1.0,
        ..unknown.clone()
    }));

    let scores = engine.scores();
    assert_eq!(scores.pe_safety_margin(0.0, 60.0), 0.0);

    // The only difference between the two is the PE term
    let known = quote("600000.SH");
    let pe_term = scores.pe_safety_margin(20.0, 60.0);
    assert!(pe_term > 0.0);
    assert!((scores.buy_score(&known) - scores.buy_score(&unknown) - pe_term).abs() < 1e-9);
}

#[test]
fn test_top_n_is_configurable() {
    let mut thresholds = ScreeningThresholds::default();
    thresholds.top_n = 2;
    let engine = ScreeningEngine::new(thresholds);
    let quotes = (1..=6).map(|i| quote(&format!("60000{}.SH", i))).collect();
    let result = engine.screen(&MarketSnapshot::new("t", quotes));
    assert_eq!(result.buy.len(), 2);
}
