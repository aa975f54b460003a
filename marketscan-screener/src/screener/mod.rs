//! Market-wide screening.
//!
//! Turns one market snapshot into two ranked short-lists:
//!
//! ```text
//! MarketSnapshot ──▶ hard filters ──┬──▶ buy filter ──▶ score ──▶ top N ──┐
//!  (ST, halted, limit up/down)      │                                     ├──▶ ScreeningResult
//!                                   └──▶ watch filter ─▶ score ─▶ top N ──┘
//!                                        (minus final buy codes)
//! ```
//!
//! Everything here is pure: the same snapshot and thresholds always give
//! the same result.

pub mod engine;
pub mod result;
pub mod scoring;

pub use engine::ScreeningEngine;
pub use result::{ScreeningCandidate, ScreeningResult};
pub use scoring::ScoreModel;
