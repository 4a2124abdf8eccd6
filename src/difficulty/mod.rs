//! Difficulty and pp calculation.
//!
//! Both background calculators share [`cache::CalcCache`]: the map calc job
//! fills in nomod star ratings for freshly imported beatmaps, the
//! leaderboard calculator answers per-score pp requests for the selected
//! beatmap.

pub mod bpm;
pub mod cache;
pub mod calculator;
pub mod leaderboard;
pub mod map_calc;

pub use cache::{CacheState, CalcCache};
pub use calculator::{CalcError, CalcStrategy};
pub use leaderboard::{CalcRequest, CalcResult, LeaderboardPp, PpTarget};
pub use map_calc::{MapCalc, MapCalcBatch};

use crate::database::models::BpmInfo;

/// What the map calc job computes for one difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MapMetrics {
    pub stars_nomod: f64,
    pub bpm: BpmInfo,
    pub circles: u16,
    pub sliders: u16,
    pub spinners: u16,
    pub length_ms: u32,
}
