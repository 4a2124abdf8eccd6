//! Beatmap, score and collection storage.
//!
//! [`Database`] owns the in-memory stores. [`loader`] fills them from the
//! osu!stable dumps, this client's own dumps and the songs folder.

pub mod binary;
pub mod collections;
pub mod legacy;
pub mod loader;
pub mod manager;
pub mod models;
pub mod scanner;
pub mod score;
pub mod scores;
pub mod stars_cache;
pub mod store;

pub use loader::{LoadMode, LoadProgress, LoadReport, LoadState};
pub use manager::{Database, Notification, SaveError};
pub use models::{BeatmapDifficulty, BeatmapHash, BeatmapSet, GameMode, MapOverrides, Mods, SetSource};
pub use score::{FinishedScore, Grade, ScoreSortMethod};
pub use scores::{AddScoreOutcome, PlayerStats};
