//! In-memory records for beatmaps and their sets.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// MD5 of a `.osu` file's bytes. Primary identity of a difficulty.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BeatmapHash(pub [u8; 16]);

impl BeatmapHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(md5::compute(bytes).0)
    }

    /// Parses the 32 character hex form (case-insensitive).
    pub fn from_hex(text: &str) -> Option<Self> {
        if text.len() != 32 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut raw = [0u8; 16];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&text[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(raw))
    }
}

impl fmt::Display for BeatmapHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BeatmapHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BeatmapHash({})", self)
    }
}

bitflags! {
    /// Modifier bits in the legacy osu! layout.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Mods: u32 {
        const NO_FAIL = 1 << 0;
        const EASY = 1 << 1;
        const TOUCH_DEVICE = 1 << 2;
        const HIDDEN = 1 << 3;
        const HARD_ROCK = 1 << 4;
        const SUDDEN_DEATH = 1 << 5;
        const DOUBLE_TIME = 1 << 6;
        const RELAX = 1 << 7;
        const HALF_TIME = 1 << 8;
        const NIGHTCORE = 1 << 9;
        const FLASHLIGHT = 1 << 10;
        const AUTOPLAY = 1 << 11;
        const SPUN_OUT = 1 << 12;
        const AUTOPILOT = 1 << 13;
        const PERFECT = 1 << 14;
        const TARGET = 1 << 23;
        const SCORE_V2 = 1 << 29;
    }
}

impl Mods {
    /// Speed multiplier implied by the rate mods.
    pub fn speed(self) -> f32 {
        if self.intersects(Mods::DOUBLE_TIME | Mods::NIGHTCORE) {
            1.5
        } else if self.contains(Mods::HALF_TIME) {
            0.75
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GameMode {
    #[default]
    Osu,
    Taiko,
    Catch,
    Mania,
}

impl GameMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(GameMode::Osu),
            1 => Some(GameMode::Taiko),
            2 => Some(GameMode::Catch),
            3 => Some(GameMode::Mania),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            GameMode::Osu => 0,
            GameMode::Taiko => 1,
            GameMode::Catch => 2,
            GameMode::Mania => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BpmInfo {
    pub min: i32,
    pub max: i32,
    pub most_common: i32,
}

/// User-adjustable values layered over the parsed metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapOverrides {
    pub local_offset: i16,
    pub online_offset: i16,
    pub loudness: f32,
    pub draw_background: bool,
}

impl Default for MapOverrides {
    fn default() -> Self {
        Self {
            local_offset: 0,
            online_offset: 0,
            loudness: 0.0,
            draw_background: true,
        }
    }
}

/// One playable chart.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatmapDifficulty {
    pub hash: BeatmapHash,
    pub id: i32,
    pub set_id: i32,
    pub folder: PathBuf,
    pub osu_file: String,

    pub title: String,
    pub title_unicode: String,
    pub artist: String,
    pub artist_unicode: String,
    pub creator: String,
    pub difficulty_name: String,
    pub source: String,
    pub tags: String,
    pub audio_file: String,

    pub ar: f32,
    pub cs: f32,
    pub hp: f32,
    pub od: f32,
    pub slider_multiplier: f64,
    pub stack_leniency: f32,

    pub bpm: BpmInfo,
    pub circles: u16,
    pub sliders: u16,
    pub spinners: u16,
    /// Nomod star rating; negative until computed.
    pub stars_nomod: f64,
    pub length_ms: u32,
    pub preview_time: u32,
    pub last_modification: u64,
    pub mode: GameMode,

    pub overrides: MapOverrides,
}

impl BeatmapDifficulty {
    pub fn path(&self) -> PathBuf {
        self.folder.join(&self.osu_file)
    }

    pub fn needs_star_calc(&self) -> bool {
        self.stars_nomod < 0.0
    }
}

impl Default for BeatmapDifficulty {
    fn default() -> Self {
        Self {
            hash: BeatmapHash::default(),
            id: 0,
            set_id: -1,
            folder: PathBuf::new(),
            osu_file: String::new(),
            title: String::new(),
            title_unicode: String::new(),
            artist: String::new(),
            artist_unicode: String::new(),
            creator: String::new(),
            difficulty_name: String::new(),
            source: String::new(),
            tags: String::new(),
            audio_file: String::new(),
            ar: 5.0,
            cs: 5.0,
            hp: 5.0,
            od: 5.0,
            slider_multiplier: 1.4,
            stack_leniency: 0.7,
            bpm: BpmInfo::default(),
            circles: 0,
            sliders: 0,
            spinners: 0,
            stars_nomod: -1.0,
            length_ms: 0,
            preview_time: 0,
            last_modification: 0,
            mode: GameMode::Osu,
            overrides: MapOverrides::default(),
        }
    }
}

/// Where a set's metadata came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetSource {
    StableDump,
    LocalDump,
    Raw,
}

/// Difficulties sharing one folder.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatmapSet {
    pub set_id: i32,
    pub folder: PathBuf,
    /// Folder mtime at parse time. Only raw-loaded sets carry one; dump
    /// sets are trusted as they are.
    pub folder_mtime: Option<SystemTime>,
    pub source: SetSource,
    pub difficulties: Vec<BeatmapDifficulty>,
}

impl BeatmapSet {
    pub fn new(set_id: i32, folder: impl Into<PathBuf>, source: SetSource) -> Self {
        Self {
            set_id,
            folder: folder.into(),
            folder_mtime: None,
            source,
            difficulties: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.difficulties.is_empty()
    }
}

/// Whole seconds since the unix epoch; 0 for pre-epoch times.
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn from_unix_seconds(seconds: u64) -> Option<SystemTime> {
    (seconds > 0).then(|| UNIX_EPOCH + Duration::from_secs(seconds))
}

/// Leading decimal digits of a folder name ("123 Artist - Title" -> 123).
pub fn set_id_from_folder(folder: &Path) -> Option<i32> {
    let name = folder.file_name()?.to_str()?;
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<i32>().ok().filter(|id| *id > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_round_trip() {
        let hash = BeatmapHash::of_bytes(b"osu file format v14");
        let text = hash.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(BeatmapHash::from_hex(&text), Some(hash));
        assert_eq!(BeatmapHash::from_hex(&text.to_uppercase()), Some(hash));
    }

    #[test]
    fn hash_rejects_bad_hex() {
        assert_eq!(BeatmapHash::from_hex("abc"), None);
        assert_eq!(BeatmapHash::from_hex(&"zz".repeat(16)), None);
        // from_str_radix alone would take "+f" as 0x0f
        assert_eq!(BeatmapHash::from_hex(&"+f".repeat(16)), None);
        assert_eq!(BeatmapHash::from_hex(&format!("+f{}", "0".repeat(30))), None);
    }

    #[test]
    fn md5_of_empty_input() {
        assert_eq!(
            BeatmapHash::of_bytes(b"").to_string(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn set_id_parsed_from_folder_name() {
        assert_eq!(set_id_from_folder(Path::new("songs/39804 xi - FREEDOM DiVE")), Some(39804));
        assert_eq!(set_id_from_folder(Path::new("songs/beatmap-123")), None);
    }

    #[test]
    fn rate_mods_speed() {
        assert_eq!(Mods::empty().speed(), 1.0);
        assert_eq!((Mods::HIDDEN | Mods::NIGHTCORE).speed(), 1.5);
        assert_eq!(Mods::HALF_TIME.speed(), 0.75);
    }
}
