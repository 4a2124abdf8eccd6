//! Finished plays and the grade/accuracy rules derived from their counts.

use crate::database::models::{BeatmapHash, Mods};
use crate::difficulty::leaderboard::PP_ALGORITHM_VERSION;
use serde::Deserialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Grade {
    XH,
    SH,
    X,
    S,
    A,
    B,
    C,
    D,
    F,
    N,
}

impl Grade {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Grade {
        match value {
            0 => Grade::XH,
            1 => Grade::SH,
            2 => Grade::X,
            3 => Grade::S,
            4 => Grade::A,
            5 => Grade::B,
            6 => Grade::C,
            7 => Grade::D,
            8 => Grade::F,
            _ => Grade::N,
        }
    }
}

/// Stored difficulty/performance values for a score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpData {
    /// Version of the pp algorithm that produced `pp`; 0 when never computed.
    pub version: u32,
    pub pp: f32,
    pub total_stars: f32,
    pub aim_stars: f32,
    pub speed_stars: f32,
}

impl Default for PpData {
    fn default() -> Self {
        Self {
            version: 0,
            pp: -1.0,
            total_stars: -1.0,
            aim_stars: -1.0,
            speed_stars: -1.0,
        }
    }
}

/// Per-play modifiers. Override floats are negative when unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreMods {
    pub flags: Mods,
    pub speed: f32,
    pub ar_override: f32,
    pub cs_override: f32,
    pub od_override: f32,
    pub hp_override: f32,
}

impl ScoreMods {
    pub fn from_flags(flags: Mods) -> Self {
        Self {
            flags,
            speed: flags.speed(),
            ar_override: -1.0,
            cs_override: -1.0,
            od_override: -1.0,
            hp_override: -1.0,
        }
    }

    pub fn uses_relax_or_autopilot(&self) -> bool {
        self.flags.intersects(Mods::RELAX | Mods::AUTOPILOT)
    }
}

impl Default for ScoreMods {
    fn default() -> Self {
        Self::from_flags(Mods::empty())
    }
}

/// One completed play. Identity is (beatmap hash, unix timestamp).
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedScore {
    pub beatmap_hash: BeatmapHash,
    pub unix_timestamp: u64,
    pub player_id: i32,
    pub player_name: String,
    pub client: String,

    pub num300s: u16,
    pub num100s: u16,
    pub num50s: u16,
    pub num_gekis: u16,
    pub num_katus: u16,
    pub num_misses: u16,

    pub score: u64,
    pub max_combo: u16,
    pub perfect: bool,
    pub mods: ScoreMods,
    pub grade: Grade,

    /// Online score id; 0 for local plays.
    pub bancho_score_id: u64,
    pub pp: PpData,
    /// Best combo the map allows; 0 when unknown.
    pub max_possible_combo: u32,
}

impl Default for FinishedScore {
    fn default() -> Self {
        Self {
            beatmap_hash: BeatmapHash::default(),
            unix_timestamp: 0,
            player_id: 0,
            player_name: String::new(),
            client: String::new(),
            num300s: 0,
            num100s: 0,
            num50s: 0,
            num_gekis: 0,
            num_katus: 0,
            num_misses: 0,
            score: 0,
            max_combo: 0,
            perfect: false,
            mods: ScoreMods::default(),
            grade: Grade::N,
            bancho_score_id: 0,
            pp: PpData::default(),
            max_possible_combo: 0,
        }
    }
}

impl FinishedScore {
    pub fn accuracy(&self) -> f32 {
        calculate_accuracy(self.num300s, self.num100s, self.num50s, self.num_misses)
    }

    /// Stored pp, or -1 when it was computed by an older algorithm.
    pub fn pp(&self) -> f32 {
        if self.pp.version < PP_ALGORITHM_VERSION {
            return -1.0;
        }
        self.pp.pp
    }

    pub fn recompute_grade(&mut self) {
        self.grade = calculate_grade(
            self.num300s,
            self.num100s,
            self.num50s,
            self.num_misses,
            self.mods.flags,
        );
    }
}

/// Standard osu! accuracy in [0, 1].
pub fn calculate_accuracy(n300: u16, n100: u16, n50: u16, misses: u16) -> f32 {
    let total = f32::from(misses) + f32::from(n50) + f32::from(n100) + f32::from(n300);
    if total <= 0.0 {
        return 0.0;
    }
    let weighted = f32::from(n50) / 6.0 + f32::from(n100) * 2.0 / 6.0 + f32::from(n300);
    weighted / total
}

pub fn calculate_grade(n300: u16, n100: u16, n50: u16, misses: u16, mods: Mods) -> Grade {
    let total = f32::from(n300) + f32::from(n100) + f32::from(n50) + f32::from(misses);
    if total <= 0.0 {
        return Grade::N;
    }

    let ratio300 = f32::from(n300) / total;
    let ratio50 = f32::from(n50) / total;
    let no_miss = misses == 0;
    let silver = mods.intersects(Mods::HIDDEN | Mods::FLASHLIGHT);

    let mut grade = Grade::D;
    if ratio300 > 0.6 {
        grade = Grade::C;
    }
    if (ratio300 > 0.7 && no_miss) || ratio300 > 0.8 {
        grade = Grade::B;
    }
    if (ratio300 > 0.8 && no_miss) || ratio300 > 0.9 {
        grade = Grade::A;
    }
    if ratio300 > 0.9 && ratio50 <= 0.01 && no_miss {
        grade = if silver { Grade::SH } else { Grade::S };
    }
    if no_miss && n100 == 0 && n50 == 0 {
        grade = if silver { Grade::XH } else { Grade::X };
    }
    grade
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSortMethod {
    Accuracy,
    Combo,
    Date,
    Misses,
    #[default]
    Score,
    Pp,
}

fn by_tiebreak(a: &FinishedScore, b: &FinishedScore) -> Ordering {
    b.score
        .cmp(&a.score)
        .then(b.unix_timestamp.cmp(&a.unix_timestamp))
        .then(b.player_id.cmp(&a.player_id))
}

impl ScoreSortMethod {
    /// Ordering with the "best" score first.
    pub fn compare(self, a: &FinishedScore, b: &FinishedScore) -> Ordering {
        match self {
            ScoreSortMethod::Score => by_tiebreak(a, b),
            ScoreSortMethod::Combo => b.max_combo.cmp(&a.max_combo).then(by_tiebreak(a, b)),
            ScoreSortMethod::Date => b
                .unix_timestamp
                .cmp(&a.unix_timestamp)
                .then(b.player_id.cmp(&a.player_id)),
            ScoreSortMethod::Misses => a.num_misses.cmp(&b.num_misses).then(by_tiebreak(a, b)),
            ScoreSortMethod::Accuracy => b
                .accuracy()
                .total_cmp(&a.accuracy())
                .then(by_tiebreak(a, b)),
            ScoreSortMethod::Pp => {
                let pp_a = a.pp().max(0.0);
                let pp_b = b.pp().max(0.0);
                pp_b.total_cmp(&pp_a).then(by_tiebreak(a, b))
            }
        }
    }
}
