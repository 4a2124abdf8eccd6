//! `scores.db` files written by McOsu and by early neosu builds.
//!
//! Both use the stable file name and start with a bare version integer, so
//! [`detect`] tells them apart from osu!stable's `scores.db` and from the
//! local dump before anything is parsed.

use super::ParseError;
use super::scores::{BeatmapScores, LOCAL_MAGIC, ScoreGroups};
use crate::database::binary::{BinaryReader, STRING_PRESENT, StringPrefix};
use crate::database::models::{BeatmapHash, Mods};
use crate::database::score::{FinishedScore, PpData, ScoreMods};

const S: StringPrefix = StringPrefix::Uleb128;

pub const MCOSU_VERSION_FIRST: u32 = 20210103;
pub const MCOSU_VERSIONS: [u32; 4] = [MCOSU_VERSION_FIRST, 20210106, 20210108, 20210110];

/// pp version assigned to imported scores. Older than any algorithm this
/// crate computes, so their pp is treated as unknown until recalculated.
pub const IMPORTED_PP_VERSION: u32 = 20220902;

/// Scores written before this version lack the max combo triple.
const SCORE_VERSION_MAX_COMBO: i32 = 20180722;
/// From this score version on, the mode byte of McOsu scores is an
/// "imported from stable" flag instead.
const SCORE_VERSION_IMPORT_FLAG: i32 = 20190103;

const OLD_NEOSU_CLIENT: &str = "neosu-win64-release-35.10";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoresDbKind {
    Stable,
    McOsu,
    OldNeosu,
    Local,
}

/// Guesses which client wrote a `scores.db`. `None` for empty files and
/// for files without a single score to look at.
pub fn detect(bytes: &[u8]) -> Result<Option<ScoresDbKind>, ParseError> {
    if bytes.starts_with(LOCAL_MAGIC) {
        return Ok(Some(ScoresDbKind::Local));
    }
    let mut r = BinaryReader::new(bytes);
    let version = r.read_u32()?;
    if version == 0 {
        return Ok(None);
    }
    if MCOSU_VERSIONS.contains(&version) {
        return Ok(Some(ScoresDbKind::McOsu));
    }

    let beatmap_count = r.read_u32()?;
    for _ in 0..beatmap_count {
        r.skip_string(S)?;
        if r.read_u32()? == 0 {
            continue;
        }
        r.skip(1 + 4)?; // mode, score version
        // osu!stable repeats the beatmap hash here as a 32 character string;
        // old neosu stores the play timestamp.
        let next = r.read_bytes(2)?;
        return Ok(Some(if next == [STRING_PRESENT, 32] {
            ScoresDbKind::Stable
        } else {
            ScoresDbKind::OldNeosu
        }));
    }
    Ok(None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    McOsu,
    OldNeosu,
}

pub struct McOsuScoresParser<'a> {
    reader: BinaryReader<'a>,
    layout: Layout,
    version: u32,
    beatmap_count: u32,
    beatmaps_read: u32,
}

impl<'a> McOsuScoresParser<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, ParseError> {
        let mut reader = BinaryReader::new(bytes);
        let version = reader.read_u32()?;
        if version == 0 {
            return Err(ParseError::CorruptRecord("scores.db version 0".into()));
        }
        let layout = if MCOSU_VERSIONS.contains(&version) {
            Layout::McOsu
        } else {
            Layout::OldNeosu
        };
        let beatmap_count = reader.read_u32()?;
        Ok(Self {
            reader,
            layout,
            version,
            beatmap_count,
            beatmaps_read: 0,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_mcosu(&self) -> bool {
        self.layout == Layout::McOsu
    }

    pub fn position(&self) -> usize {
        self.reader.position()
    }

    /// Same contract as the stable parser: `Ok(Some(None))` for a group
    /// whose hash is too short to use, an error once the hash is too long
    /// to trust the rest of the file.
    pub fn next_beatmap(&mut self) -> Result<Option<Option<BeatmapScores>>, ParseError> {
        if self.beatmaps_read >= self.beatmap_count {
            return Ok(None);
        }
        self.beatmaps_read += 1;

        let hash_text = self.reader.read_string(S)?;
        if hash_text.len() > 32 {
            return Err(ParseError::CorruptRecord(format!(
                "beatmap hash of {} characters",
                hash_text.len()
            )));
        }
        let hash = BeatmapHash::from_hex(&hash_text);
        if hash.is_none() {
            log::warn!("DB: McOsu scores.db group {} has invalid hash {:?}", self.beatmaps_read, hash_text);
        }

        let count = self.reader.read_u32()?;
        let mut scores = Vec::new();
        for _ in 0..count {
            let score = match self.layout {
                Layout::McOsu => read_mcosu_score(&mut self.reader, self.version)?,
                Layout::OldNeosu => Some(read_old_neosu_score(&mut self.reader)?),
            };
            if let (Some(hash), Some(mut score)) = (hash, score) {
                score.beatmap_hash = hash;
                score.recompute_grade();
                scores.push(score);
            }
        }
        Ok(Some(hash.map(|hash| BeatmapScores { hash, scores })))
    }
}

impl ScoreGroups for McOsuScoresParser<'_> {
    fn next_group(&mut self) -> Result<Option<Option<BeatmapScores>>, ParseError> {
        self.next_beatmap()
    }

    fn bytes_read(&self) -> usize {
        self.position()
    }
}

struct Counts {
    n300: u16,
    n100: u16,
    n50: u16,
    gekis: u16,
    katus: u16,
    misses: u16,
}

fn read_counts(r: &mut BinaryReader<'_>) -> Result<Counts, ParseError> {
    Ok(Counts {
        n300: r.read_u16()?,
        n100: r.read_u16()?,
        n50: r.read_u16()?,
        gekis: r.read_u16()?,
        katus: r.read_u16()?,
        misses: r.read_u16()?,
    })
}

fn base_score(player_name: String, counts: Counts, unix_timestamp: u64) -> FinishedScore {
    FinishedScore {
        unix_timestamp,
        player_name,
        num300s: counts.n300,
        num100s: counts.n100,
        num50s: counts.n50,
        num_gekis: counts.gekis,
        num_katus: counts.katus,
        num_misses: counts.misses,
        ..FinishedScore::default()
    }
}

/// The tail both layouts share: pp, hit error stats, stars, then the
/// speed and difficulty values the play used.
fn read_pp_and_mods(r: &mut BinaryReader<'_>, sc: &mut FinishedScore, flags: Mods) -> Result<(), ParseError> {
    r.skip(2)?; // slider breaks
    let pp = r.read_f32()?;
    r.skip(3 * 4)?; // unstable rate, hit error min and max
    sc.pp = PpData {
        version: IMPORTED_PP_VERSION,
        pp,
        total_stars: r.read_f32()?,
        aim_stars: r.read_f32()?,
        speed_stars: r.read_f32()?,
    };
    sc.mods = ScoreMods {
        flags,
        speed: r.read_f32()?,
        cs_override: r.read_f32()?,
        ar_override: r.read_f32()?,
        od_override: r.read_f32()?,
        hp_override: r.read_f32()?,
    };
    Ok(())
}

/// `None` for plays of other game modes.
fn read_mcosu_score(r: &mut BinaryReader<'_>, db_version: u32) -> Result<Option<FinishedScore>, ParseError> {
    let mode = r.read_u8()?;
    let score_version = r.read_i32()?;
    if db_version == MCOSU_VERSION_FIRST && score_version > SCORE_VERSION_IMPORT_FLAG {
        r.skip(1)?;
    }
    let unix_timestamp = r.read_u64()?;
    let player_name = r.read_string(S)?;
    let counts = read_counts(r)?;

    let mut sc = base_score(player_name, counts, unix_timestamp);
    sc.score = r.read_i64()?.max(0) as u64;
    sc.max_combo = r.read_u16()?;
    let flags = Mods::from_bits_retain(r.read_u32()?);
    read_pp_and_mods(r, &mut sc, flags)?;

    if score_version > SCORE_VERSION_MAX_COMBO {
        let max_possible = r.read_i32()?;
        r.skip(2 * 4)?; // hit object and circle counts
        sc.max_possible_combo = max_possible.max(0) as u32;
    }
    r.skip_string(S)?; // experimental mod names

    sc.perfect = sc.max_possible_combo > 0 && sc.max_combo > 0 && u32::from(sc.max_combo) >= sc.max_possible_combo;
    sc.client = format!("mcosu-{}", score_version);

    let imported_flag = db_version > MCOSU_VERSION_FIRST && score_version > SCORE_VERSION_IMPORT_FLAG;
    Ok((mode == 0 || imported_flag).then_some(sc))
}

fn read_old_neosu_score(r: &mut BinaryReader<'_>) -> Result<FinishedScore, ParseError> {
    r.skip(1 + 4)?; // mode (always standard), score version
    let unix_timestamp = r.read_u64()?;
    let player_name = r.read_string(S)?;
    let counts = read_counts(r)?;

    let mut sc = base_score(player_name, counts, unix_timestamp);
    sc.score = r.read_u64()?;
    sc.max_combo = r.read_u16()?;
    let flags = Mods::from_bits_retain(r.read_u32()?);
    read_pp_and_mods(r, &mut sc, flags)?;

    sc.max_possible_combo = r.read_u32()?;
    r.skip(2 * 4)?; // hit object and circle counts
    sc.bancho_score_id = u64::from(r.read_u32()?);
    r.skip_string(S)?; // server
    r.skip_string(S)?; // experimental mod names

    sc.perfect = u32::from(sc.max_combo) >= sc.max_possible_combo;
    sc.client = OLD_NEOSU_CLIENT.to_string();
    Ok(sc)
}
