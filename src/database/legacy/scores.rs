//! Score dumps: osu!stable `scores.db` and the local score file.

use super::{ParseError, ticks_to_unix_seconds};
use crate::database::binary::{BinaryReader, BinaryWriter, StringPrefix};
use crate::database::models::{BeatmapHash, Mods};
use crate::database::score::{FinishedScore, Grade, PpData, ScoreMods};

pub const LOCAL_MAGIC: &[u8; 5] = b"BMCSC";
pub const VERSION_FIXED_STRINGS: u32 = 20240412;
pub const VERSION_PP_DATA: u32 = 20240805;
pub const CURRENT_VERSION: u32 = VERSION_PP_DATA;
pub const SUPPORTED_VERSIONS: [u32; 2] = [VERSION_FIXED_STRINGS, VERSION_PP_DATA];

/// Scores of one beatmap as stored in a dump.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatmapScores {
    pub hash: BeatmapHash,
    pub scores: Vec<FinishedScore>,
}

/// A `scores.db` style file read one beatmap group at a time.
/// `Ok(Some(None))` is a group that was read but holds nothing usable.
pub trait ScoreGroups {
    fn next_group(&mut self) -> Result<Option<Option<BeatmapScores>>, ParseError>;
    fn bytes_read(&self) -> usize;
}

// osu!stable scores.db

pub struct StableScoresParser<'a> {
    reader: BinaryReader<'a>,
    version: u32,
    beatmap_count: u32,
    beatmaps_read: u32,
}

impl<'a> StableScoresParser<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, ParseError> {
        let mut reader = BinaryReader::new(bytes);
        let version = reader.read_u32()?;
        let beatmap_count = reader.read_u32()?;
        Ok(Self {
            reader,
            version,
            beatmap_count,
            beatmaps_read: 0,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn position(&self) -> usize {
        self.reader.position()
    }

    /// Next beatmap group, holding only the scores worth importing
    /// (osu!standard plays with an online score id). Groups with a short
    /// hash come back as `Ok(Some(None))`.
    pub fn next_beatmap(&mut self) -> Result<Option<Option<BeatmapScores>>, ParseError> {
        if self.beatmaps_read >= self.beatmap_count {
            return Ok(None);
        }
        self.beatmaps_read += 1;

        let hash_text = self.reader.read_string(StringPrefix::Uleb128)?;
        if hash_text.len() > 32 {
            return Err(ParseError::CorruptRecord(format!(
                "beatmap hash of {} characters",
                hash_text.len()
            )));
        }
        let hash = BeatmapHash::from_hex(&hash_text);
        if hash.is_none() {
            log::warn!("DB: scores.db group {} has invalid hash {:?}", self.beatmaps_read, hash_text);
        }

        let count = self.reader.read_u32()?;
        let mut scores = Vec::new();
        for _ in 0..count {
            let (mode, mut score) = read_stable_score(&mut self.reader)?;
            if let Some(hash) = hash {
                if mode == 0 && score.bancho_score_id != 0 {
                    score.beatmap_hash = hash;
                    score.recompute_grade();
                    scores.push(score);
                }
            }
        }
        Ok(Some(hash.map(|hash| BeatmapScores { hash, scores })))
    }
}

impl ScoreGroups for StableScoresParser<'_> {
    fn next_group(&mut self) -> Result<Option<Option<BeatmapScores>>, ParseError> {
        self.next_beatmap()
    }

    fn bytes_read(&self) -> usize {
        self.position()
    }
}

fn read_stable_score(r: &mut BinaryReader<'_>) -> Result<(u8, FinishedScore), ParseError> {
    const S: StringPrefix = StringPrefix::Uleb128;

    let mode = r.read_u8()?;
    let score_version = r.read_u32()?;
    r.skip_string(S)?; // beatmap hash, already known from the group
    let player_name = r.read_string(S)?;
    r.skip_string(S)?; // replay hash

    let mut sc = FinishedScore {
        player_name,
        client: format!("peppy-{}", score_version),
        num300s: r.read_u16()?,
        num100s: r.read_u16()?,
        num50s: r.read_u16()?,
        num_gekis: r.read_u16()?,
        num_katus: r.read_u16()?,
        num_misses: r.read_u16()?,
        ..FinishedScore::default()
    };
    sc.score = r.read_i32()?.max(0) as u64;
    sc.max_combo = r.read_u16()?;
    sc.perfect = r.read_bool()?;
    sc.mods = ScoreMods::from_flags(Mods::from_bits_retain(r.read_u32()?));
    r.skip_string(S)?; // life bar graph
    sc.unix_timestamp = ticks_to_unix_seconds(r.read_u64()?);

    let replay_size = r.read_i32()?;
    if replay_size > 0 {
        r.skip(replay_size as usize)?;
    }

    sc.bancho_score_id = if score_version >= 20131110 {
        r.read_u64()?
    } else if score_version >= 20121008 {
        r.read_i32()? as u64
    } else {
        0
    };

    if sc.mods.flags.contains(Mods::TARGET) {
        r.skip(8)?; // target practice accuracy
    }
    Ok((mode, sc))
}

// Local score dump

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LocalScoresLayout {
    /// u32-prefixed strings, hex hashes, no stored pp.
    FixedStrings,
    /// ULEB128 strings, raw hashes, stored pp and max combo.
    PpData,
}

impl LocalScoresLayout {
    pub fn for_version(version: u32) -> Result<Self, ParseError> {
        match version {
            VERSION_FIXED_STRINGS..VERSION_PP_DATA => Ok(LocalScoresLayout::FixedStrings),
            VERSION_PP_DATA => Ok(LocalScoresLayout::PpData),
            _ => Err(ParseError::UnsupportedFormatVersion {
                format: "scores.db",
                version,
                newest: CURRENT_VERSION,
            }),
        }
    }

    fn strings(self) -> StringPrefix {
        match self {
            LocalScoresLayout::FixedStrings => StringPrefix::FixedU32,
            LocalScoresLayout::PpData => StringPrefix::Uleb128,
        }
    }
}

pub struct LocalScoresParser<'a> {
    reader: BinaryReader<'a>,
    layout: LocalScoresLayout,
    beatmap_count: u32,
    score_count: u32,
    beatmaps_read: u32,
}

impl<'a> LocalScoresParser<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, ParseError> {
        let mut reader = BinaryReader::new(bytes);
        if reader.read_bytes(LOCAL_MAGIC.len())? != LOCAL_MAGIC {
            return Err(ParseError::InvalidMagic("scores.db"));
        }
        let layout = LocalScoresLayout::for_version(reader.read_u32()?)?;
        let beatmap_count = reader.read_u32()?;
        let score_count = reader.read_u32()?;
        Ok(Self {
            reader,
            layout,
            beatmap_count,
            score_count,
            beatmaps_read: 0,
        })
    }

    /// Score total announced by the header.
    pub fn score_count(&self) -> u32 {
        self.score_count
    }

    pub fn position(&self) -> usize {
        self.reader.position()
    }

    pub fn next_beatmap(&mut self) -> Result<Option<BeatmapScores>, ParseError> {
        if self.beatmaps_read >= self.beatmap_count {
            return Ok(None);
        }
        let hash = match self.layout {
            LocalScoresLayout::FixedStrings => self.reader.read_hash_string(StringPrefix::FixedU32)?,
            LocalScoresLayout::PpData => self.reader.read_raw_hash()?,
        };
        let count = self.reader.read_u32()?;
        let mut scores = Vec::with_capacity((count as usize).min(self.reader.remaining() / 64));
        for _ in 0..count {
            let mut score = read_local_score(&mut self.reader, self.layout)?;
            score.beatmap_hash = hash;
            scores.push(score);
        }
        self.beatmaps_read += 1;
        Ok(Some(BeatmapScores { hash, scores }))
    }
}

fn read_local_score(
    r: &mut BinaryReader<'_>,
    layout: LocalScoresLayout,
) -> Result<FinishedScore, ParseError> {
    let s = layout.strings();
    let mut sc = FinishedScore {
        mods: ScoreMods {
            flags: Mods::from_bits_retain(r.read_u32()?),
            speed: r.read_f32()?,
            ar_override: r.read_f32()?,
            cs_override: r.read_f32()?,
            od_override: r.read_f32()?,
            hp_override: r.read_f32()?,
        },
        ..FinishedScore::default()
    };
    sc.score = r.read_u64()?;
    sc.unix_timestamp = r.read_u64()?;
    sc.player_id = r.read_i32()?;
    sc.player_name = r.read_string(s)?;
    sc.grade = Grade::from_u8(r.read_u8()?);
    sc.client = r.read_string(s)?;
    sc.bancho_score_id = r.read_u64()?;
    sc.num300s = r.read_u16()?;
    sc.num100s = r.read_u16()?;
    sc.num50s = r.read_u16()?;
    sc.num_gekis = r.read_u16()?;
    sc.num_katus = r.read_u16()?;
    sc.num_misses = r.read_u16()?;
    sc.max_combo = r.read_u16()?;
    sc.perfect = r.read_bool()?;

    if layout >= LocalScoresLayout::PpData {
        sc.pp = PpData {
            version: r.read_u32()?,
            pp: r.read_f32()?,
            total_stars: r.read_f32()?,
            aim_stars: r.read_f32()?,
            speed_stars: r.read_f32()?,
        };
        sc.max_possible_combo = r.read_u32()?;
    }
    Ok(sc)
}

pub fn decode_local(bytes: &[u8]) -> Result<Vec<BeatmapScores>, ParseError> {
    let mut parser = LocalScoresParser::new(bytes)?;
    let mut groups = Vec::new();
    while let Some(group) = parser.next_beatmap()? {
        groups.push(group);
    }
    Ok(groups)
}

pub fn encode_local(groups: &[BeatmapScores], version: u32) -> Result<Vec<u8>, ParseError> {
    let layout = LocalScoresLayout::for_version(version)?;
    let s = layout.strings();

    let mut w = BinaryWriter::new();
    w.write_bytes(LOCAL_MAGIC);
    w.write_u32(version);
    w.write_u32(groups.len() as u32);
    w.write_u32(groups.iter().map(|g| g.scores.len() as u32).sum());

    for group in groups {
        match layout {
            LocalScoresLayout::FixedStrings => w.write_hash_string(&group.hash, s),
            LocalScoresLayout::PpData => w.write_raw_hash(&group.hash),
        }
        w.write_u32(group.scores.len() as u32);
        for sc in &group.scores {
            w.write_u32(sc.mods.flags.bits());
            w.write_f32(sc.mods.speed);
            w.write_f32(sc.mods.ar_override);
            w.write_f32(sc.mods.cs_override);
            w.write_f32(sc.mods.od_override);
            w.write_f32(sc.mods.hp_override);
            w.write_u64(sc.score);
            w.write_u64(sc.unix_timestamp);
            w.write_i32(sc.player_id);
            w.write_string(&sc.player_name, s);
            w.write_u8(sc.grade.as_u8());
            w.write_string(&sc.client, s);
            w.write_u64(sc.bancho_score_id);
            w.write_u16(sc.num300s);
            w.write_u16(sc.num100s);
            w.write_u16(sc.num50s);
            w.write_u16(sc.num_gekis);
            w.write_u16(sc.num_katus);
            w.write_u16(sc.num_misses);
            w.write_u16(sc.max_combo);
            w.write_bool(sc.perfect);
            if layout >= LocalScoresLayout::PpData {
                w.write_u32(sc.pp.version);
                w.write_f32(sc.pp.pp);
                w.write_f32(sc.pp.total_stars);
                w.write_f32(sc.pp.aim_stars);
                w.write_f32(sc.pp.speed_stars);
                w.write_u32(sc.max_possible_combo);
            }
        }
    }
    Ok(w.into_bytes())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::legacy::unix_seconds_to_ticks;

    pub(crate) fn sample_score(hash: BeatmapHash, timestamp: u64, n300: u16) -> FinishedScore {
        let mut sc = FinishedScore {
            beatmap_hash: hash,
            unix_timestamp: timestamp,
            player_id: 42,
            player_name: "player".into(),
            client: "beatmap-core-0.1.0".into(),
            num300s: n300,
            num100s: 3,
            num50s: 1,
            num_misses: 0,
            score: 1_234_567,
            max_combo: 600,
            mods: ScoreMods::from_flags(Mods::HIDDEN | Mods::DOUBLE_TIME),
            pp: PpData {
                version: 20240805,
                pp: 321.5,
                total_stars: 6.2,
                aim_stars: 3.1,
                speed_stars: 2.9,
            },
            max_possible_combo: 650,
            ..FinishedScore::default()
        };
        sc.recompute_grade();
        sc
    }

    fn groups() -> Vec<BeatmapScores> {
        (0..3u8)
            .map(|i| {
                let hash = BeatmapHash([i + 1; 16]);
                BeatmapScores {
                    hash,
                    scores: (0..2).map(|s| sample_score(hash, 1_700_000_000 + s, 400)).collect(),
                }
            })
            .collect()
    }

    #[test]
    fn local_dump_re_encodes_identically() {
        let groups = groups();
        for version in SUPPORTED_VERSIONS {
            let first = encode_local(&groups, version).unwrap();
            let decoded = decode_local(&first).unwrap();
            assert_eq!(encode_local(&decoded, version).unwrap(), first, "version {}", version);
        }
        let current = decode_local(&encode_local(&groups, CURRENT_VERSION).unwrap()).unwrap();
        assert_eq!(current, groups);
    }

    #[test]
    fn old_layout_has_no_pp() {
        let bytes = encode_local(&groups(), VERSION_FIXED_STRINGS).unwrap();
        let decoded = decode_local(&bytes).unwrap();
        assert_eq!(decoded[0].scores[0].pp, PpData::default());
        assert_eq!(decoded[0].scores[0].max_possible_combo, 0);
    }

    #[test]
    fn bad_magic_and_version() {
        assert_eq!(
            decode_local(b"NOPE!\0\0\0\0").unwrap_err(),
            ParseError::InvalidMagic("scores.db")
        );
        let mut w = BinaryWriter::new();
        w.write_bytes(LOCAL_MAGIC);
        w.write_u32(CURRENT_VERSION + 1);
        assert!(matches!(
            decode_local(&w.into_bytes()).unwrap_err(),
            ParseError::UnsupportedFormatVersion { .. }
        ));
    }

    fn write_stable_score(w: &mut BinaryWriter, mode: u8, version: u32, score_id: u64, mods: u32) {
        const S: StringPrefix = StringPrefix::Uleb128;
        w.write_u8(mode);
        w.write_u32(version);
        w.write_string("0123456789abcdef0123456789abcdef", S);
        w.write_string("peppy", S);
        w.write_string("", S);
        for count in [300u16, 5, 0, 40, 2, 1] {
            w.write_u16(count);
        }
        w.write_i32(5_000_000);
        w.write_u16(700);
        w.write_bool(false);
        w.write_u32(mods);
        w.write_string("", S);
        w.write_u64(unix_seconds_to_ticks(1_500_000_000 + score_id));
        w.write_i32(-1);
        if version >= 20131110 {
            w.write_u64(score_id);
        } else if version >= 20121008 {
            w.write_i32(score_id as i32);
        }
        if mods & Mods::TARGET.bits() != 0 {
            w.write_f64(0.98);
        }
    }

    #[test]
    fn stable_import_filters_mode_and_offline_scores() {
        let mut w = BinaryWriter::new();
        w.write_u32(20240101);
        w.write_u32(2);

        w.write_string("0123456789abcdef0123456789abcdef", StringPrefix::Uleb128);
        w.write_u32(4);
        write_stable_score(&mut w, 0, 20240101, 11, 0);
        write_stable_score(&mut w, 1, 20240101, 12, 0); // taiko
        write_stable_score(&mut w, 0, 20240101, 0, 0); // offline
        write_stable_score(&mut w, 0, 20240101, 13, Mods::TARGET.bits());

        w.write_string("short", StringPrefix::Uleb128);
        w.write_u32(1);
        write_stable_score(&mut w, 0, 20120101, 14, 0);
        let bytes = w.into_bytes();

        let mut parser = StableScoresParser::new(&bytes).unwrap();
        let first = parser.next_beatmap().unwrap().unwrap().unwrap();
        assert_eq!(first.scores.len(), 2);
        assert_eq!(first.scores[0].unix_timestamp, 1_500_000_011);
        assert_eq!(first.scores[0].client, "peppy-20240101");
        assert_eq!(first.scores[0].grade, Grade::A);
        assert_eq!(first.scores[1].bancho_score_id, 13);

        assert_eq!(parser.next_beatmap().unwrap(), Some(None));
        assert_eq!(parser.next_beatmap().unwrap(), None);
        assert_eq!(parser.position(), bytes.len());
    }

    #[test]
    fn overlong_hash_stops_import() {
        let mut w = BinaryWriter::new();
        w.write_u32(20240101);
        w.write_u32(1);
        w.write_string(&"a".repeat(40), StringPrefix::Uleb128);
        let bytes = w.into_bytes();
        let mut parser = StableScoresParser::new(&bytes).unwrap();
        assert!(matches!(parser.next_beatmap(), Err(ParseError::CorruptRecord(_))));
    }
}
