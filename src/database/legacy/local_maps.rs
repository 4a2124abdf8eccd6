//! The client's own beatmap dump (`maps.db`).
//!
//! Holds every set that did not come from `osu!.db` plus a table of
//! per-difficulty overrides for the ones that did, so offsets and computed
//! metrics on stable maps survive a restart.

use super::ParseError;
use crate::database::binary::{BinaryReader, BinaryWriter, StringPrefix};
use crate::database::models::{
    BeatmapDifficulty, BeatmapHash, BeatmapSet, BpmInfo, GameMode, MapOverrides, SetSource,
    from_unix_seconds, unix_seconds,
};

const S: StringPrefix = StringPrefix::Uleb128;

pub const VERSION_INITIAL: u32 = 20240410;
pub const VERSION_ONLINE_OFFSET: u32 = 20240625;
pub const VERSION_DRAW_BACKGROUND: u32 = 20240703;
pub const VERSION_LOUDNESS: u32 = 20240812;
pub const VERSION_UNICODE: u32 = 20250801;
pub const CURRENT_VERSION: u32 = VERSION_UNICODE;

pub const SUPPORTED_VERSIONS: [u32; 5] = [
    VERSION_INITIAL,
    VERSION_ONLINE_OFFSET,
    VERSION_DRAW_BACKGROUND,
    VERSION_LOUDNESS,
    VERSION_UNICODE,
];

/// Per-version field layout. Later layouts are supersets of earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LocalMapsLayout {
    /// Timing point list per difficulty, no online offset.
    Initial,
    /// Adds the online offset.
    OnlineOffset,
    /// Adds the draw-background flag.
    DrawBackground,
    /// Drops timing points, adds loudness and the overrides table.
    Loudness,
    /// Adds unicode title and artist.
    Unicode,
}

impl LocalMapsLayout {
    pub fn for_version(version: u32) -> Result<Self, ParseError> {
        match version {
            VERSION_INITIAL..VERSION_ONLINE_OFFSET => Ok(LocalMapsLayout::Initial),
            VERSION_ONLINE_OFFSET..VERSION_DRAW_BACKGROUND => Ok(LocalMapsLayout::OnlineOffset),
            VERSION_DRAW_BACKGROUND..VERSION_LOUDNESS => Ok(LocalMapsLayout::DrawBackground),
            VERSION_LOUDNESS..VERSION_UNICODE => Ok(LocalMapsLayout::Loudness),
            VERSION_UNICODE => Ok(LocalMapsLayout::Unicode),
            _ => Err(ParseError::UnsupportedFormatVersion {
                format: "maps.db",
                version,
                newest: CURRENT_VERSION,
            }),
        }
    }
}

/// Metrics and overrides kept for a difficulty owned by another dump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverrideEntry {
    pub hash: BeatmapHash,
    pub overrides: MapOverrides,
    pub stars_nomod: f64,
    pub bpm: BpmInfo,
}

impl OverrideEntry {
    pub fn from_difficulty(diff: &BeatmapDifficulty) -> Self {
        Self {
            hash: diff.hash,
            overrides: diff.overrides,
            stars_nomod: diff.stars_nomod,
            bpm: diff.bpm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalMapsDump {
    pub sets: Vec<BeatmapSet>,
    pub overrides: Vec<OverrideEntry>,
}

/// Streaming decoder: sets are handed out one at a time so the loader can
/// check for cancellation and publish progress between them.
pub struct LocalMapsParser<'a> {
    reader: BinaryReader<'a>,
    layout: LocalMapsLayout,
    version: u32,
    set_count: u32,
    sets_read: u32,
}

impl<'a> LocalMapsParser<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, ParseError> {
        let mut reader = BinaryReader::new(bytes);
        let version = reader.read_u32()?;
        let layout = LocalMapsLayout::for_version(version)?;
        let set_count = reader.read_u32()?;
        Ok(Self {
            reader,
            layout,
            version,
            set_count,
            sets_read: 0,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn set_count(&self) -> u32 {
        self.set_count
    }

    pub fn position(&self) -> usize {
        self.reader.position()
    }

    pub fn next_set(&mut self) -> Result<Option<BeatmapSet>, ParseError> {
        if self.sets_read >= self.set_count {
            return Ok(None);
        }
        let set = read_set(&mut self.reader, self.layout)?;
        self.sets_read += 1;
        Ok(Some(set))
    }

    /// Reads the overrides table. Must be called after every set was read.
    pub fn overrides(&mut self) -> Result<Vec<OverrideEntry>, ParseError> {
        if self.layout < LocalMapsLayout::Loudness {
            return Ok(Vec::new());
        }
        let count = self.reader.read_u32()?;
        let mut entries = Vec::with_capacity((count as usize).min(self.reader.remaining() / 40));
        for _ in 0..count {
            entries.push(read_override(&mut self.reader)?);
        }
        Ok(entries)
    }
}

fn read_set(r: &mut BinaryReader<'_>, layout: LocalMapsLayout) -> Result<BeatmapSet, ParseError> {
    let set_id = r.read_i32()?;
    let folder = r.read_string(S)?;
    let mtime = r.read_u64()?;
    let diff_count = r.read_u16()?;

    let mut set = BeatmapSet::new(set_id, folder, SetSource::LocalDump);
    set.folder_mtime = from_unix_seconds(mtime);
    for _ in 0..diff_count {
        let diff = read_difficulty(r, layout, &set)?;
        set.difficulties.push(diff);
    }
    Ok(set)
}

fn read_difficulty(
    r: &mut BinaryReader<'_>,
    layout: LocalMapsLayout,
    set: &BeatmapSet,
) -> Result<BeatmapDifficulty, ParseError> {
    let mut d = BeatmapDifficulty {
        set_id: set.set_id,
        folder: set.folder.clone(),
        ..BeatmapDifficulty::default()
    };

    d.osu_file = r.read_string(S)?;
    d.id = r.read_i32()?;
    d.title = r.read_string(S)?;
    d.audio_file = r.read_string(S)?;
    d.length_ms = r.read_i32()?.max(0) as u32;
    d.stack_leniency = r.read_f32()?;
    d.artist = r.read_string(S)?;
    d.creator = r.read_string(S)?;
    d.difficulty_name = r.read_string(S)?;
    d.source = r.read_string(S)?;
    d.tags = r.read_string(S)?;
    d.hash = r.read_hash_string(S)?;
    d.ar = r.read_f32()?;
    d.cs = r.read_f32()?;
    d.hp = r.read_f32()?;
    d.od = r.read_f32()?;
    d.slider_multiplier = r.read_f64()?;
    d.mode = GameMode::from_u8(r.read_u8()?).unwrap_or_default();
    d.preview_time = r.read_u32()?;
    d.last_modification = r.read_u64()?;

    d.overrides.local_offset = r.read_i16()?;
    if layout >= LocalMapsLayout::OnlineOffset {
        d.overrides.online_offset = r.read_i16()?;
    }

    d.circles = r.read_u16()?;
    d.sliders = r.read_u16()?;
    d.spinners = r.read_u16()?;
    d.stars_nomod = r.read_f64()?;
    d.bpm = BpmInfo {
        min: r.read_i32()?,
        max: r.read_i32()?,
        most_common: r.read_i32()?,
    };

    if layout < LocalMapsLayout::Loudness {
        let points = r.read_u32()? as usize;
        r.skip(points.saturating_mul(17))?;
    }
    if layout >= LocalMapsLayout::DrawBackground {
        d.overrides.draw_background = r.read_bool()?;
    }
    if layout >= LocalMapsLayout::Loudness {
        d.overrides.loudness = r.read_f32()?;
    }
    if layout >= LocalMapsLayout::Unicode {
        d.title_unicode = r.read_string(S)?;
        d.artist_unicode = r.read_string(S)?;
    } else {
        d.title_unicode = d.title.clone();
        d.artist_unicode = d.artist.clone();
    }
    Ok(d)
}

fn read_override(r: &mut BinaryReader<'_>) -> Result<OverrideEntry, ParseError> {
    let hash = r.read_hash_string(S)?;
    let local_offset = r.read_i16()?;
    let online_offset = r.read_i16()?;
    let stars_nomod = r.read_f64()?;
    let loudness = r.read_f32()?;
    let bpm = BpmInfo {
        min: r.read_i32()?,
        max: r.read_i32()?,
        most_common: r.read_i32()?,
    };
    let draw_background = r.read_bool()?;
    Ok(OverrideEntry {
        hash,
        overrides: MapOverrides {
            local_offset,
            online_offset,
            loudness,
            draw_background,
        },
        stars_nomod,
        bpm,
    })
}

/// Decodes a whole dump in one go.
pub fn decode(bytes: &[u8]) -> Result<LocalMapsDump, ParseError> {
    let mut parser = LocalMapsParser::new(bytes)?;
    let mut dump = LocalMapsDump::default();
    while let Some(set) = parser.next_set()? {
        dump.sets.push(set);
    }
    dump.overrides = parser.overrides()?;
    Ok(dump)
}

pub fn encode(dump: &LocalMapsDump, version: u32) -> Result<Vec<u8>, ParseError> {
    let layout = LocalMapsLayout::for_version(version)?;
    let mut w = BinaryWriter::new();
    w.write_u32(version);
    w.write_u32(dump.sets.len() as u32);

    for set in &dump.sets {
        w.write_i32(set.set_id);
        w.write_string(&set.folder.to_string_lossy(), S);
        w.write_u64(set.folder_mtime.map_or(0, unix_seconds));
        w.write_u16(set.difficulties.len().min(usize::from(u16::MAX)) as u16);
        for d in set.difficulties.iter().take(usize::from(u16::MAX)) {
            write_difficulty(&mut w, layout, d);
        }
    }

    if layout >= LocalMapsLayout::Loudness {
        w.write_u32(dump.overrides.len() as u32);
        for entry in &dump.overrides {
            w.write_hash_string(&entry.hash, S);
            w.write_i16(entry.overrides.local_offset);
            w.write_i16(entry.overrides.online_offset);
            w.write_f64(entry.stars_nomod);
            w.write_f32(entry.overrides.loudness);
            w.write_i32(entry.bpm.min);
            w.write_i32(entry.bpm.max);
            w.write_i32(entry.bpm.most_common);
            w.write_bool(entry.overrides.draw_background);
        }
    }
    Ok(w.into_bytes())
}

fn write_difficulty(w: &mut BinaryWriter, layout: LocalMapsLayout, d: &BeatmapDifficulty) {
    w.write_string(&d.osu_file, S);
    w.write_i32(d.id);
    w.write_string(&d.title, S);
    w.write_string(&d.audio_file, S);
    w.write_i32(d.length_ms.min(i32::MAX as u32) as i32);
    w.write_f32(d.stack_leniency);
    w.write_string(&d.artist, S);
    w.write_string(&d.creator, S);
    w.write_string(&d.difficulty_name, S);
    w.write_string(&d.source, S);
    w.write_string(&d.tags, S);
    w.write_hash_string(&d.hash, S);
    w.write_f32(d.ar);
    w.write_f32(d.cs);
    w.write_f32(d.hp);
    w.write_f32(d.od);
    w.write_f64(d.slider_multiplier);
    w.write_u8(d.mode.as_u8());
    w.write_u32(d.preview_time);
    w.write_u64(d.last_modification);

    w.write_i16(d.overrides.local_offset);
    if layout >= LocalMapsLayout::OnlineOffset {
        w.write_i16(d.overrides.online_offset);
    }

    w.write_u16(d.circles);
    w.write_u16(d.sliders);
    w.write_u16(d.spinners);
    w.write_f64(d.stars_nomod);
    w.write_i32(d.bpm.min);
    w.write_i32(d.bpm.max);
    w.write_i32(d.bpm.most_common);

    if layout < LocalMapsLayout::Loudness {
        w.write_u32(0);
    }
    if layout >= LocalMapsLayout::DrawBackground {
        w.write_bool(d.overrides.draw_background);
    }
    if layout >= LocalMapsLayout::Loudness {
        w.write_f32(d.overrides.loudness);
    }
    if layout >= LocalMapsLayout::Unicode {
        w.write_string(&d.title_unicode, S);
        w.write_string(&d.artist_unicode, S);
    }
}
