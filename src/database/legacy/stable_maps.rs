//! osu!stable `osu!.db` decoder.

use super::{ParseError, ticks_to_unix_seconds};
use crate::database::binary::{BinaryReader, StringPrefix};
use crate::database::models::{
    BeatmapDifficulty, BeatmapHash, BpmInfo, GameMode, MapOverrides, set_id_from_folder,
};
use crate::difficulty::bpm::{TimingSample, bpm_info};
use std::path::Path;

const S: StringPrefix = StringPrefix::Uleb128;

/// Field layouts of `osu!.db` by version range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StableLayout {
    /// Before 20140609: byte-wide AR/CS/HP/OD, no star tables, extra u16.
    ByteDifficulty,
    /// 20140609..20160408: float difficulty values and f64 star tables.
    FloatDifficulty,
    /// 20160408..20191106: every entry is preceded by its byte size.
    SizedEntries,
    /// 20191106..20250108: entry sizes dropped again.
    Unsized,
    /// 20250108 onwards: star tables hold f32 ratings.
    F32Stars,
}

impl StableLayout {
    pub fn for_version(version: u32) -> Self {
        match version {
            0..20140609 => StableLayout::ByteDifficulty,
            20140609..20160408 => StableLayout::FloatDifficulty,
            20160408..20191106 => StableLayout::SizedEntries,
            20191106..20250108 => StableLayout::Unsized,
            _ => StableLayout::F32Stars,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StableMapsHeader {
    pub version: u32,
    pub folder_count: u32,
    pub account_unlocked: bool,
    pub unlock_date: u64,
    pub player_name: String,
    pub beatmap_count: u32,
}

impl StableMapsHeader {
    pub fn layout(&self) -> StableLayout {
        StableLayout::for_version(self.version)
    }
}

/// Reads the file header. `version_cap` is the newest version this build
/// trusts; pass `None` to accept anything.
pub fn parse_header(
    reader: &mut BinaryReader<'_>,
    version_cap: Option<u32>,
) -> Result<StableMapsHeader, ParseError> {
    let version = reader.read_u32()?;
    if let Some(cap) = version_cap {
        if version > cap {
            return Err(ParseError::UnsupportedFormatVersion {
                format: "osu!.db",
                version,
                newest: cap,
            });
        }
    }

    Ok(StableMapsHeader {
        version,
        folder_count: reader.read_u32()?,
        account_unlocked: reader.read_bool()?,
        unlock_date: reader.read_u64()?,
        player_name: reader.read_string(S)?,
        beatmap_count: reader.read_u32()?,
    })
}

/// One `osu!.db` entry, reduced to what the store keeps.
#[derive(Debug, Clone, PartialEq)]
pub struct StableBeatmapRecord {
    pub hash: Option<BeatmapHash>,
    pub folder_name: String,
    pub osu_file: String,
    pub artist: String,
    pub artist_unicode: String,
    pub title: String,
    pub title_unicode: String,
    pub creator: String,
    pub difficulty_name: String,
    pub audio_file: String,
    pub source: String,
    pub tags: String,
    pub ranked_status: u8,
    pub circles: u16,
    pub sliders: u16,
    pub spinners: u16,
    pub last_modification: u64,
    pub ar: f32,
    pub cs: f32,
    pub hp: f32,
    pub od: f32,
    pub slider_multiplier: f64,
    /// Nomod osu!standard rating, when the file carries star tables.
    pub stars_nomod: Option<f64>,
    pub length_ms: u32,
    pub preview_time: u32,
    pub bpm: BpmInfo,
    pub beatmap_id: i32,
    pub set_id: i32,
    pub local_offset: u16,
    pub online_offset: u16,
    pub stack_leniency: f32,
    pub mode: u8,
}

impl StableBeatmapRecord {
    /// Entries with no metadata at all exist in real databases and carry
    /// nothing worth importing.
    pub fn is_blank(&self) -> bool {
        self.hash.is_none()
            && self.artist.is_empty()
            && self.title.is_empty()
            && self.creator.is_empty()
            && self.difficulty_name.is_empty()
            && self.osu_file.is_empty()
    }

    pub fn into_difficulty(self, songs_folder: &Path) -> Option<BeatmapDifficulty> {
        let hash = self.hash?;
        let folder = songs_folder.join(&self.folder_name);
        let set_id = if self.set_id < 1 {
            set_id_from_folder(&folder).unwrap_or(-1)
        } else {
            self.set_id
        };

        Some(BeatmapDifficulty {
            hash,
            id: self.beatmap_id,
            set_id,
            folder,
            osu_file: self.osu_file,
            title: self.title,
            title_unicode: self.title_unicode,
            artist: self.artist,
            artist_unicode: self.artist_unicode,
            creator: self.creator,
            difficulty_name: self.difficulty_name,
            source: self.source,
            tags: self.tags,
            audio_file: self.audio_file,
            ar: self.ar,
            cs: self.cs,
            hp: self.hp,
            od: self.od,
            slider_multiplier: self.slider_multiplier,
            stack_leniency: self.stack_leniency,
            bpm: self.bpm,
            circles: self.circles,
            sliders: self.sliders,
            spinners: self.spinners,
            stars_nomod: self.stars_nomod.unwrap_or(-1.0),
            length_ms: self.length_ms,
            preview_time: self.preview_time,
            last_modification: self.last_modification,
            mode: GameMode::from_u8(self.mode).unwrap_or_default(),
            overrides: MapOverrides {
                local_offset: self.local_offset as i16,
                online_offset: self.online_offset as i16,
                ..MapOverrides::default()
            },
        })
    }
}

fn read_difficulty_value(
    reader: &mut BinaryReader<'_>,
    layout: StableLayout,
) -> Result<f32, ParseError> {
    Ok(match layout {
        StableLayout::ByteDifficulty => f32::from(reader.read_u8()?),
        _ => reader.read_f32()?,
    })
}

/// Reads one star table and returns the nomod entry, if any.
fn read_star_table(
    reader: &mut BinaryReader<'_>,
    layout: StableLayout,
) -> Result<Option<f64>, ParseError> {
    let count = reader.read_u32()?;
    let mut nomod = None;
    for _ in 0..count {
        reader.skip(1)?;
        let mods = reader.read_u32()?;
        reader.skip(1)?;
        let rating = match layout {
            StableLayout::F32Stars => f64::from(reader.read_f32()?),
            _ => reader.read_f64()?,
        };
        if mods == 0 {
            nomod = Some(rating);
        }
    }
    Ok(nomod)
}

fn read_timing_points(reader: &mut BinaryReader<'_>) -> Result<Vec<TimingSample>, ParseError> {
    let count = reader.read_u32()? as usize;
    // 17 bytes per point; a bogus count fails on the first short read.
    let mut points = Vec::with_capacity(count.min(reader.remaining() / 17));
    for _ in 0..count {
        points.push(TimingSample {
            ms_per_beat: reader.read_f64()?,
            offset: reader.read_f64()?,
            uninherited: reader.read_bool()?,
        });
    }
    Ok(points)
}

/// Decodes entry `index`, or returns `Ok(None)` once `beatmap_count`
/// entries have been read.
pub fn parse_next_beatmap_record(
    reader: &mut BinaryReader<'_>,
    header: &StableMapsHeader,
    index: u32,
) -> Result<Option<StableBeatmapRecord>, ParseError> {
    if index >= header.beatmap_count {
        return Ok(None);
    }
    let layout = header.layout();

    if layout == StableLayout::SizedEntries {
        reader.skip(4)?;
    }

    let artist = reader.read_string(S)?;
    let artist_unicode = reader.read_string(S)?;
    let title = reader.read_string(S)?;
    let title_unicode = reader.read_string(S)?;
    let creator = reader.read_string(S)?;
    let difficulty_name = reader.read_string(S)?;
    let audio_file = reader.read_string(S)?;
    let hash_text = reader.read_string(S)?;
    let osu_file = reader.read_string(S)?;

    let ranked_status = reader.read_u8()?;
    let circles = reader.read_u16()?;
    let sliders = reader.read_u16()?;
    let spinners = reader.read_u16()?;
    let last_modification = ticks_to_unix_seconds(reader.read_u64()?);

    let ar = read_difficulty_value(reader, layout)?;
    let cs = read_difficulty_value(reader, layout)?;
    let hp = read_difficulty_value(reader, layout)?;
    let od = read_difficulty_value(reader, layout)?;
    let slider_multiplier = reader.read_f64()?;

    let mut stars_nomod = None;
    if layout != StableLayout::ByteDifficulty {
        stars_nomod = read_star_table(reader, layout)?;
        for _ in 0..3 {
            read_star_table(reader, layout)?;
        }
    }

    let _drain_time_secs = reader.read_u32()?;
    let length_ms = reader.read_u32()?;
    let preview_time = reader.read_u32()?;
    let timing_points = read_timing_points(reader)?;

    let beatmap_id = reader.read_i32()?;
    let set_id = reader.read_i32()?;
    let _thread_id = reader.read_u32()?;
    reader.skip(4)?; // grades for std/taiko/ctb/mania
    let local_offset = reader.read_u16()?;
    let stack_leniency = reader.read_f32()?;
    let mode = reader.read_u8()?;

    let source = reader.read_string(S)?;
    let tags = reader.read_string(S)?;
    let online_offset = reader.read_u16()?;
    reader.skip_string(S)?; // title font
    let _unplayed = reader.read_bool()?;
    let _last_played = reader.read_u64()?;
    let _osz2 = reader.read_bool()?;
    let folder_name = reader.read_string(S)?.trim().replace('\\', "/");
    let _last_online_check = reader.read_u64()?;
    reader.skip(5)?; // ignore sound/skin, disable storyboard/video, visual override

    if layout == StableLayout::ByteDifficulty {
        reader.skip(2)?;
    }
    let _last_edit = reader.read_u32()?;
    let _mania_scroll_speed = reader.read_u8()?;

    let hash = if hash_text.is_empty() {
        None
    } else {
        Some(
            BeatmapHash::from_hex(&hash_text)
                .ok_or_else(|| ParseError::CorruptRecord(format!("bad hash {:?}", hash_text)))?,
        )
    };

    Ok(Some(StableBeatmapRecord {
        hash,
        folder_name,
        osu_file,
        artist,
        artist_unicode,
        title,
        title_unicode,
        creator,
        difficulty_name,
        audio_file,
        source,
        tags,
        ranked_status,
        circles,
        sliders,
        spinners,
        last_modification,
        ar,
        cs,
        hp,
        od,
        slider_multiplier,
        stars_nomod,
        length_ms,
        preview_time,
        bpm: bpm_info(&timing_points, f64::from(length_ms)),
        beatmap_id,
        set_id,
        local_offset,
        online_offset,
        stack_leniency,
        mode,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::binary::{BinaryError, BinaryWriter};
    use crate::database::legacy::unix_seconds_to_ticks;

    pub(crate) struct Fixture<'a> {
        pub hash: &'a str,
        pub folder: &'a str,
        pub osu_file: &'a str,
        pub set_id: i32,
        pub mode: u8,
    }

    /// Encodes one entry the way osu!stable lays it out for `version`.
    pub(crate) fn write_entry(w: &mut BinaryWriter, version: u32, f: &Fixture<'_>) {
        let layout = StableLayout::for_version(version);
        let mut e = BinaryWriter::new();
        for text in ["Artist", "", "Title", "", "Mapper", "Insane", "audio.mp3"] {
            e.write_string(text, S);
        }
        e.write_string(f.hash, S);
        e.write_string(f.osu_file, S);
        e.write_u8(4);
        e.write_u16(300);
        e.write_u16(200);
        e.write_u16(1);
        e.write_u64(unix_seconds_to_ticks(1_600_000_000));
        for value in [9.0f32, 4.0, 6.0, 8.0] {
            if layout == StableLayout::ByteDifficulty {
                e.write_u8(value as u8);
            } else {
                e.write_f32(value);
            }
        }
        e.write_f64(1.8);
        if layout != StableLayout::ByteDifficulty {
            for table in 0..4 {
                let entries: &[(u32, f64)] = if table == 0 { &[(64, 7.1), (0, 5.25)] } else { &[] };
                e.write_u32(entries.len() as u32);
                for &(mods, rating) in entries {
                    e.write_u8(0x08);
                    e.write_u32(mods);
                    if layout == StableLayout::F32Stars {
                        e.write_u8(0x0c);
                        e.write_f32(rating as f32);
                    } else {
                        e.write_u8(0x0d);
                        e.write_f64(rating);
                    }
                }
            }
        }
        e.write_u32(120);
        e.write_u32(121_000);
        e.write_u32(40_000);
        e.write_u32(2);
        for (ms, offset, uninherited) in [(300.0, 100.0, true), (-100.0, 5000.0, false)] {
            e.write_f64(ms);
            e.write_f64(offset);
            e.write_bool(uninherited);
        }
        e.write_i32(1234);
        e.write_i32(f.set_id);
        e.write_u32(0);
        e.write_bytes(&[9, 9, 9, 9]);
        e.write_u16(15);
        e.write_f32(0.7);
        e.write_u8(f.mode);
        e.write_string("Source", S);
        e.write_string("tag1 tag2", S);
        e.write_u16(0);
        e.write_string("", S);
        e.write_bool(true);
        e.write_u64(0);
        e.write_bool(false);
        e.write_string(f.folder, S);
        e.write_u64(0);
        e.write_bytes(&[0; 5]);
        if layout == StableLayout::ByteDifficulty {
            e.write_u16(0);
        }
        e.write_u32(0);
        e.write_u8(0);

        let entry = e.into_bytes();
        if layout == StableLayout::SizedEntries {
            w.write_u32(entry.len() as u32);
        }
        w.write_bytes(&entry);
    }

    pub(crate) fn write_header(w: &mut BinaryWriter, version: u32, beatmap_count: u32) {
        w.write_u32(version);
        w.write_u32(1);
        w.write_bool(true);
        w.write_u64(0);
        w.write_string("player", S);
        w.write_u32(beatmap_count);
    }

    const HASH: &str = "0123456789abcdef0123456789abcdef";

    fn fixture() -> Fixture<'static> {
        Fixture {
            hash: HASH,
            folder: "39804 xi - FREEDOM DiVE\\",
            osu_file: "xi - FREEDOM DiVE (Nakagawa-Kanon) [FOUR DIMENSIONS].osu",
            set_id: -1,
            mode: 0,
        }
    }

    #[test]
    fn decodes_every_layout() {
        for version in [20131111, 20150203, 20170222, 20201210, 20250110] {
            let mut w = BinaryWriter::new();
            write_header(&mut w, version, 1);
            write_entry(&mut w, version, &fixture());
            let bytes = w.into_bytes();

            let mut reader = BinaryReader::new(&bytes);
            let header = parse_header(&mut reader, None).unwrap();
            assert_eq!(header.version, version);
            let record = parse_next_beatmap_record(&mut reader, &header, 0)
                .unwrap()
                .unwrap();
            assert!(reader.is_empty(), "layout for {} left bytes", version);
            assert_eq!(parse_next_beatmap_record(&mut reader, &header, 1).unwrap(), None);

            assert_eq!(record.circles, 300);
            assert_eq!(record.ar, 9.0);
            assert_eq!(record.bpm.most_common, 200);
            assert_eq!(record.last_modification, 1_600_000_000);
            if StableLayout::for_version(version) == StableLayout::ByteDifficulty {
                assert_eq!(record.stars_nomod, None);
            } else {
                let stars = record.stars_nomod.unwrap();
                assert!((stars - 5.25).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn folder_name_fallback_for_set_id() {
        let mut w = BinaryWriter::new();
        write_header(&mut w, 20201210, 1);
        write_entry(&mut w, 20201210, &fixture());
        let bytes = w.into_bytes();
        let mut reader = BinaryReader::new(&bytes);
        let header = parse_header(&mut reader, None).unwrap();
        let record = parse_next_beatmap_record(&mut reader, &header, 0)
            .unwrap()
            .unwrap();
        assert_eq!(record.folder_name, "39804 xi - FREEDOM DiVE/");

        let diff = record.into_difficulty(Path::new("/songs")).unwrap();
        assert_eq!(diff.set_id, 39804);
        assert_eq!(diff.overrides.local_offset, 15);
        assert_eq!(diff.hash.to_string(), HASH);
    }

    #[test]
    fn version_cap_is_enforced() {
        let mut w = BinaryWriter::new();
        write_header(&mut w, 20300101, 0);
        let bytes = w.into_bytes();
        let err = parse_header(&mut BinaryReader::new(&bytes), Some(20251231)).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormatVersion { version: 20300101, .. }));
        assert!(parse_header(&mut BinaryReader::new(&bytes), None).is_ok());
    }

    #[test]
    fn truncated_entry_is_an_error() {
        let mut w = BinaryWriter::new();
        write_header(&mut w, 20201210, 1);
        write_entry(&mut w, 20201210, &fixture());
        let mut bytes = w.into_bytes();
        bytes.truncate(bytes.len() - 10);

        let mut reader = BinaryReader::new(&bytes);
        let header = parse_header(&mut reader, None).unwrap();
        let err = parse_next_beatmap_record(&mut reader, &header, 0).unwrap_err();
        assert!(matches!(err, ParseError::Binary(BinaryError::TruncatedInput { .. })));
    }
}
