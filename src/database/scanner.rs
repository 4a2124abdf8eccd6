//! Filesystem scanner: enumerates set folders and parses `.osu` files
//! directly when no dump covers them.

use crate::database::models::{
    BeatmapDifficulty, BeatmapHash, BeatmapSet, GameMode, MapOverrides, SetSource,
    set_id_from_folder, unix_seconds,
};
use crate::difficulty::bpm::{bpm_info, samples_from_map};
use rosu_map::section::general::GameMode as MapMode;
use rosu_map::section::hit_objects::HitObjectKind;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("folder {path:?} is unreadable: {source}")]
    FolderUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFolder {
    pub path: PathBuf,
    pub mtime: Option<SystemTime>,
}

/// Lazily lists the sub-folders of `root` in filesystem order.
pub fn scan(root: &Path) -> Result<impl Iterator<Item = ScannedFolder>, ScanError> {
    let entries = fs::read_dir(root).map_err(|source| ScanError::FolderUnreadable {
        path: root.to_path_buf(),
        source,
    })?;

    Ok(entries.filter_map(|e| e.ok()).filter_map(|entry| {
        let path = entry.path();
        if !path.is_dir() {
            return None;
        }
        let mtime = fs::metadata(&path).and_then(|m| m.modified()).ok();
        Some(ScannedFolder { path, mtime })
    }))
}

fn collect_osu_files(folder: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let entries = fs::read_dir(folder).map_err(|source| ScanError::FolderUnreadable {
        path: folder.to_path_buf(),
        source,
    })?;
    let mut files = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("osu"))
        })
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

/// Parses every `.osu` file of a set folder. Files that fail to parse are
/// skipped; a folder without a single valid file yields `Ok(None)`.
pub fn load_raw_beatmap(folder: &Path) -> Result<Option<BeatmapSet>, ScanError> {
    let osu_files = collect_osu_files(folder)?;

    let mut difficulties = Vec::with_capacity(osu_files.len());
    for osu_file in &osu_files {
        match load_difficulty(folder, osu_file) {
            Ok(diff) => difficulties.push(diff),
            Err(e) => log::warn!("SCAN: skipping {:?}: {}", osu_file, e),
        }
    }

    if difficulties.is_empty() {
        log::debug!("SCAN: no valid beatmap in {:?}", folder);
        return Ok(None);
    }

    let set_id = difficulties
        .iter()
        .map(|d| d.set_id)
        .find(|id| *id > 0)
        .or_else(|| set_id_from_folder(folder))
        .unwrap_or(-1);
    for diff in &mut difficulties {
        diff.set_id = set_id;
    }

    let mut set = BeatmapSet::new(set_id, folder, SetSource::Raw);
    set.folder_mtime = fs::metadata(folder).and_then(|m| m.modified()).ok();
    set.difficulties = difficulties;
    Ok(Some(set))
}

fn load_difficulty(folder: &Path, osu_file: &Path) -> io::Result<BeatmapDifficulty> {
    let bytes = fs::read(osu_file)?;
    let hash = BeatmapHash::of_bytes(&bytes);
    let map = rosu_map::Beatmap::from_bytes(&bytes)?;
    if map.hit_objects.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "no hit objects"));
    }

    let last_modification = fs::metadata(osu_file)
        .and_then(|m| m.modified())
        .map(unix_seconds)
        .unwrap_or(0);
    let file_name = osu_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut diff = difficulty_from_map(&map, hash, folder, file_name);
    diff.last_modification = last_modification;
    Ok(diff)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ObjectSummary {
    pub circles: u16,
    pub sliders: u16,
    pub spinners: u16,
    pub end_time_ms: f64,
}

/// Object counts and the end of the last object. Slider ends are not
/// resolved here; they only matter for the final object.
pub fn summarize_objects(map: &rosu_map::Beatmap) -> ObjectSummary {
    let mut summary = ObjectSummary::default();
    for obj in &map.hit_objects {
        let end = match &obj.kind {
            HitObjectKind::Circle(_) => {
                summary.circles = summary.circles.saturating_add(1);
                obj.start_time
            }
            HitObjectKind::Slider(_) => {
                summary.sliders = summary.sliders.saturating_add(1);
                obj.start_time
            }
            HitObjectKind::Spinner(spinner) => {
                summary.spinners = summary.spinners.saturating_add(1);
                obj.start_time + spinner.duration
            }
            HitObjectKind::Hold(hold) => {
                summary.sliders = summary.sliders.saturating_add(1);
                obj.start_time + hold.duration
            }
        };
        summary.end_time_ms = summary.end_time_ms.max(end);
    }
    summary
}

fn map_mode(mode: MapMode) -> GameMode {
    match mode {
        MapMode::Osu => GameMode::Osu,
        MapMode::Taiko => GameMode::Taiko,
        MapMode::Catch => GameMode::Catch,
        MapMode::Mania => GameMode::Mania,
    }
}

pub fn difficulty_from_map(
    map: &rosu_map::Beatmap,
    hash: BeatmapHash,
    folder: &Path,
    osu_file: String,
) -> BeatmapDifficulty {
    let objects = summarize_objects(map);
    let length_ms = objects.end_time_ms.max(0.0) as u32;

    BeatmapDifficulty {
        hash,
        id: map.beatmap_id,
        set_id: map.beatmap_set_id,
        folder: folder.to_path_buf(),
        osu_file,
        title: map.title.clone(),
        title_unicode: map.title_unicode.clone(),
        artist: map.artist.clone(),
        artist_unicode: map.artist_unicode.clone(),
        creator: map.creator.clone(),
        difficulty_name: map.version.clone(),
        source: map.source.clone(),
        tags: map.tags.clone(),
        audio_file: map.audio_file.clone(),
        ar: map.approach_rate,
        cs: map.circle_size,
        hp: map.hp_drain_rate,
        od: map.overall_difficulty,
        slider_multiplier: map.slider_multiplier,
        stack_leniency: map.stack_leniency,
        bpm: bpm_info(&samples_from_map(map), objects.end_time_ms),
        circles: objects.circles,
        sliders: objects.sliders,
        spinners: objects.spinners,
        stars_nomod: -1.0,
        length_ms,
        preview_time: map.preview_time.max(0) as u32,
        last_modification: 0,
        mode: map_mode(map.mode),
        overrides: MapOverrides::default(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn osu_text(title: &str, version: &str, set_id: i32) -> String {
        format!(
            "osu file format v14

[General]
AudioFilename: audio.mp3
PreviewTime: 1000
StackLeniency: 0.7
Mode: 0

[Metadata]
Title:{title}
TitleUnicode:{title}
Artist:Artist
ArtistUnicode:Artist
Creator:Mapper
Version:{version}
Source:
Tags:test
BeatmapID:0
BeatmapSetID:{set_id}

[Difficulty]
HPDrainRate:5
CircleSize:4
OverallDifficulty:8
ApproachRate:9
SliderMultiplier:1.4
SliderTickRate:1

[TimingPoints]
0,500,4,2,0,100,1,0
4000,250,4,2,0,100,1,0

[HitObjects]
64,192,500,1,0,0:0:0:0:
128,192,1000,1,0,0:0:0:0:
192,192,1500,1,0,0:0:0:0:
256,192,4000,1,0,0:0:0:0:
256,192,5000,12,0,6000,0:0:0:0:
"
        )
    }

    pub(crate) fn write_set(root: &Path, folder: &str, diffs: &[&str]) -> PathBuf {
        let dir = root.join(folder);
        fs::create_dir_all(&dir).unwrap();
        for version in diffs {
            fs::write(
                dir.join(format!("{}.osu", version)),
                osu_text("Song", version, -1),
            )
            .unwrap();
        }
        dir
    }

    #[test]
    fn scans_only_directories() {
        let root = tempfile::tempdir().unwrap();
        write_set(root.path(), "1 a", &["Easy"]);
        write_set(root.path(), "2 b", &["Hard"]);
        fs::write(root.path().join("stray.txt"), "x").unwrap();

        let mut found: Vec<_> = scan(root.path()).unwrap().map(|f| f.path).collect();
        found.sort();
        assert_eq!(found, vec![root.path().join("1 a"), root.path().join("2 b")]);
    }

    #[test]
    fn missing_root_is_unreadable() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        assert!(matches!(scan(&missing), Err(ScanError::FolderUnreadable { .. })));
    }

    #[test]
    fn raw_load_parses_metadata() {
        let root = tempfile::tempdir().unwrap();
        let folder = write_set(root.path(), "321 Artist - Song", &["Normal", "Insane"]);
        fs::write(folder.join("broken.osu"), b"\xff\xfe not a beatmap").unwrap();

        let set = load_raw_beatmap(&folder).unwrap().unwrap();
        assert_eq!(set.set_id, 321);
        assert_eq!(set.source, SetSource::Raw);
        assert!(set.folder_mtime.is_some());

        let names: Vec<_> = set.difficulties.iter().map(|d| d.difficulty_name.as_str()).collect();
        assert!(names.contains(&"Normal") && names.contains(&"Insane"));

        let diff = &set.difficulties[0];
        assert_eq!(diff.circles, 4);
        assert_eq!(diff.spinners, 1);
        assert_eq!(diff.ar, 9.0);
        assert_eq!(diff.bpm.min, 120);
        assert_eq!(diff.bpm.max, 240);
        assert_eq!(diff.length_ms, 6000);
        assert!(diff.needs_star_calc());
        assert_eq!(diff.hash, BeatmapHash::of_bytes(&fs::read(diff.path()).unwrap()));
    }

    #[test]
    fn folder_without_beatmaps_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("empty");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("readme.txt"), "hi").unwrap();
        assert!(load_raw_beatmap(&folder).unwrap().is_none());
    }
}
