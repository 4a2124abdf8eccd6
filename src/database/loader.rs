//! Background load pass: dumps first, then the songs folder, then scores.
//!
//! The pass runs on its own thread and only takes the store locks for one
//! record or folder at a time, so the UI can keep reading while it runs.
//! Progress is published through [`LoadProgress`] atomics and failures are
//! reported as [`Notification`]s instead of aborting the pass.

use crate::cancel::CancelToken;
use crate::database::binary::BinaryReader;
use crate::database::legacy::collections as collection_dump;
use crate::database::legacy::local_maps::LocalMapsParser;
use crate::database::legacy::mcosu::{self, McOsuScoresParser, ScoresDbKind};
use crate::database::legacy::scores::{LocalScoresParser, ScoreGroups, StableScoresParser};
use crate::database::legacy::stable_maps::{parse_header, parse_next_beatmap_record};
use crate::database::manager::{Database, Notification};
use crate::database::models::{BeatmapSet, SetSource, unix_seconds};
use crate::database::scanner::{self, ScannedFolder};
use crate::database::scores::AddScoreOutcome;
use crate::lock;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

/// Progress weight of one songs folder during reconciliation.
pub const RAW_FOLDER_COST: u64 = 4096;

/// The ratio stays below this until the pass is finished.
const MAX_ACTIVE_RATIO: f32 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LoadState {
    #[default]
    Idle = 0,
    ScanningFolders = 1,
    ParsingBinaryDump = 2,
    ReconcilingRawFolders = 3,
    LoadingScores = 4,
    Finished = 5,
    Cancelled = 6,
}

impl LoadState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoadState::ScanningFolders,
            2 => LoadState::ParsingBinaryDump,
            3 => LoadState::ReconcilingRawFolders,
            4 => LoadState::LoadingScores,
            5 => LoadState::Finished,
            6 => LoadState::Cancelled,
            _ => LoadState::Idle,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            LoadState::ScanningFolders
                | LoadState::ParsingBinaryDump
                | LoadState::ReconcilingRawFolders
                | LoadState::LoadingScores
        )
    }
}

/// Lock-free view of a running pass.
#[derive(Debug, Default)]
pub struct LoadProgress {
    state: AtomicU8,
    bytes_processed: AtomicU64,
    bytes_total: AtomicU64,
    /// f32 bits. Non-negative floats order the same way as their bits, so
    /// `fetch_max` keeps the ratio monotonic.
    ratio: AtomicU32,
    cancel: CancelToken,
}

impl LoadProgress {
    pub fn state(&self) -> LoadState {
        LoadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn ratio(&self) -> f32 {
        f32::from_bits(self.ratio.load(Ordering::Acquire))
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed.load(Ordering::Acquire)
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn should_stop(&self) -> bool {
        self.cancel.should_stop()
    }

    fn set_state(&self, state: LoadState) {
        log::debug!("LOADER: {:?}", state);
        self.state.store(state as u8, Ordering::Release);
    }

    fn begin(&self) {
        self.cancel.reset();
        self.bytes_processed.store(0, Ordering::Release);
        self.bytes_total.store(0, Ordering::Release);
        self.ratio.store(0f32.to_bits(), Ordering::Release);
    }

    fn add_total(&self, bytes: u64) {
        self.bytes_total.fetch_add(bytes, Ordering::AcqRel);
    }

    fn advance(&self, bytes: u64) {
        let processed = self.bytes_processed.fetch_add(bytes, Ordering::AcqRel) + bytes;
        let total = self.bytes_total().max(1);
        let ratio = (processed as f64 / total as f64).min(f64::from(MAX_ACTIVE_RATIO)) as f32;
        self.ratio.fetch_max(ratio.to_bits(), Ordering::AcqRel);
    }

    fn finish(&self, state: LoadState) {
        if state == LoadState::Finished {
            self.ratio.store(1f32.to_bits(), Ordering::Release);
        }
        self.set_state(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Dumps, songs folder, scores and collections.
    Full,
    /// Songs folder only, against what is already in the store.
    Refresh,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub state: LoadState,
    pub sets: usize,
    pub difficulties: usize,
    pub scores: usize,
    pub raw_loaded: usize,
    pub reparsed: usize,
    pub removed: usize,
    pub found_changes: bool,
    pub queued_star_calc: usize,
}

#[derive(Debug)]
struct Cancelled;

type Phase = Result<(), Cancelled>;

fn checkpoint(progress: &LoadProgress) -> Phase {
    if progress.should_stop() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

/// Owns the loader thread of a [`Database`].
#[derive(Default)]
pub struct DatabaseLoader {
    handle: std::sync::Mutex<Option<JoinHandle<LoadReport>>>,
}

impl DatabaseLoader {
    /// Starts a pass. Returns `false` when one is already running.
    pub fn start(&self, db: Arc<Database>, mode: LoadMode) -> bool {
        let mut handle = lock(&self.handle);
        if db.progress().state().is_active() {
            return false;
        }
        if let Some(previous) = handle.take() {
            let _ = previous.join();
        }

        db.progress().begin();
        db.progress().set_state(LoadState::ScanningFolders);
        let worker_db = Arc::clone(&db);
        match thread::Builder::new()
            .name("db-loader".to_string())
            .spawn(move || run(&worker_db, mode))
        {
            Ok(h) => {
                *handle = Some(h);
                true
            }
            Err(e) => {
                log::error!("LOADER: Failed to spawn loader thread: {}", e);
                db.progress().set_state(LoadState::Idle);
                false
            }
        }
    }

    /// Waits for the running pass, if any.
    pub fn join(&self) -> Option<LoadReport> {
        let handle = lock(&self.handle).take()?;
        match handle.join() {
            Ok(report) => Some(report),
            Err(_) => {
                log::error!("LOADER: loader thread panicked");
                None
            }
        }
    }
}

fn run(db: &Database, mode: LoadMode) -> LoadReport {
    let started = SystemTime::now();
    log::info!("LOADER: Starting {:?} load pass", mode);

    let mut report = LoadReport::default();
    let state = match run_phases(db, mode, &mut report) {
        Ok(()) => LoadState::Finished,
        Err(Cancelled) => LoadState::Cancelled,
    };

    {
        let store = lock(db.store());
        report.sets = store.set_count();
        report.difficulties = store.difficulty_count();
    }
    report.scores = lock(db.scores()).len();
    report.state = state;
    db.set_found_changes(report.found_changes);

    if state == LoadState::Finished {
        let pending = lock(db.store()).take_pending_star_calc();
        report.queued_star_calc = db.start_map_calc(pending);
    }
    db.progress().finish(state);

    let elapsed = started.elapsed().map(|d| d.as_millis()).unwrap_or(0);
    log::info!(
        "LOADER: {:?} after {}ms: {} sets, {} difficulties, {} scores",
        state,
        elapsed,
        report.sets,
        report.difficulties,
        report.scores
    );
    db.notify(match state {
        LoadState::Finished => Notification::LoadFinished(report.clone()),
        _ => Notification::LoadCancelled,
    });
    report
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn run_phases(db: &Database, mode: LoadMode, report: &mut LoadReport) -> Phase {
    let config = db.config();
    let progress = db.progress();
    let songs = config.songs_path();

    progress.set_state(LoadState::ScanningFolders);
    let folders = scan_folders(db, &songs, progress)?;
    progress.add_total(folders.len() as u64 * RAW_FOLDER_COST);

    if mode == LoadMode::Full {
        let stable_maps = config.stable_maps_path();
        let use_stable = config.stable_dump_enabled && stable_maps.exists();
        if use_stable {
            progress.add_total(file_len(&stable_maps));
        }
        progress.add_total(file_len(&config.local_maps_path()));
        progress.add_total(file_len(&config.local_scores_path()));
        if config.stable_dump_enabled {
            progress.add_total(file_len(&config.stable_scores_path()));
        }
        if let Some(path) = config.mcosu_scores_path() {
            progress.add_total(file_len(&path));
        }

        lock(db.store()).clear();
        progress.set_state(LoadState::ParsingBinaryDump);
        if use_stable {
            load_stable_maps(db, &stable_maps, &songs)?;
        }
        load_local_maps(db, &config.local_maps_path())?;
    }

    progress.set_state(LoadState::ReconcilingRawFolders);
    reconcile(db, &folders, report)?;

    if mode == LoadMode::Full {
        progress.set_state(LoadState::LoadingScores);
        lock(db.scores()).clear();
        load_local_scores(db, &config.local_scores_path())?;
        if let Some(path) = config.mcosu_scores_path() {
            load_mcosu_scores(db, &path)?;
        }
        if config.stable_dump_enabled {
            load_stable_scores(db, &config.stable_scores_path())?;
        }
        lock(db.scores()).sort_all();
        load_collections(db);
    }
    Ok(())
}

fn scan_folders(db: &Database, songs: &Path, progress: &LoadProgress) -> Result<Vec<ScannedFolder>, Cancelled> {
    let iter = match scanner::scan(songs) {
        Ok(iter) => iter,
        Err(e) => {
            log::warn!("LOADER: {}", e);
            db.notify(Notification::Warning(e.to_string()));
            return Ok(Vec::new());
        }
    };
    let mut folders = Vec::new();
    for folder in iter {
        checkpoint(progress)?;
        folders.push(folder);
    }
    log::info!("LOADER: {} folders in {:?}", folders.len(), songs);
    Ok(folders)
}

fn read_dump(db: &Database, path: &Path) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            log::warn!("LOADER: cannot read {:?}: {}", path, e);
            db.notify(Notification::DumpError {
                file: path.to_path_buf(),
                error: e.to_string(),
            });
            None
        }
    }
}

fn dump_error(db: &Database, path: &Path, error: impl std::fmt::Display) {
    log::error!("LOADER: {:?} is unreadable past this point: {}", path, error);
    db.notify(Notification::DumpError {
        file: path.to_path_buf(),
        error: error.to_string(),
    });
}

/// Reports parser position deltas as processed bytes.
struct PositionTracker<'p> {
    progress: &'p LoadProgress,
    last: usize,
}

impl<'p> PositionTracker<'p> {
    fn new(progress: &'p LoadProgress) -> Self {
        Self { progress, last: 0 }
    }

    fn update(&mut self, position: usize) {
        if position > self.last {
            self.progress.advance((position - self.last) as u64);
            self.last = position;
        }
    }
}

fn load_stable_maps(db: &Database, path: &Path, songs: &Path) -> Phase {
    let Some(bytes) = read_dump(db, path) else {
        return Ok(());
    };
    let progress = db.progress();
    let mut tracker = PositionTracker::new(progress);
    let mut reader = BinaryReader::new(&bytes);

    let header = match parse_header(&mut reader, db.config().stable_version_cap()) {
        Ok(header) => header,
        Err(e) => {
            dump_error(db, path, e);
            // The file is skipped as a whole; count it as done.
            progress.advance(bytes.len() as u64);
            return Ok(());
        }
    };
    log::info!(
        "LOADER: osu!.db version {} with {} beatmaps",
        header.version,
        header.beatmap_count
    );

    let mut sets: Vec<BeatmapSet> = Vec::new();
    let mut by_folder: HashMap<PathBuf, usize> = HashMap::new();
    let mut index = 0;
    loop {
        checkpoint(progress)?;
        let record = match parse_next_beatmap_record(&mut reader, &header, index) {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) => {
                dump_error(db, path, e);
                break;
            }
        };
        index += 1;
        tracker.update(reader.position());

        if record.is_blank() {
            continue;
        }
        let Some(diff) = record.into_difficulty(songs) else {
            continue;
        };
        let slot = *by_folder.entry(diff.folder.clone()).or_insert_with(|| {
            sets.push(BeatmapSet::new(diff.set_id, diff.folder.clone(), SetSource::StableDump));
            sets.len() - 1
        });
        sets[slot].difficulties.push(diff);
    }

    for mut set in sets {
        checkpoint(progress)?;
        db.fill_cached_stars(&mut set);
        lock(db.store()).upsert_set(set);
    }
    progress.advance(bytes.len().saturating_sub(tracker.last) as u64);
    Ok(())
}

fn load_local_maps(db: &Database, path: &Path) -> Phase {
    let Some(bytes) = read_dump(db, path) else {
        return Ok(());
    };
    let progress = db.progress();
    let mut tracker = PositionTracker::new(progress);

    let mut parser = match LocalMapsParser::new(&bytes) {
        Ok(parser) => parser,
        Err(e) => {
            dump_error(db, path, e);
            progress.advance(bytes.len() as u64);
            return Ok(());
        }
    };
    log::info!(
        "LOADER: maps.db version {} with {} sets",
        parser.version(),
        parser.set_count()
    );

    let mut complete = true;
    loop {
        checkpoint(progress)?;
        match parser.next_set() {
            Ok(Some(mut set)) => {
                tracker.update(parser.position());
                db.fill_cached_stars(&mut set);
                lock(db.store()).upsert_set(set);
            }
            Ok(None) => break,
            Err(e) => {
                dump_error(db, path, e);
                complete = false;
                break;
            }
        }
    }

    if complete {
        match parser.overrides() {
            Ok(entries) => {
                let mut store = lock(db.store());
                for entry in entries {
                    store.set_overrides(&entry.hash, entry.overrides);
                    if entry.stars_nomod >= 0.0
                        && store.find(&entry.hash).is_some_and(|d| d.needs_star_calc())
                    {
                        store.apply_stars(&entry.hash, entry.stars_nomod);
                    }
                }
            }
            Err(e) => dump_error(db, path, e),
        }
    }
    progress.advance(bytes.len().saturating_sub(tracker.last) as u64);
    Ok(())
}

fn same_second(a: Option<SystemTime>, b: Option<SystemTime>) -> bool {
    a.map(unix_seconds) == b.map(unix_seconds)
}

fn reconcile(db: &Database, folders: &[ScannedFolder], report: &mut LoadReport) -> Phase {
    let progress = db.progress();
    let on_disk: HashSet<&Path> = folders.iter().map(|f| f.path.as_path()).collect();

    let known = lock(db.store()).folders();
    for folder in known {
        checkpoint(progress)?;
        if !on_disk.contains(folder.as_path()) && lock(db.store()).remove_set(&folder) {
            log::debug!("LOADER: {:?} is gone", folder);
            report.removed += 1;
        }
    }

    for scanned in folders {
        checkpoint(progress)?;
        let (source, mtime) = {
            let store = lock(db.store());
            (store.folder_source(&scanned.path), store.folder_mtime(&scanned.path))
        };

        let reparse = match source {
            None => false,
            Some(SetSource::StableDump) => {
                progress.advance(RAW_FOLDER_COST);
                continue;
            }
            Some(SetSource::LocalDump | SetSource::Raw) => {
                if same_second(mtime.flatten(), scanned.mtime) {
                    progress.advance(RAW_FOLDER_COST);
                    continue;
                }
                true
            }
        };

        match scanner::load_raw_beatmap(&scanned.path) {
            Ok(Some(mut set)) => {
                db.fill_cached_stars(&mut set);
                lock(db.store()).upsert_set(set);
                if reparse {
                    report.reparsed += 1;
                } else {
                    report.raw_loaded += 1;
                }
            }
            Ok(None) => {
                if reparse && lock(db.store()).remove_set(&scanned.path) {
                    report.removed += 1;
                }
            }
            Err(e) => log::warn!("LOADER: {}", e),
        }
        progress.advance(RAW_FOLDER_COST);
    }

    report.found_changes = report.raw_loaded > 0 || report.reparsed > 0 || report.removed > 0;
    log::info!(
        "LOADER: {} new, {} changed, {} removed folders",
        report.raw_loaded,
        report.reparsed,
        report.removed
    );
    Ok(())
}

fn load_local_scores(db: &Database, path: &Path) -> Phase {
    match read_dump(db, path) {
        Some(bytes) => import_local_scores(db, path, &bytes),
        None => Ok(()),
    }
}

fn import_local_scores(db: &Database, path: &Path, bytes: &[u8]) -> Phase {
    let progress = db.progress();
    let mut tracker = PositionTracker::new(progress);

    let mut parser = match LocalScoresParser::new(bytes) {
        Ok(parser) => parser,
        Err(e) => {
            dump_error(db, path, e);
            progress.advance(bytes.len() as u64);
            return Ok(());
        }
    };

    let mut duplicates = 0;
    loop {
        checkpoint(progress)?;
        match parser.next_beatmap() {
            Ok(Some(group)) => {
                tracker.update(parser.position());
                let mut scores = lock(db.scores());
                for score in group.scores {
                    if scores.add_score_raw(score) == AddScoreOutcome::Duplicate {
                        duplicates += 1;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                dump_error(db, path, e);
                break;
            }
        }
    }
    if duplicates > 0 {
        log::warn!("LOADER: skipped {} duplicate local scores", duplicates);
    }
    progress.advance(bytes.len().saturating_sub(tracker.last) as u64);
    Ok(())
}

fn load_stable_scores(db: &Database, path: &Path) -> Phase {
    let Some(bytes) = read_dump(db, path) else {
        return Ok(());
    };
    match StableScoresParser::new(&bytes) {
        Ok(mut parser) => {
            log::info!("LOADER: stable scores.db version {}", parser.version());
            import_score_groups(db, path, bytes.len(), &mut parser)
        }
        Err(e) => {
            dump_error(db, path, e);
            db.progress().advance(bytes.len() as u64);
            Ok(())
        }
    }
}

/// A `scores.db` from another client. The writer is guessed from the
/// contents since every client used the same file name.
fn load_mcosu_scores(db: &Database, path: &Path) -> Phase {
    let Some(bytes) = read_dump(db, path) else {
        return Ok(());
    };
    let progress = db.progress();
    let kind = match mcosu::detect(&bytes) {
        Ok(Some(kind)) => kind,
        Ok(None) => {
            log::info!("LOADER: {:?} holds no scores", path);
            progress.advance(bytes.len() as u64);
            return Ok(());
        }
        Err(e) => {
            dump_error(db, path, e);
            progress.advance(bytes.len() as u64);
            return Ok(());
        }
    };
    log::info!("LOADER: importing {:?} as {:?} scores", path, kind);

    let parser = match kind {
        ScoresDbKind::Local => return import_local_scores(db, path, &bytes),
        ScoresDbKind::Stable => {
            StableScoresParser::new(&bytes).map(|p| Box::new(p) as Box<dyn ScoreGroups + '_>)
        }
        ScoresDbKind::McOsu | ScoresDbKind::OldNeosu => {
            McOsuScoresParser::new(&bytes).map(|p| Box::new(p) as Box<dyn ScoreGroups + '_>)
        }
    };
    match parser {
        Ok(mut parser) => import_score_groups(db, path, bytes.len(), parser.as_mut()),
        Err(e) => {
            dump_error(db, path, e);
            progress.advance(bytes.len() as u64);
            Ok(())
        }
    }
}

fn import_score_groups<P: ScoreGroups + ?Sized>(db: &Database, path: &Path, len: usize, parser: &mut P) -> Phase {
    let progress = db.progress();
    let mut tracker = PositionTracker::new(progress);

    let mut imported = 0;
    loop {
        checkpoint(progress)?;
        match parser.next_group() {
            Ok(Some(Some(group))) => {
                tracker.update(parser.bytes_read());
                let mut scores = lock(db.scores());
                for score in group.scores {
                    // Plays already imported through the local dump are expected.
                    if scores.add_score_raw(score) == AddScoreOutcome::Inserted {
                        imported += 1;
                    }
                }
            }
            Ok(Some(None)) => tracker.update(parser.bytes_read()),
            Ok(None) => break,
            Err(e) => {
                dump_error(db, path, e);
                break;
            }
        }
    }
    log::info!("LOADER: {} new scores from {:?}", imported, path);
    progress.advance(len.saturating_sub(tracker.last) as u64);
    Ok(())
}

fn load_collections(db: &Database) {
    let config = db.config();
    let mut collections = lock(db.collections_store());
    collections.clear();

    if config.stable_dump_enabled {
        let path = config.stable_collections_path();
        if let Some(bytes) = read_dump(db, &path) {
            match collection_dump::decode_stable(&bytes) {
                Ok(stable) => collections.merge_stable(stable),
                Err(e) => dump_error(db, &path, e),
            }
        }
    }

    if let Some(path) = config.mcosu_collections_path() {
        if let Some(bytes) = read_dump(db, &path) {
            match collection_dump::decode_local(&bytes) {
                Ok(imported) => collections.merge_local(imported),
                Err(e) => dump_error(db, &path, e),
            }
        }
    }

    let path = config.local_collections_path();
    if let Some(bytes) = read_dump(db, &path) {
        match collection_dump::decode_local(&bytes) {
            Ok(local) => collections.merge_local(local),
            Err(e) => dump_error(db, &path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::database::legacy::local_maps::{self, LocalMapsDump};
    use crate::database::scanner::tests::write_set;

    fn rooted_db(root: &Path) -> Arc<Database> {
        let config = DatabaseConfig {
            stable_dump_enabled: false,
            ..DatabaseConfig::rooted(root)
        };
        fs::create_dir_all(config.songs_path()).unwrap();
        Arc::new(Database::new(config))
    }

    fn load(db: &Arc<Database>, mode: LoadMode) -> LoadReport {
        assert!(db.start_load(mode));
        db.join_load().unwrap()
    }

    #[test]
    fn progress_ratio_is_monotonic_and_capped() {
        let progress = LoadProgress::default();
        progress.add_total(100);
        progress.advance(50);
        assert_eq!(progress.ratio(), 0.5);
        progress.add_total(900);
        progress.advance(10);
        assert_eq!(progress.ratio(), 0.5, "a larger total never moves the ratio back");
        progress.advance(10_000);
        assert_eq!(progress.ratio(), MAX_ACTIVE_RATIO);
        progress.finish(LoadState::Finished);
        assert_eq!(progress.ratio(), 1.0);
    }

    #[test]
    fn raw_folders_are_loaded_and_reconciled() {
        let root = tempfile::tempdir().unwrap();
        let db = rooted_db(root.path());
        let songs = db.config().songs_path();
        write_set(&songs, "1 a - one", &["Easy", "Hard"]);
        let two = write_set(&songs, "2 b - two", &["Normal"]);

        let report = load(&db, LoadMode::Full);
        assert_eq!(report.state, LoadState::Finished);
        assert_eq!(report.sets, 2);
        assert_eq!(report.difficulties, 3);
        assert_eq!(report.raw_loaded, 2);
        assert!(report.found_changes);
        assert!(db.is_finished());
        assert_eq!(db.progress().ratio(), 1.0);

        fs::remove_dir_all(&two).unwrap();
        write_set(&songs, "3 c - three", &["Insane"]);
        let report = load(&db, LoadMode::Refresh);
        assert_eq!(report.removed, 1);
        assert_eq!(report.raw_loaded, 1);
        assert_eq!(report.sets, 2);
        assert!(db.found_changes());

        let report = load(&db, LoadMode::Refresh);
        assert!(!report.found_changes);
    }

    #[test]
    fn truncated_local_dump_falls_back_to_raw_folders() {
        let root = tempfile::tempdir().unwrap();
        let db = rooted_db(root.path());
        let songs = db.config().songs_path();

        let mut sets = Vec::new();
        for i in 0..10 {
            let folder = write_set(&songs, &format!("{} artist - song {}", 100 + i, i), &["Normal"]);
            let mut set = scanner::load_raw_beatmap(&folder).unwrap().unwrap();
            set.source = SetSource::LocalDump;
            sets.push(set);
        }
        let full = local_maps::encode(
            &LocalMapsDump {
                sets: sets.clone(),
                overrides: Vec::new(),
            },
            local_maps::CURRENT_VERSION,
        )
        .unwrap();
        let three = local_maps::encode(
            &LocalMapsDump {
                sets: sets[..3].to_vec(),
                overrides: Vec::new(),
            },
            local_maps::CURRENT_VERSION,
        )
        .unwrap();
        // Header of the full dump (claims 10 sets) with only three sets behind it.
        let mut truncated = full[..8].to_vec();
        truncated.extend_from_slice(&three[8..three.len() - 4]);
        fs::create_dir_all(&db.config().data_folder).unwrap();
        fs::write(db.config().local_maps_path(), &truncated).unwrap();

        let report = load(&db, LoadMode::Full);
        assert_eq!(report.state, LoadState::Finished);
        assert_eq!(report.sets, 10);
        assert_eq!(report.raw_loaded, 7);

        let notifications: Vec<_> = db.notifications().try_iter().collect();
        assert!(notifications
            .iter()
            .any(|n| matches!(n, Notification::DumpError { .. })));
        assert!(notifications
            .iter()
            .any(|n| matches!(n, Notification::LoadFinished(_))));
    }

    #[test]
    fn cancellation_stops_a_large_pass() {
        let root = tempfile::tempdir().unwrap();
        let db = rooted_db(root.path());
        let songs = db.config().songs_path();
        for i in 0..400 {
            write_set(&songs, &format!("{} bulk", i), &["A", "B"]);
        }

        assert!(db.start_load(LoadMode::Full));
        assert!(!db.start_load(LoadMode::Full), "second pass refused while running");
        db.cancel_load();
        let report = db.join_load().unwrap();

        assert_eq!(report.state, LoadState::Cancelled);
        assert_eq!(db.progress().state(), LoadState::Cancelled);
        assert!(report.sets < 400);
        assert!(db.progress().ratio() < 1.0);

        let report = load(&db, LoadMode::Full);
        assert_eq!(report.state, LoadState::Finished);
        assert_eq!(report.sets, 400);
    }

    #[test]
    fn missing_songs_folder_yields_no_sets() {
        let root = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::new(DatabaseConfig {
            stable_dump_enabled: false,
            ..DatabaseConfig::rooted(root.path())
        }));
        let report = load(&db, LoadMode::Full);
        assert_eq!(report.state, LoadState::Finished);
        assert_eq!(report.sets, 0);
        assert!(db
            .notifications()
            .try_iter()
            .any(|n| matches!(n, Notification::Warning(_))));
    }

    #[test]
    fn mcosu_scores_and_collections_are_imported() {
        use crate::database::binary::{BinaryWriter, StringPrefix};
        use crate::database::legacy::collections::VERSION_MCOSU;
        use crate::database::legacy::mcosu::tests::{HASH, old_neosu_file};
        use crate::database::models::BeatmapHash;

        let root = tempfile::tempdir().unwrap();
        let mcosu = root.path().join("mcosu");
        fs::create_dir_all(&mcosu).unwrap();
        fs::write(mcosu.join("scores.db"), old_neosu_file(&[100, 200, 200])).unwrap();

        let hash = BeatmapHash::from_hex(HASH).unwrap();
        let mut w = BinaryWriter::new();
        w.write_u32(VERSION_MCOSU);
        w.write_u32(1);
        w.write_string("imported", StringPrefix::Uleb128);
        w.write_u32(1);
        w.write_hash_string(&hash, StringPrefix::Uleb128);
        fs::write(mcosu.join("collections.db"), w.into_bytes()).unwrap();

        let config = DatabaseConfig {
            stable_dump_enabled: false,
            mcosu_folder: Some(mcosu),
            ..DatabaseConfig::rooted(root.path())
        };
        fs::create_dir_all(config.songs_path()).unwrap();
        let db = Arc::new(Database::new(config));

        let report = load(&db, LoadMode::Full);
        assert_eq!(report.state, LoadState::Finished);
        assert_eq!(report.scores, 2, "the repeated timestamp is a duplicate");
        assert_eq!(db.scores_for(&hash)[0].client, "neosu-win64-release-35.10");
        assert_eq!(db.progress().ratio(), 1.0);

        let collections = db.collections();
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].name, "imported");
        assert_eq!(collections[0].maps, vec![hash]);
        assert!(db.notifications().try_iter().all(|n| !matches!(n, Notification::DumpError { .. })));
    }
}
