//! The database handle the rest of the client talks to.
//!
//! `Database` is created once and shared as an `Arc`. Every store sits behind
//! its own mutex; readers take short locks and get owned snapshots back.

use crate::config::DatabaseConfig;
use crate::database::binary::write_atomic;
use crate::database::collections::{Collection, CollectionStore};
use crate::database::legacy::collections as collection_dump;
use crate::database::legacy::local_maps::{self, LocalMapsDump, OverrideEntry};
use crate::database::legacy::scores as score_dump;
use crate::database::legacy::ParseError;
use crate::database::loader::{DatabaseLoader, LoadMode, LoadProgress, LoadReport};
use crate::database::models::{BeatmapDifficulty, BeatmapHash, BeatmapSet, MapOverrides, SetSource};
use crate::database::score::{FinishedScore, ScoreSortMethod};
use crate::database::scores::{AddScoreOutcome, PlayerStats, ScoreStore};
use crate::database::stars_cache::StarsCache;
use crate::database::store::{BeatmapStore, SharedBeatmapStore};
use crate::difficulty::cache::CalcCache;
use crate::difficulty::leaderboard::{CalcRequest, CalcResult, LeaderboardPp, PpTarget};
use crate::difficulty::map_calc::{MapCalc, MapCalcBatch};
use crate::lock;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Events for the owner of the database, drained from [`Database::notifications`].
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    LoadFinished(LoadReport),
    LoadCancelled,
    /// A dump could not be read completely; whatever came before the error
    /// was kept.
    DumpError { file: std::path::PathBuf, error: String },
    Warning(String),
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Encode(#[from] ParseError),
}

pub struct Database {
    config: DatabaseConfig,
    store: SharedBeatmapStore,
    scores: Mutex<ScoreStore>,
    collections: Mutex<CollectionStore>,
    stars_cache: Mutex<StarsCache>,

    progress: LoadProgress,
    loader: DatabaseLoader,
    found_changes: AtomicBool,

    scores_changed: Arc<AtomicBool>,
    stats_cache: Mutex<HashMap<String, PlayerStats>>,

    map_calc: CalcCache<MapCalc>,
    map_calc_pass: AtomicU64,
    map_calc_waiting: Mutex<Vec<BeatmapHash>>,
    leaderboard_pp: CalcCache<LeaderboardPp>,

    notify_tx: Sender<Notification>,
    notify_rx: Receiver<Notification>,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        let stars_cache = match StarsCache::load(&config.stars_cache_path()) {
            Ok(cache) => cache,
            Err(e) => {
                log::warn!("DB: ignoring stars cache: {}", e);
                StarsCache::new()
            }
        };
        let scores = ScoreStore::new(config.sort_method);
        let scores_changed = scores.changed_flag();
        let (notify_tx, notify_rx) = unbounded();

        Self {
            store: BeatmapStore::shared(),
            scores: Mutex::new(scores),
            collections: Mutex::new(CollectionStore::new()),
            stars_cache: Mutex::new(stars_cache),
            progress: LoadProgress::default(),
            loader: DatabaseLoader::default(),
            found_changes: AtomicBool::new(false),
            scores_changed,
            stats_cache: Mutex::new(HashMap::new()),
            map_calc: CalcCache::new(MapCalc),
            map_calc_pass: AtomicU64::new(0),
            map_calc_waiting: Mutex::new(Vec::new()),
            leaderboard_pp: CalcCache::new(LeaderboardPp),
            notify_tx,
            notify_rx,
            config,
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn progress(&self) -> &LoadProgress {
        &self.progress
    }

    pub(crate) fn store(&self) -> &SharedBeatmapStore {
        &self.store
    }

    pub(crate) fn scores(&self) -> &Mutex<ScoreStore> {
        &self.scores
    }

    pub(crate) fn collections_store(&self) -> &Mutex<CollectionStore> {
        &self.collections
    }

    pub fn notifications(&self) -> &Receiver<Notification> {
        &self.notify_rx
    }

    pub(crate) fn notify(&self, notification: Notification) {
        // The receiver lives in `self`, so this cannot fail.
        let _ = self.notify_tx.send(notification);
    }

    // Loading

    /// Starts a full pass in the background. `false` if one is running.
    pub fn start_load(self: &Arc<Self>, mode: LoadMode) -> bool {
        self.loader.start(Arc::clone(self), mode)
    }

    /// Drops everything in memory and loads it again from disk.
    pub fn reload_full(self: &Arc<Self>) -> bool {
        if self.is_loading() {
            return false;
        }
        self.map_calc.abort();
        self.leaderboard_pp.abort();
        lock(&self.map_calc_waiting).clear();
        self.start_load(LoadMode::Full)
    }

    pub fn cancel_load(&self) {
        self.progress.cancel();
    }

    pub fn join_load(&self) -> Option<LoadReport> {
        self.loader.join()
    }

    pub fn is_loading(&self) -> bool {
        self.progress.state().is_active()
    }

    pub fn is_finished(&self) -> bool {
        self.progress.state() == crate::database::loader::LoadState::Finished
    }

    /// Whether the last pass added, changed or removed any set.
    pub fn found_changes(&self) -> bool {
        self.found_changes.load(Ordering::Acquire)
    }

    pub(crate) fn set_found_changes(&self, value: bool) {
        self.found_changes.store(value, Ordering::Release);
    }

    /// Fills in nomod ratings remembered from an earlier run.
    pub(crate) fn fill_cached_stars(&self, set: &mut BeatmapSet) {
        let cache = lock(&self.stars_cache);
        for diff in &mut set.difficulties {
            if diff.needs_star_calc() {
                if let Some(stars) = cache.get(&diff.hash) {
                    diff.stars_nomod = stars;
                }
            }
        }
    }

    // Beatmaps

    pub fn beatmap_sets(&self) -> Vec<BeatmapSet> {
        lock(&self.store).all_sets()
    }

    pub fn set_count(&self) -> usize {
        lock(&self.store).set_count()
    }

    pub fn find_difficulty(&self, hash: &BeatmapHash) -> Option<BeatmapDifficulty> {
        lock(&self.store).find(hash).cloned()
    }

    pub fn find_difficulty_by_id(&self, id: i32) -> Option<BeatmapDifficulty> {
        lock(&self.store).find_by_id(id).cloned()
    }

    pub fn find_set_by_id(&self, set_id: i32) -> Option<BeatmapSet> {
        lock(&self.store).find_set_by_id(set_id)
    }

    pub fn set_overrides(&self, hash: &BeatmapHash, overrides: MapOverrides) -> bool {
        lock(&self.store).set_overrides(hash, overrides)
    }

    /// Loudness values measured by the audio side.
    pub fn apply_loudness(&self, hash: &BeatmapHash, loudness: f32) -> bool {
        lock(&self.store).apply_loudness(hash, loudness)
    }

    pub fn take_pending_loudness(&self) -> Vec<BeatmapHash> {
        lock(&self.store).take_pending_loudness()
    }

    // Map calc job

    /// Queues `hashes` on a fresh map calc pass. Returns how many were queued.
    pub(crate) fn start_map_calc(&self, hashes: Vec<BeatmapHash>) -> usize {
        if hashes.is_empty() {
            return 0;
        }
        let pass = self.map_calc_pass.fetch_add(1, Ordering::AcqRel) + 1;
        self.map_calc.set_target(Some(Arc::new(MapCalcBatch {
            store: Arc::clone(&self.store),
            pass,
        })));
        for hash in &hashes {
            let _ = self.map_calc.request(*hash);
        }
        log::info!("DB: map calc pass {} queued {} difficulties", pass, hashes.len());
        let count = hashes.len();
        *lock(&self.map_calc_waiting) = hashes;
        count
    }

    /// Moves finished map calc results into the store and the stars cache.
    /// Returns how many difficulties were updated.
    pub fn poll_map_calc(&self) -> usize {
        let mut waiting = lock(&self.map_calc_waiting);
        if waiting.is_empty() {
            return 0;
        }

        let mut applied = 0;
        let mut store = lock(&self.store);
        let mut stars = lock(&self.stars_cache);
        waiting.retain(|hash| {
            // In-flight first: a result is published before its request
            // leaves the pending set.
            if self.map_calc.is_in_flight(hash) {
                return true;
            }
            match self.map_calc.peek(hash) {
                Some(metrics) => {
                    if store.apply_metrics(hash, &metrics) {
                        stars.insert(*hash, metrics.stars_nomod);
                        applied += 1;
                    }
                }
                None => log::debug!("DB: map calc gave up on {}", hash),
            }
            false
        });

        if waiting.is_empty() {
            log::info!("DB: map calc finished");
        }
        applied
    }

    pub fn map_calc_remaining(&self) -> usize {
        lock(&self.map_calc_waiting).len()
    }

    // Scores

    pub fn add_score(&self, score: FinishedScore) -> AddScoreOutcome {
        let outcome = lock(&self.scores).add_score(score);
        if outcome == AddScoreOutcome::Duplicate {
            log::warn!("DB: refusing duplicate score");
        }
        outcome
    }

    pub fn delete_score(&self, hash: &BeatmapHash, unix_timestamp: u64) -> bool {
        lock(&self.scores).delete_score(hash, unix_timestamp)
    }

    pub fn scores_for(&self, hash: &BeatmapHash) -> Vec<FinishedScore> {
        lock(&self.scores).scores_for(hash).to_vec()
    }

    pub fn score_count(&self) -> usize {
        lock(&self.scores).len()
    }

    pub fn set_sort_method(&self, method: ScoreSortMethod) {
        lock(&self.scores).set_sort_method(method);
    }

    pub fn player_names(&self) -> Vec<String> {
        lock(&self.scores).player_names(&self.config.local_player)
    }

    /// Cached per player until a score is added or removed.
    pub fn player_stats(&self, name: &str) -> PlayerStats {
        let mut cache = lock(&self.stats_cache);
        if self.scores_changed.swap(false, Ordering::AcqRel) {
            cache.clear();
        }
        if let Some(stats) = cache.get(name) {
            return stats.clone();
        }

        let pp_scores = lock(&self.scores).player_pp_scores(name, self.config.include_relax_autopilot);
        let stats = PlayerStats::compute(name, &pp_scores, self.config.bonus_pp);
        cache.insert(name.to_string(), stats.clone());
        stats
    }

    pub fn local_player_stats(&self) -> PlayerStats {
        self.player_stats(&self.config.local_player)
    }

    // Leaderboard pp

    /// Points the leaderboard calculator at `hash`. Unknown hashes stop it.
    pub fn select_difficulty(&self, hash: Option<&BeatmapHash>) {
        let target = hash
            .and_then(|h| self.find_difficulty(h))
            .map(|diff| Arc::new(PpTarget::for_difficulty(&diff)));
        self.leaderboard_pp.set_target(target);
    }

    /// pp for `score` on the selected difficulty, or the pending placeholder.
    pub fn score_pp(&self, score: &FinishedScore) -> CalcResult {
        let Some(target) = self.leaderboard_pp.target() else {
            return CalcResult::PENDING;
        };
        if target.hash != score.beatmap_hash {
            return CalcResult::PENDING;
        }
        let Some(diff) = self.find_difficulty(&score.beatmap_hash) else {
            return CalcResult::PENDING;
        };
        CalcResult::or_pending(self.leaderboard_pp.request(CalcRequest::for_score(score, &diff)))
    }

    // Collections

    pub fn collections(&self) -> Vec<Collection> {
        lock(&self.collections).all().to_vec()
    }

    pub fn add_to_collection(&self, name: &str, hash: BeatmapHash) {
        lock(&self.collections).get_or_create(name).add_map(hash);
    }

    pub fn remove_from_collection(&self, name: &str, hash: &BeatmapHash) -> bool {
        let mut collections = lock(&self.collections);
        if collections.get(name).is_none() {
            return false;
        }
        collections.get_or_create(name).remove_map(hash);
        true
    }

    pub fn rename_collection(&self, from: &str, to: &str) -> bool {
        lock(&self.collections).rename(from, to)
    }

    pub fn delete_collection(&self, name: &str) -> bool {
        lock(&self.collections).delete(name)
    }

    // Persistence

    /// Writes the local dumps. Sets from osu!.db are not written; their
    /// user overrides go into the overrides table instead.
    pub fn save(&self) -> Result<(), SaveError> {
        if self.is_loading() {
            log::warn!("DB: not saving while a load pass is running");
            return Ok(());
        }

        let dump = {
            let store = lock(&self.store);
            let mut sets = store.sets_from(SetSource::LocalDump);
            sets.extend(store.sets_from(SetSource::Raw));
            let overrides = store
                .sets_from(SetSource::StableDump)
                .iter()
                .flat_map(|s| s.difficulties.iter())
                .filter(|d| d.overrides != MapOverrides::default())
                .map(OverrideEntry::from_difficulty)
                .collect();
            LocalMapsDump { sets, overrides }
        };
        let maps = local_maps::encode(&dump, local_maps::CURRENT_VERSION)?;
        write_atomic(&self.config.local_maps_path(), &maps)?;

        let groups = lock(&self.scores).groups();
        let scores = score_dump::encode_local(&groups, score_dump::CURRENT_VERSION)?;
        write_atomic(&self.config.local_scores_path(), &scores)?;

        let collections = lock(&self.collections).to_local();
        let collections = collection_dump::encode_local(&collections, collection_dump::CURRENT_VERSION)?;
        write_atomic(&self.config.local_collections_path(), &collections)?;

        let mut stars = lock(&self.stars_cache);
        if stars.is_dirty() {
            stars.save(&self.config.stars_cache_path())?;
        }

        log::info!(
            "DB: saved {} sets and {} scores",
            dump.sets.len(),
            groups.iter().map(|g| g.scores.len()).sum::<usize>()
        );
        Ok(())
    }
}
