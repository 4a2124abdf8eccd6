//! Authoritative in-memory beatmap index.
//!
//! Difficulties live in one hash-keyed map; sets only list the hashes they
//! group. Every hash listed by a set is present in the map and every entry in
//! the map belongs to exactly one set. The beatmap-id index is derived and is
//! rebuilt on demand after mutations.

use crate::database::models::{BeatmapDifficulty, BeatmapHash, BeatmapSet, MapOverrides, SetSource};
use crate::difficulty::MapMetrics;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Store handle shared by the loader, the query surface and the calc jobs.
pub type SharedBeatmapStore = Arc<Mutex<BeatmapStore>>;

#[derive(Debug, Clone)]
struct SetEntry {
    set_id: i32,
    folder: PathBuf,
    folder_mtime: Option<SystemTime>,
    source: SetSource,
    hashes: Vec<BeatmapHash>,
}

#[derive(Debug, Default)]
pub struct BeatmapStore {
    sets: Vec<SetEntry>,
    set_by_folder: HashMap<PathBuf, usize>,
    difficulties: HashMap<BeatmapHash, BeatmapDifficulty>,
    owner: HashMap<BeatmapHash, PathBuf>,
    by_id: Option<HashMap<i32, BeatmapHash>>,
    pending_star_calc: Vec<BeatmapHash>,
    pending_loudness: Vec<BeatmapHash>,
    queued_loudness: HashSet<BeatmapHash>,
}

impl BeatmapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedBeatmapStore {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn difficulty_count(&self) -> usize {
        self.difficulties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Inserts `set`, replacing whatever was stored for the same folder.
    /// A hash already owned by another folder moves to this one.
    pub fn upsert_set(&mut self, set: BeatmapSet) {
        let BeatmapSet {
            set_id,
            folder,
            folder_mtime,
            source,
            difficulties,
        } = set;

        self.remove_set(&folder);

        let mut hashes = Vec::with_capacity(difficulties.len());
        for mut diff in difficulties {
            if hashes.contains(&diff.hash) {
                log::warn!("DB: {} listed twice in {:?}", diff.hash, folder);
                hashes.retain(|h| *h != diff.hash);
            } else if let Some(previous) = self.owner.get(&diff.hash).cloned() {
                log::warn!(
                    "DB: {} appears in {:?} and {:?}, keeping the latter",
                    diff.hash,
                    previous,
                    folder
                );
                self.detach_hash(&previous, &diff.hash);
            }

            diff.folder = folder.clone();
            if diff.needs_star_calc() {
                self.pending_star_calc.push(diff.hash);
            }
            if diff.overrides.loudness == 0.0 {
                self.queue_loudness(diff.hash);
            }
            hashes.push(diff.hash);
            self.owner.insert(diff.hash, folder.clone());
            self.difficulties.insert(diff.hash, diff);
        }

        if hashes.is_empty() {
            return;
        }
        self.set_by_folder.insert(folder.clone(), self.sets.len());
        self.sets.push(SetEntry {
            set_id,
            folder,
            folder_mtime,
            source,
            hashes,
        });
        self.by_id = None;
    }

    /// Removes one hash from the set at `folder`, dropping the set if it
    /// becomes empty.
    fn detach_hash(&mut self, folder: &Path, hash: &BeatmapHash) {
        let Some(&index) = self.set_by_folder.get(folder) else {
            return;
        };
        self.sets[index].hashes.retain(|h| h != hash);
        self.difficulties.remove(hash);
        self.owner.remove(hash);
        self.unqueue_loudness(hash);
        if self.sets[index].hashes.is_empty() {
            self.remove_set(folder);
        }
    }

    pub fn remove_set(&mut self, folder: &Path) -> bool {
        let Some(index) = self.set_by_folder.remove(folder) else {
            return false;
        };
        let entry = self.sets.remove(index);
        for hash in &entry.hashes {
            self.difficulties.remove(hash);
            self.owner.remove(hash);
            self.unqueue_loudness(hash);
        }
        for slot in self.set_by_folder.values_mut() {
            if *slot > index {
                *slot -= 1;
            }
        }
        self.by_id = None;
        true
    }

    pub fn find(&self, hash: &BeatmapHash) -> Option<&BeatmapDifficulty> {
        self.difficulties.get(hash)
    }

    pub fn find_by_id(&mut self, id: i32) -> Option<&BeatmapDifficulty> {
        if id <= 0 {
            return None;
        }
        let index = self.by_id.get_or_insert_with(|| {
            self.difficulties
                .values()
                .filter(|d| d.id > 0)
                .map(|d| (d.id, d.hash))
                .collect()
        });
        let hash = *index.get(&id)?;
        self.difficulties.get(&hash)
    }

    pub fn contains_folder(&self, folder: &Path) -> bool {
        self.set_by_folder.contains_key(folder)
    }

    pub fn folder_mtime(&self, folder: &Path) -> Option<Option<SystemTime>> {
        let index = *self.set_by_folder.get(folder)?;
        Some(self.sets[index].folder_mtime)
    }

    pub fn folder_source(&self, folder: &Path) -> Option<SetSource> {
        let index = *self.set_by_folder.get(folder)?;
        Some(self.sets[index].source)
    }

    pub fn folders(&self) -> Vec<PathBuf> {
        self.sets.iter().map(|s| s.folder.clone()).collect()
    }

    fn materialize(&self, entry: &SetEntry) -> BeatmapSet {
        BeatmapSet {
            set_id: entry.set_id,
            folder: entry.folder.clone(),
            folder_mtime: entry.folder_mtime,
            source: entry.source,
            difficulties: entry
                .hashes
                .iter()
                .filter_map(|h| self.difficulties.get(h).cloned())
                .collect(),
        }
    }

    /// Snapshot of every set in insertion order.
    pub fn all_sets(&self) -> Vec<BeatmapSet> {
        self.sets.iter().map(|e| self.materialize(e)).collect()
    }

    pub fn sets_from(&self, source: SetSource) -> Vec<BeatmapSet> {
        self.sets
            .iter()
            .filter(|e| e.source == source)
            .map(|e| self.materialize(e))
            .collect()
    }

    pub fn find_set_by_id(&self, set_id: i32) -> Option<BeatmapSet> {
        if set_id <= 0 {
            return None;
        }
        self.sets
            .iter()
            .find(|e| e.set_id == set_id)
            .map(|e| self.materialize(e))
    }

    pub fn set_overrides(&mut self, hash: &BeatmapHash, overrides: MapOverrides) -> bool {
        match self.difficulties.get_mut(hash) {
            Some(diff) => {
                diff.overrides = overrides;
                true
            }
            None => false,
        }
    }

    /// Applies results of the map calc job in place.
    pub fn apply_metrics(&mut self, hash: &BeatmapHash, metrics: &MapMetrics) -> bool {
        let Some(diff) = self.difficulties.get_mut(hash) else {
            return false;
        };
        diff.stars_nomod = metrics.stars_nomod;
        diff.bpm = metrics.bpm;
        diff.circles = metrics.circles;
        diff.sliders = metrics.sliders;
        diff.spinners = metrics.spinners;
        if metrics.length_ms > 0 {
            diff.length_ms = metrics.length_ms;
        }
        true
    }

    pub fn apply_stars(&mut self, hash: &BeatmapHash, stars: f64) -> bool {
        match self.difficulties.get_mut(hash) {
            Some(diff) => {
                diff.stars_nomod = stars;
                true
            }
            None => false,
        }
    }

    pub fn apply_loudness(&mut self, hash: &BeatmapHash, loudness: f32) -> bool {
        match self.difficulties.get_mut(hash) {
            Some(diff) => {
                diff.overrides.loudness = loudness;
                if loudness != 0.0 {
                    self.unqueue_loudness(hash);
                }
                true
            }
            None => false,
        }
    }

    fn queue_loudness(&mut self, hash: BeatmapHash) {
        if self.queued_loudness.insert(hash) {
            self.pending_loudness.push(hash);
        }
    }

    /// Compacts the queue once stale slots outnumber live ones.
    fn unqueue_loudness(&mut self, hash: &BeatmapHash) {
        if !self.queued_loudness.remove(hash) {
            return;
        }
        if self.pending_loudness.len() > 2 * self.queued_loudness.len() + 64 {
            let queued = &self.queued_loudness;
            self.pending_loudness.retain(|h| queued.contains(h));
        }
    }

    /// Hashes queued for star recalculation, deduplicated and filtered to
    /// difficulties that still exist and still need it.
    pub fn take_pending_star_calc(&mut self) -> Vec<BeatmapHash> {
        let mut seen = HashSet::new();
        std::mem::take(&mut self.pending_star_calc)
            .into_iter()
            .filter(|h| seen.insert(*h))
            .filter(|h| self.difficulties.get(h).is_some_and(|d| d.needs_star_calc()))
            .collect()
    }

    /// Loudness is measured by the audio collaborator; the store only keeps
    /// the queue.
    pub fn take_pending_loudness(&mut self) -> Vec<BeatmapHash> {
        let mut queued = std::mem::take(&mut self.queued_loudness);
        std::mem::take(&mut self.pending_loudness)
            .into_iter()
            .filter(|h| queued.remove(h))
            .filter(|h| self.difficulties.get(h).is_some_and(|d| d.overrides.loudness == 0.0))
            .collect()
    }

    #[cfg(test)]
    fn pending_loudness_len(&self) -> usize {
        self.pending_loudness.len()
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let mut listed = HashSet::new();
        for (i, entry) in self.sets.iter().enumerate() {
            assert_eq!(self.set_by_folder.get(&entry.folder), Some(&i));
            for hash in &entry.hashes {
                assert!(listed.insert(*hash), "{} listed by two sets", hash);
                assert!(self.difficulties.contains_key(hash));
                assert_eq!(self.owner.get(hash), Some(&entry.folder));
            }
        }
        assert_eq!(listed.len(), self.difficulties.len());
        assert_eq!(self.set_by_folder.len(), self.sets.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(hash: u8, id: i32) -> BeatmapDifficulty {
        BeatmapDifficulty {
            hash: BeatmapHash([hash; 16]),
            id,
            stars_nomod: 3.0,
            overrides: MapOverrides {
                loudness: -8.0,
                ..MapOverrides::default()
            },
            ..BeatmapDifficulty::default()
        }
    }

    fn set(folder: &str, diffs: Vec<BeatmapDifficulty>) -> BeatmapSet {
        BeatmapSet {
            difficulties: diffs,
            ..BeatmapSet::new(1, folder, SetSource::Raw)
        }
    }

    #[test]
    fn upsert_and_find() {
        let mut store = BeatmapStore::new();
        store.upsert_set(set("a", vec![diff(1, 10), diff(2, 11)]));
        store.upsert_set(set("b", vec![diff(3, 12)]));
        store.assert_consistent();

        assert_eq!(store.set_count(), 2);
        assert_eq!(store.find(&BeatmapHash([2; 16])).unwrap().id, 11);
        assert_eq!(store.find_by_id(12).unwrap().hash, BeatmapHash([3; 16]));
        assert!(store.find_by_id(99).is_none());
        let folders: Vec<_> = store.all_sets().into_iter().map(|s| s.folder).collect();
        assert_eq!(folders, vec![PathBuf::from("a"), PathBuf::from("b")]);
    }

    #[test]
    fn replacing_a_set_rekeys_hashes() {
        let mut store = BeatmapStore::new();
        store.upsert_set(set("a", vec![diff(1, 10), diff(2, 11)]));
        store.upsert_set(set("a", vec![diff(2, 11), diff(4, 13)]));
        store.assert_consistent();

        assert!(store.find(&BeatmapHash([1; 16])).is_none());
        assert!(store.find(&BeatmapHash([4; 16])).is_some());
        assert_eq!(store.set_count(), 1);
    }

    #[test]
    fn duplicate_hash_last_write_wins() {
        let mut store = BeatmapStore::new();
        store.upsert_set(set("a", vec![diff(1, 10)]));
        store.upsert_set(set("b", vec![diff(2, 11)]));
        let mut moved = diff(1, 10);
        moved.difficulty_name = "copy".into();
        store.upsert_set(set("c", vec![moved]));
        store.assert_consistent();

        // "a" lost its only difficulty and is gone.
        assert!(!store.contains_folder(Path::new("a")));
        let found = store.find(&BeatmapHash([1; 16])).unwrap();
        assert_eq!(found.difficulty_name, "copy");
        assert_eq!(found.folder, PathBuf::from("c"));
    }

    #[test]
    fn remove_set_keeps_indices_valid() {
        let mut store = BeatmapStore::new();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            store.upsert_set(set(name, vec![diff(i as u8 + 1, 0)]));
        }
        assert!(store.remove_set(Path::new("a")));
        assert!(!store.remove_set(Path::new("a")));
        store.assert_consistent();
        store.upsert_set(set("c", vec![diff(9, 0)]));
        store.assert_consistent();
    }

    #[test]
    fn pending_queues_filter_stale_entries() {
        let mut store = BeatmapStore::new();
        let mut uncalculated = diff(1, 0);
        uncalculated.stars_nomod = -1.0;
        uncalculated.overrides.loudness = 0.0;
        store.upsert_set(set("a", vec![uncalculated.clone(), diff(2, 0)]));
        store.upsert_set(set("a", vec![uncalculated]));

        assert_eq!(store.take_pending_star_calc(), vec![BeatmapHash([1; 16])]);
        assert!(store.take_pending_star_calc().is_empty());
        assert_eq!(store.take_pending_loudness(), vec![BeatmapHash([1; 16])]);

        let metrics = MapMetrics {
            stars_nomod: 4.2,
            ..MapMetrics::default()
        };
        assert!(store.apply_metrics(&BeatmapHash([1; 16]), &metrics));
        assert_eq!(store.find(&BeatmapHash([1; 16])).unwrap().stars_nomod, 4.2);
    }

    #[test]
    fn loudness_queue_stays_bounded_across_upserts() {
        let mut store = BeatmapStore::new();
        let mut quiet = diff(1, 0);
        quiet.overrides.loudness = 0.0;
        for _ in 0..1000 {
            store.upsert_set(set("a", vec![quiet.clone()]));
        }
        // Hashes come and go without anyone draining the queue.
        for round in 0..1000u32 {
            let mut other = diff(0, 0);
            other.hash = BeatmapHash::of_bytes(&round.to_le_bytes());
            other.overrides.loudness = 0.0;
            store.upsert_set(set("b", vec![other]));
        }
        assert!(store.pending_loudness_len() <= 2 * 2 + 64, "{}", store.pending_loudness_len());

        let drained = store.take_pending_loudness();
        assert_eq!(drained.len(), 2);
        assert!(drained.contains(&BeatmapHash([1; 16])));

        store.upsert_set(set("a", vec![quiet]));
        assert!(store.apply_loudness(&BeatmapHash([1; 16]), -7.5));
        assert!(store.take_pending_loudness().is_empty());
    }
}
