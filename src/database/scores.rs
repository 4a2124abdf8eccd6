//! Score index keyed by beatmap hash, plus player statistics.

use crate::database::legacy::scores::BeatmapScores;
use crate::database::models::BeatmapHash;
use crate::database::score::{FinishedScore, ScoreSortMethod};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddScoreOutcome {
    Inserted,
    Duplicate,
}

/// Append-mostly score log. A score is identified by its beatmap hash and
/// unix timestamp; a second insert with the same pair is refused.
#[derive(Debug)]
pub struct ScoreStore {
    scores: HashMap<BeatmapHash, Vec<FinishedScore>>,
    keys: HashSet<(BeatmapHash, u64)>,
    sort_method: ScoreSortMethod,
    changed: Arc<AtomicBool>,
}

impl Default for ScoreStore {
    fn default() -> Self {
        Self::new(ScoreSortMethod::default())
    }
}

impl ScoreStore {
    pub fn new(sort_method: ScoreSortMethod) -> Self {
        Self {
            scores: HashMap::new(),
            keys: HashSet::new(),
            sort_method,
            changed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raised on every insert or delete; consumers clear it once they have
    /// recomputed whatever depends on the scores.
    pub fn changed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.changed)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.scores.clear();
        self.keys.clear();
        self.changed.store(true, Ordering::Release);
    }

    pub fn contains(&self, hash: &BeatmapHash, unix_timestamp: u64) -> bool {
        self.keys.contains(&(*hash, unix_timestamp))
    }

    /// Inserts without re-sorting, for bulk imports. Call [`Self::sort_all`]
    /// afterwards.
    pub fn add_score_raw(&mut self, score: FinishedScore) -> AddScoreOutcome {
        if !self.keys.insert((score.beatmap_hash, score.unix_timestamp)) {
            return AddScoreOutcome::Duplicate;
        }
        self.scores.entry(score.beatmap_hash).or_default().push(score);
        self.changed.store(true, Ordering::Release);
        AddScoreOutcome::Inserted
    }

    pub fn add_score(&mut self, score: FinishedScore) -> AddScoreOutcome {
        let hash = score.beatmap_hash;
        let outcome = self.add_score_raw(score);
        if outcome == AddScoreOutcome::Inserted {
            self.sort_scores(&hash);
        }
        outcome
    }

    pub fn delete_score(&mut self, hash: &BeatmapHash, unix_timestamp: u64) -> bool {
        if !self.keys.remove(&(*hash, unix_timestamp)) {
            return false;
        }
        if let Some(list) = self.scores.get_mut(hash) {
            list.retain(|s| s.unix_timestamp != unix_timestamp);
            if list.is_empty() {
                self.scores.remove(hash);
            }
        }
        self.changed.store(true, Ordering::Release);
        true
    }

    pub fn scores_for(&self, hash: &BeatmapHash) -> &[FinishedScore] {
        self.scores.get(hash).map_or(&[], Vec::as_slice)
    }

    pub fn sort_method(&self) -> ScoreSortMethod {
        self.sort_method
    }

    pub fn set_sort_method(&mut self, method: ScoreSortMethod) {
        self.sort_method = method;
        self.sort_all();
    }

    pub fn sort_scores(&mut self, hash: &BeatmapHash) {
        let method = self.sort_method;
        if let Some(list) = self.scores.get_mut(hash) {
            list.sort_by(|a, b| method.compare(a, b));
        }
    }

    pub fn sort_all(&mut self) {
        let method = self.sort_method;
        for list in self.scores.values_mut() {
            list.sort_by(|a, b| method.compare(a, b));
        }
    }

    /// Snapshot grouped by beatmap, ordered by hash for stable output.
    pub fn groups(&self) -> Vec<BeatmapScores> {
        let mut groups: Vec<BeatmapScores> = self
            .scores
            .iter()
            .map(|(hash, scores)| BeatmapScores {
                hash: *hash,
                scores: scores.clone(),
            })
            .collect();
        groups.sort_by_key(|g| g.hash);
        groups
    }

    /// Every player with at least one score, plus `local_player`.
    pub fn player_names(&self, local_player: &str) -> Vec<String> {
        let mut names: HashSet<&str> = self
            .scores
            .values()
            .flatten()
            .map(|s| s.player_name.as_str())
            .collect();
        names.insert(local_player);
        let mut names: Vec<String> = names
            .into_iter()
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Best-pp score per beatmap for `player`, highest pp first.
    pub fn player_pp_scores(&self, player: &str, include_relax: bool) -> PlayerPpScores {
        let mut best = Vec::new();
        let mut total_score = 0u64;
        for list in self.scores.values() {
            let mut top: Option<&FinishedScore> = None;
            for score in list {
                if score.player_name != player {
                    continue;
                }
                if score.mods.uses_relax_or_autopilot() && !include_relax {
                    continue;
                }
                total_score += score.score;
                if score.pp() < 0.0 {
                    continue;
                }
                if top.is_none_or(|t| score.pp() > t.pp()) {
                    top = Some(score);
                }
            }
            if let Some(top) = top {
                best.push(top.clone());
            }
        }
        best.sort_by(|a, b| ScoreSortMethod::Pp.compare(a, b));
        PlayerPpScores {
            scores: best,
            total_score,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlayerPpScores {
    pub scores: Vec<FinishedScore>,
    pub total_score: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerStats {
    pub name: String,
    pub pp: f32,
    pub accuracy: f32,
    pub num_scores_with_pp: usize,
    pub level: i32,
    pub percent_to_next_level: f32,
    pub total_score: u64,
}

impl PlayerStats {
    /// Weighted totals as osu! computes them: the n-th best score counts
    /// with weight 0.95^n, accuracy uses the same weights.
    pub fn compute(name: &str, pp_scores: &PlayerPpScores, bonus: bool) -> Self {
        let count = pp_scores.scores.len();
        let mut pp = 0.0f32;
        let mut accuracy = 0.0f32;
        for (i, score) in pp_scores.scores.iter().enumerate() {
            let weight = weight_for_index(i);
            pp += score.pp().max(0.0) * weight;
            accuracy += score.accuracy() * weight;
        }
        if bonus {
            pp += bonus_pp(count);
        }
        if count > 0 {
            accuracy /= 20.0 * (1.0 - weight_for_index(count));
        }

        let total_score = pp_scores.total_score;
        let level = level_for_score(total_score, MAX_LEVEL);
        let current = required_score_for_level(level);
        let next = required_score_for_level(level + 1);
        let percent_to_next_level = if next > current && total_score >= current {
            ((total_score - current) as f64 / (next - current) as f64) as f32
        } else {
            0.0
        };

        Self {
            name: name.to_string(),
            pp,
            accuracy,
            num_scores_with_pp: count,
            level,
            percent_to_next_level,
            total_score,
        }
    }
}

pub const MAX_LEVEL: i32 = 120;

pub fn weight_for_index(i: usize) -> f32 {
    0.95f64.powi(i.min(i32::MAX as usize) as i32) as f32
}

pub fn bonus_pp(num_scores: usize) -> f32 {
    let n = num_scores.min(1000) as i32;
    ((417.0 - 1.0 / 3.0) * (1.0 - 0.995f64.powi(n))) as f32
}

/// Total score needed to reach `level` on the osu! level curve.
pub fn required_score_for_level(level: i32) -> u64 {
    if level <= 100 {
        if level <= 1 {
            return 1;
        }
        let l = f64::from(level);
        let cubic = 4.0 * l.powi(3) - 3.0 * l.powi(2) - l;
        return (1666.0 * cubic + (1.25 * 1.8f64.powf(l - 60.0)).floor()).floor() as u64;
    }
    26_931_190_829 + 100_000_000_000 * (level - 100) as u64
}

pub fn level_for_score(score: u64, max_level: i32) -> i32 {
    let mut level = 0;
    loop {
        if max_level > 0 && level >= max_level {
            return level;
        }
        if score < required_score_for_level(level) {
            return (level - 1).max(0);
        }
        level += 1;
    }
}
