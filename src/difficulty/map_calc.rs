//! Background computation of nomod star ratings and object statistics for
//! beatmaps imported without them.

use super::MapMetrics;
use super::bpm::{bpm_info, samples_from_map};
use super::calculator::{CalcError, CalcStrategy, check_stop};
use crate::cancel::CancelToken;
use crate::database::models::BeatmapHash;
use crate::database::scanner::summarize_objects;
use crate::database::store::SharedBeatmapStore;
use crate::lock;
use std::fs;
use std::sync::Arc;

/// One pass of the map calc job over a store. Each load pass gets a new
/// number so a reload restarts the job even though the store is the same.
pub struct MapCalcBatch {
    pub store: SharedBeatmapStore,
    pub pass: u64,
}

impl PartialEq for MapCalcBatch {
    fn eq(&self, other: &Self) -> bool {
        self.pass == other.pass && Arc::ptr_eq(&self.store, &other.store)
    }
}

#[derive(Debug, Default)]
pub struct MapCalc;

impl CalcStrategy for MapCalc {
    type Target = MapCalcBatch;
    type Request = BeatmapHash;
    type Output = MapMetrics;
    type Memo = ();

    fn name(&self) -> &str {
        "mapcalc"
    }

    fn compute(
        &self,
        target: &MapCalcBatch,
        _memo: &mut (),
        hash: &BeatmapHash,
        stop: &CancelToken,
    ) -> Result<MapMetrics, CalcError> {
        check_stop(stop)?;
        // Only the path is needed; the store lock is not held while parsing.
        let path = lock(&target.store)
            .find(hash)
            .map(|diff| diff.path())
            .ok_or_else(|| CalcError::InvalidBeatmap(format!("{} is not in the store", hash)))?;

        let bytes = fs::read(&path)?;
        check_stop(stop)?;
        compute_map_metrics(&bytes)
    }
}

/// Parses an `.osu` file and computes its nomod star rating, object counts,
/// BPM summary and length.
pub fn compute_map_metrics(bytes: &[u8]) -> Result<MapMetrics, CalcError> {
    let map = rosu_map::Beatmap::from_bytes(bytes)
        .map_err(|e| CalcError::InvalidBeatmap(e.to_string()))?;
    if map.hit_objects.is_empty() {
        return Err(CalcError::InvalidBeatmap("no hit objects".into()));
    }
    let objects = summarize_objects(&map);

    let pp_map = rosu_pp::Beatmap::from_bytes(bytes)
        .map_err(|e| CalcError::InvalidBeatmap(e.to_string()))?;
    let stars = rosu_pp::Difficulty::new().calculate(&pp_map).stars();

    Ok(MapMetrics {
        stars_nomod: stars,
        bpm: bpm_info(&samples_from_map(&map), objects.end_time_ms),
        circles: objects.circles,
        sliders: objects.sliders,
        spinners: objects.spinners,
        length_ms: objects.end_time_ms.max(0.0) as u32,
    })
}
