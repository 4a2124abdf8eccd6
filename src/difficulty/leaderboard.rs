//! pp for the scores shown on the leaderboard of the selected beatmap.
//!
//! Scores on one beatmap usually share a handful of mod combinations, so the
//! worker memoizes in two levels: the hit-object geometry for each
//! {speed, AR, CS}, and the star attributes for each
//! {mods, speed, AR, CS, OD, relax, touch device}. The pp step itself is cheap
//! and runs per request.

use super::calculator::{CalcError, CalcStrategy, check_stop};
use crate::cancel::CancelToken;
use crate::database::models::{BeatmapDifficulty, BeatmapHash, Mods};
use crate::database::scanner::{ObjectSummary, summarize_objects};
use crate::database::score::{FinishedScore, PpData};
use ordered_float::OrderedFloat;
use rosu_pp::any::DifficultyAttributes;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::task::Poll;

/// Bumped whenever the values below stop matching previously stored pp.
pub const PP_ALGORITHM_VERSION: u32 = 20250306;

/// The beatmap the leaderboard currently shows.
#[derive(Debug, Clone, PartialEq)]
pub struct PpTarget {
    pub hash: BeatmapHash,
    pub path: PathBuf,
}

impl PpTarget {
    pub fn for_difficulty(diff: &BeatmapDifficulty) -> Self {
        Self {
            hash: diff.hash,
            path: diff.path(),
        }
    }
}

/// AR, CS and OD are base values; mods adjust them like they would in
/// gameplay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalcRequest {
    pub mods: Mods,
    pub speed: OrderedFloat<f32>,
    pub ar: OrderedFloat<f32>,
    pub cs: OrderedFloat<f32>,
    pub od: OrderedFloat<f32>,
    pub relax: bool,
    pub touch_device: bool,
    pub max_combo: u32,
    pub misses: u32,
    pub n300: u32,
    pub n100: u32,
    pub n50: u32,
}

fn override_or(value: f32, fallback: f32) -> f32 {
    if value >= 0.0 { value } else { fallback }
}

impl CalcRequest {
    pub fn for_score(score: &FinishedScore, diff: &BeatmapDifficulty) -> Self {
        let mods = score.mods;
        Self {
            mods: mods.flags,
            speed: OrderedFloat(mods.speed),
            ar: OrderedFloat(override_or(mods.ar_override, diff.ar)),
            cs: OrderedFloat(override_or(mods.cs_override, diff.cs)),
            od: OrderedFloat(override_or(mods.od_override, diff.od)),
            relax: mods.flags.contains(Mods::RELAX),
            touch_device: mods.flags.contains(Mods::TOUCH_DEVICE),
            max_combo: u32::from(score.max_combo),
            misses: u32::from(score.num_misses),
            n300: u32::from(score.num300s),
            n100: u32::from(score.num100s),
            n50: u32::from(score.num50s),
        }
    }

    fn geometry_key(&self) -> GeometryKey {
        GeometryKey {
            speed: self.speed,
            ar: self.ar,
            cs: self.cs,
        }
    }

    fn star_key(&self) -> StarKey {
        StarKey {
            mods: self.mods,
            speed: self.speed,
            ar: self.ar,
            cs: self.cs,
            od: self.od,
            relax: self.relax,
            touch_device: self.touch_device,
        }
    }

    fn effective_mods(&self) -> Mods {
        let mut mods = self.mods;
        mods.set(Mods::RELAX, self.relax);
        mods.set(Mods::TOUCH_DEVICE, self.touch_device);
        mods
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalcResult {
    pub total_stars: f64,
    pub aim_stars: f64,
    pub speed_stars: f64,
    pub aim_slider_factor: f64,
    pub speed_notes: f64,
    pub pp: f64,
    pub max_possible_combo: u32,
}

impl CalcResult {
    /// Shown while the real value is being computed.
    pub const PENDING: CalcResult = CalcResult {
        total_stars: -1.0,
        aim_stars: -1.0,
        speed_stars: -1.0,
        aim_slider_factor: -1.0,
        speed_notes: -1.0,
        pp: -1.0,
        max_possible_combo: 0,
    };

    pub fn or_pending(poll: Poll<CalcResult>) -> CalcResult {
        match poll {
            Poll::Ready(result) => result,
            Poll::Pending => CalcResult::PENDING,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pp < 0.0
    }

    pub fn to_pp_data(&self) -> PpData {
        PpData {
            version: PP_ALGORITHM_VERSION,
            pp: self.pp as f32,
            total_stars: self.total_stars as f32,
            aim_stars: self.aim_stars as f32,
            speed_stars: self.speed_stars as f32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GeometryKey {
    speed: OrderedFloat<f32>,
    ar: OrderedFloat<f32>,
    cs: OrderedFloat<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StarKey {
    mods: Mods,
    speed: OrderedFloat<f32>,
    ar: OrderedFloat<f32>,
    cs: OrderedFloat<f32>,
    od: OrderedFloat<f32>,
    relax: bool,
    touch_device: bool,
}

/// The file as parsed once per target.
struct BaseMap {
    map: rosu_pp::Beatmap,
    objects: ObjectSummary,
    first_object_ms: f64,
}

/// Hit objects with AR and CS applied, plus the values derived from them.
pub struct Geometry {
    map: rosu_pp::Beatmap,
    pub object_count: usize,
    /// First to last object, in real time at this speed.
    pub drain_ms: f64,
    /// Approach time at this speed, before mods.
    pub preempt_ms: f64,
    /// Circle radius in osu!pixels, before mods.
    pub radius: f64,
}

impl Geometry {
    fn build(base: &BaseMap, key: GeometryKey) -> Self {
        let speed = f64::from(key.speed.0).max(0.01);
        let mut map = base.map.clone();
        map.ar = key.ar.0;
        map.cs = key.cs.0;

        Self {
            map,
            object_count: usize::from(base.objects.circles)
                + usize::from(base.objects.sliders)
                + usize::from(base.objects.spinners),
            drain_ms: (base.objects.end_time_ms - base.first_object_ms).max(0.0) / speed,
            preempt_ms: preempt_for_ar(f64::from(key.ar.0)) / speed,
            radius: 54.4 - 4.48 * f64::from(key.cs.0),
        }
    }
}

/// osu!'s AR to approach time mapping.
pub fn preempt_for_ar(ar: f64) -> f64 {
    if ar < 5.0 {
        1200.0 + 600.0 * (5.0 - ar) / 5.0
    } else {
        1200.0 - 750.0 * (ar - 5.0) / 5.0
    }
}

#[derive(Clone)]
struct StarAttributes {
    attributes: DifficultyAttributes,
    aim: f64,
    speed: f64,
    slider_factor: f64,
    speed_notes: f64,
}

#[derive(Default)]
pub struct PpMemo {
    base: Option<Result<BaseMap, CalcError>>,
    geometry: HashMap<GeometryKey, Geometry>,
    stars: HashMap<StarKey, StarAttributes>,
}

impl PpMemo {
    pub fn geometry_count(&self) -> usize {
        self.geometry.len()
    }

    pub fn star_count(&self) -> usize {
        self.stars.len()
    }
}

fn load_base(target: &PpTarget) -> Result<BaseMap, CalcError> {
    let bytes = fs::read(&target.path)?;
    let parsed = rosu_map::Beatmap::from_bytes(&bytes)
        .map_err(|e| CalcError::InvalidBeatmap(e.to_string()))?;
    let map = rosu_pp::Beatmap::from_bytes(&bytes)
        .map_err(|e| CalcError::InvalidBeatmap(e.to_string()))?;
    Ok(BaseMap {
        objects: summarize_objects(&parsed),
        first_object_ms: parsed.hit_objects.first().map_or(0.0, |h| h.start_time),
        map,
    })
}

fn star_attributes(geometry: &Geometry, request: &CalcRequest) -> StarAttributes {
    let attributes = rosu_pp::Difficulty::new()
        .mods(request.effective_mods().bits())
        .clock_rate(f64::from(request.speed.0))
        .od(request.od.0, false)
        .lazer(false)
        .calculate(&geometry.map);

    match &attributes {
        DifficultyAttributes::Osu(osu) => StarAttributes {
            aim: osu.aim,
            speed: osu.speed,
            slider_factor: osu.slider_factor,
            speed_notes: osu.speed_note_count,
            attributes: attributes.clone(),
        },
        _ => StarAttributes {
            aim: -1.0,
            speed: -1.0,
            slider_factor: -1.0,
            speed_notes: -1.0,
            attributes,
        },
    }
}

#[derive(Debug, Default)]
pub struct LeaderboardPp;

impl LeaderboardPp {
    fn geometry<'m>(
        memo: &'m mut PpMemo,
        target: &PpTarget,
        key: GeometryKey,
    ) -> Result<&'m Geometry, CalcError> {
        let base = memo.base.get_or_insert_with(|| load_base(target));
        let base = base.as_ref().map_err(Clone::clone)?;
        Ok(memo
            .geometry
            .entry(key)
            .or_insert_with(|| Geometry::build(base, key)))
    }
}

impl CalcStrategy for LeaderboardPp {
    type Target = PpTarget;
    type Request = CalcRequest;
    type Output = CalcResult;
    type Memo = PpMemo;

    fn name(&self) -> &str {
        "leaderboard-pp"
    }

    fn compute(
        &self,
        target: &PpTarget,
        memo: &mut PpMemo,
        request: &CalcRequest,
        stop: &CancelToken,
    ) -> Result<CalcResult, CalcError> {
        check_stop(stop)?;
        let star_key = request.star_key();

        let stars = match memo.stars.get(&star_key) {
            Some(stars) => stars.clone(),
            None => {
                let geometry = Self::geometry(memo, target, request.geometry_key())?;
                check_stop(stop)?;
                let stars = star_attributes(geometry, request);
                memo.stars.insert(star_key, stars.clone());
                stars
            }
        };
        check_stop(stop)?;

        let max_possible_combo = stars.attributes.max_combo();
        let pp = rosu_pp::Performance::new(stars.attributes.clone())
            .mods(request.effective_mods().bits())
            .clock_rate(f64::from(request.speed.0))
            .lazer(false)
            .combo(request.max_combo)
            .misses(request.misses)
            .n300(request.n300)
            .n100(request.n100)
            .n50(request.n50)
            .calculate()
            .pp();

        Ok(CalcResult {
            total_stars: stars.attributes.stars(),
            aim_stars: stars.aim,
            speed_stars: stars.speed,
            aim_slider_factor: stars.slider_factor,
            speed_notes: stars.speed_notes,
            pp,
            max_possible_combo,
        })
    }
}
