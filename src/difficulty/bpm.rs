//! BPM summary from a list of timing points.

use crate::database::models::BpmInfo;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSample {
    pub ms_per_beat: f64,
    pub offset: f64,
    pub uninherited: bool,
}

/// Min, max and longest-held BPM. The first timing point is treated as
/// starting at 0 like osu!stable does, and the last one lasts until
/// `end_time`.
pub fn bpm_info(points: &[TimingSample], end_time: f64) -> BpmInfo {
    let points: Vec<&TimingSample> = points
        .iter()
        .filter(|p| p.uninherited && p.ms_per_beat > 0.0 && p.ms_per_beat.is_finite())
        .collect();

    let Some(last) = points.last() else {
        return BpmInfo::default();
    };
    let end = end_time.max(last.offset);

    let mut durations: Vec<(i32, f64)> = Vec::new();
    for (i, point) in points.iter().enumerate() {
        let start = if i == 0 { 0.0 } else { point.offset };
        let next = points.get(i + 1).map_or(end, |p| p.offset);
        let duration = (next - start).max(0.0);
        let bpm = (60_000.0 / point.ms_per_beat).round() as i32;

        match durations.iter_mut().find(|(b, _)| *b == bpm) {
            Some((_, total)) => *total += duration,
            None => durations.push((bpm, duration)),
        }
    }

    let mut info = BpmInfo {
        min: i32::MAX,
        max: 0,
        most_common: durations[0].0,
    };
    let mut longest = -1.0;
    for &(bpm, duration) in &durations {
        info.min = info.min.min(bpm);
        info.max = info.max.max(bpm);
        if duration > longest {
            longest = duration;
            info.most_common = bpm;
        }
    }
    info
}

/// Timing points of a parsed `.osu` file. rosu-map keeps only uninherited
/// points in `timing_points`.
pub fn samples_from_map(map: &rosu_map::Beatmap) -> Vec<TimingSample> {
    map.control_points
        .timing_points
        .iter()
        .map(|tp| TimingSample {
            ms_per_beat: tp.beat_len,
            offset: tp.time,
            uninherited: true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(bpm: f64, offset: f64) -> TimingSample {
        TimingSample {
            ms_per_beat: 60_000.0 / bpm,
            offset,
            uninherited: true,
        }
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(bpm_info(&[], 1000.0), BpmInfo::default());
    }

    #[test]
    fn picks_longest_section() {
        let points = [point(120.0, 500.0), point(200.0, 1000.0), point(120.0, 2000.0)];
        let info = bpm_info(&points, 10_000.0);
        assert_eq!(info.min, 120);
        assert_eq!(info.max, 200);
        assert_eq!(info.most_common, 120);
    }

    #[test]
    fn inherited_points_are_ignored() {
        let points = [
            point(180.0, 0.0),
            TimingSample {
                ms_per_beat: -50.0,
                offset: 100.0,
                uninherited: false,
            },
        ];
        let info = bpm_info(&points, 5000.0);
        assert_eq!((info.min, info.max, info.most_common), (180, 180, 180));
    }

    #[test]
    fn fractional_bpm_rounds() {
        let info = bpm_info(&[point(174.6, 0.0)], 1.0);
        assert_eq!(info.most_common, 175);
    }
}
