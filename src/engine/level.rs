//! Points-to-level derivation.
//!
//! The threshold table in [`LEVEL_THRESHOLDS`] is the only level rule in the crate: stored levels,
//! leaderboard badges and progress bars are all derived from it.

use serde::{Deserialize, Serialize};

use crate::constants::{LEVEL_THRESHOLDS, MAX_LEVEL, MIN_LEVEL};

/// Maps a point total to its level. Totals below zero sit in the lowest band.
pub const fn level_of(points: i64) -> i32 {
    let mut i = 0;
    while i < LEVEL_THRESHOLDS.len() {
        let (min_points, level) = LEVEL_THRESHOLDS[i];
        if points >= min_points {
            return level;
        }
        i += 1;
    }

    MIN_LEVEL
}

/// Minimum total needed to reach `level`, `None` for levels outside the table
pub fn threshold_for(level: i32) -> Option<i64> {
    LEVEL_THRESHOLDS
        .iter()
        .find(|(_, lvl)| *lvl == level)
        .map(|(min_points, _)| *min_points)
}

/// Progress-bar data for a point total
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub level: i32,
    pub points: i64,
    /// Total at which the current level starts
    pub level_floor: i64,
    /// Total needed for the next level; absent at the top level
    pub next_level_at: Option<i64>,
    pub points_to_next: i64,
    /// Share of the current band already covered, 0-100
    pub percent: f64,
}

impl LevelProgress {
    pub fn for_points(points: i64) -> Self {
        let level = level_of(points);
        let level_floor = threshold_for(level).unwrap_or(0);

        let next_level_at = if level < MAX_LEVEL {
            threshold_for(level + 1)
        } else {
            None
        };

        let (points_to_next, percent) = match next_level_at {
            Some(next) => {
                let band = (next - level_floor) as f64;
                let covered = (points - level_floor).max(0) as f64;
                ((next - points).max(0), (covered / band * 100.0).clamp(0.0, 100.0))
            }
            None => (0, 100.0),
        };

        Self {
            level,
            points,
            level_floor,
            next_level_at,
            points_to_next,
            percent,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_level_boundaries() {
        assert_eq!(level_of(0), 1);
        assert_eq!(level_of(99), 1);
        assert_eq!(level_of(100), 2);
        assert_eq!(level_of(499), 2);
        assert_eq!(level_of(500), 3);
        assert_eq!(level_of(999), 3);
        assert_eq!(level_of(1000), 4);
        assert_eq!(level_of(4999), 4);
        assert_eq!(level_of(5000), 5);
        assert_eq!(level_of(i64::MAX), 5);
    }

    #[test]
    fn test_negative_totals_stay_at_level_one() {
        assert_eq!(level_of(-1), 1);
        assert_eq!(level_of(i64::MIN), 1);
    }

    #[test]
    fn test_level_is_monotonic() {
        let mut previous = level_of(0);
        for points in 0..=6000 {
            let level = level_of(points);
            assert!(level >= previous, "level dropped at {points}");
            assert!((MIN_LEVEL..=MAX_LEVEL).contains(&level));
            previous = level;
        }
    }

    #[test]
    fn test_progress_mid_band() {
        let progress = LevelProgress::for_points(300);

        assert_eq!(progress.level, 2);
        assert_eq!(progress.level_floor, 100);
        assert_eq!(progress.next_level_at, Some(500));
        assert_eq!(progress.points_to_next, 200);
        assert!((progress.percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_at_top_level() {
        let progress = LevelProgress::for_points(7200);

        assert_eq!(progress.level, 5);
        assert_eq!(progress.next_level_at, None);
        assert_eq!(progress.points_to_next, 0);
        assert_eq!(progress.percent, 100.0);
    }

    #[test]
    fn test_progress_agrees_with_level_of() {
        for points in [0, 99, 100, 499, 500, 999, 1000, 4999, 5000] {
            let progress = LevelProgress::for_points(points);
            assert_eq!(progress.level, level_of(points));
            if let Some(next) = progress.next_level_at {
                assert_eq!(level_of(next), progress.level + 1);
                assert_eq!(level_of(next - 1), progress.level);
            }
        }
    }
}
