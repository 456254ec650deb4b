//! Display intensity ranging.
//!
//! With auto-scale on, every frame gets a percentile stretch computed from a
//! coarse histogram instead of a full sort:
//!
//! 1. seed bounds are the frame's min and max, truncated to integers and
//!    nudged apart by one when equal;
//! 2. a 100-bin histogram is built over the seed bounds;
//! 3. the bins reaching 5% and 95% of the population, widened by one bin,
//!    are mapped back to intensities through the bin centres;
//! 4. the result replaces the seed bounds only when the two ends differ.
//!
//! With auto-scale off the previous range is kept; the first frame falls
//! back to its own min and max.

use gda_core::{GdaError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Number of bins used for auto-scaling.
pub const AUTO_SCALE_BINS: usize = 100;

/// Lower population fraction of the stretch.
pub const LOWER_FRACTION: f64 = 0.05;

/// Upper population fraction of the stretch.
pub const UPPER_FRACTION: f64 = 0.95;

/// Display range in integer intensity units. `min < max` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayRange {
    /// Lowest displayed intensity.
    pub min: i64,
    /// Highest displayed intensity.
    pub max: i64,
}

impl DisplayRange {
    /// Builds a range, nudging `max` up by one when the bounds are equal.
    pub fn new(min: i64, max: i64) -> Self {
        if max <= min {
            Self { min, max: min + 1 }
        } else {
            Self { min, max }
        }
    }
}

/// Fixed-width histogram over `[lo, hi]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    counts: Vec<u64>,
    lo: f64,
    hi: f64,
}

impl Histogram {
    /// Counts the finite `values` that fall in `[lo, hi]`; `hi` itself goes
    /// into the last bin.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new<'a>(bins: usize, lo: f64, hi: f64, values: impl IntoIterator<Item = &'a f64>) -> Self {
        let bins = bins.max(1);
        let mut counts = vec![0u64; bins];
        let width = (hi - lo) / bins as f64;
        if width > 0.0 && width.is_finite() {
            for &v in values {
                if !v.is_finite() || v < lo || v > hi {
                    continue;
                }
                let index = (((v - lo) / width) as usize).min(bins - 1);
                counts[index] += 1;
            }
        }
        Self { counts, lo, hi }
    }

    /// Count per bin.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Lower edge of the first bin.
    pub fn lo(&self) -> f64 {
        self.lo
    }

    /// Upper edge of the last bin.
    pub fn hi(&self) -> f64 {
        self.hi
    }

    /// Centre of each bin.
    #[allow(clippy::cast_precision_loss)]
    pub fn bin_centers(&self) -> Vec<f64> {
        let width = (self.hi - self.lo) / self.counts.len() as f64;
        (0..self.counts.len())
            .map(|i| self.lo + (i as f64 + 0.5) * width)
            .collect()
    }

    /// Total number of counted values.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Smallest index whose cumulative count reaches `fraction` of the total,
/// clamped to the last index.
#[allow(clippy::cast_precision_loss)]
pub fn position_including_fraction(counts: &[u64], fraction: f64) -> usize {
    if counts.is_empty() {
        return 0;
    }
    let total: u64 = counts.iter().sum();
    let threshold = total as f64 * fraction;
    let mut cumulative = 0u64;
    for (j, &c) in counts.iter().enumerate() {
        cumulative += c;
        if cumulative as f64 >= threshold {
            return j.min(counts.len() - 1);
        }
    }
    counts.len() - 1
}

#[allow(clippy::cast_possible_truncation)]
fn truncate(value: f64) -> i64 {
    value.trunc() as i64
}

fn finite_min_max(grid: &Array2<f64>) -> Result<(f64, f64)> {
    grid.iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .ok_or_else(|| GdaError::Processing("frame has no finite values".to_string()))
}

/// Frame min and max as a display range.
pub fn full_range(grid: &Array2<f64>) -> Result<DisplayRange> {
    let (lo, hi) = finite_min_max(grid)?;
    Ok(DisplayRange::new(truncate(lo), truncate(hi)))
}

/// Percentile stretch of `grid`.
#[allow(clippy::cast_precision_loss)]
pub fn auto_range(grid: &Array2<f64>) -> Result<DisplayRange> {
    let seed = full_range(grid)?;
    let histogram = Histogram::new(AUTO_SCALE_BINS, seed.min as f64, seed.max as f64, grid.iter());
    let centers = histogram.bin_centers();
    let last = centers.len() - 1;

    let upper = (position_including_fraction(histogram.counts(), UPPER_FRACTION) + 1).min(last);
    let lower = position_including_fraction(histogram.counts(), LOWER_FRACTION)
        .checked_sub(1)
        .map(|j| j.min(last));

    let new_max = truncate(centers[upper]);
    let new_min = lower.map_or(seed.min, |j| truncate(centers[j]));

    if new_max != new_min {
        Ok(DisplayRange::new(new_min, new_max))
    } else {
        Ok(seed)
    }
}

/// Keeps the display range across frames.
#[derive(Debug, Clone, Default)]
pub struct RangeTracker {
    last: Option<DisplayRange>,
}

impl RangeTracker {
    /// Tracker with no range yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker starting from a fixed range.
    pub fn with_range(range: DisplayRange) -> Self {
        Self { last: Some(range) }
    }

    /// Replaces the kept range.
    pub fn set_range(&mut self, range: DisplayRange) {
        self.last = Some(range);
    }

    /// Last range, if any frame has been ranged.
    pub fn current(&self) -> Option<DisplayRange> {
        self.last
    }

    /// Range for the next frame.
    pub fn update(&mut self, grid: &Array2<f64>, auto_scale: bool) -> Result<DisplayRange> {
        let range = match (auto_scale, self.last) {
            (true, _) => auto_range(grid)?,
            (false, Some(kept)) => kept,
            (false, None) => full_range(grid)?,
        };
        self.last = Some(range);
        Ok(range)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp, clippy::cast_precision_loss)]
mod tests {
    use super::*;

    fn uniform_0_99() -> Array2<f64> {
        Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f64)
    }

    #[test]
    fn test_histogram_counts_and_centers() {
        let values = [0.0, 0.5, 1.0, 2.0, f64::NAN, 5.0];
        let histogram = Histogram::new(4, 0.0, 2.0, values.iter());
        assert_eq!(histogram.counts(), &[1, 1, 1, 1]);
        assert_eq!(histogram.bin_centers(), vec![0.25, 0.75, 1.25, 1.75]);
        assert_eq!(histogram.total(), 4);
    }

    #[test]
    fn test_position_including_fraction() {
        let counts = [1, 1, 1, 1, 1, 1, 1, 1, 1, 1];
        assert_eq!(position_including_fraction(&counts, 0.05), 0);
        assert_eq!(position_including_fraction(&counts, 0.5), 4);
        assert_eq!(position_including_fraction(&counts, 1.0), 9);
        assert_eq!(position_including_fraction(&[0, 0, 0], 0.95), 0);
    }

    #[test]
    fn test_uniform_frame_brackets_ninety_percent() {
        let grid = uniform_0_99();
        let range = auto_range(&grid).unwrap();
        assert_eq!(range, DisplayRange { min: 3, max: 94 });

        let inside = grid
            .iter()
            .filter(|&&v| v >= range.min as f64 && v <= range.max as f64)
            .count();
        assert!((88..=94).contains(&inside), "inside = {inside}");
    }

    #[test]
    fn test_degenerate_frame_differs_by_one() {
        let grid = Array2::from_elem((4, 4), 7.0);
        let range = auto_range(&grid).unwrap();
        assert_eq!(range, DisplayRange { min: 7, max: 8 });

        let mut tracker = RangeTracker::new();
        let fixed = tracker.update(&grid, false).unwrap();
        assert_eq!(fixed.max - fixed.min, 1);
    }

    #[test]
    fn test_outliers_are_clipped() {
        let mut grid = Array2::from_elem((20, 20), 100.0);
        for (i, v) in grid.iter_mut().enumerate() {
            *v += (i % 50) as f64;
        }
        grid[[0, 0]] = 60_000.0;
        let range = auto_range(&grid).unwrap();
        assert!(range.max < 1_000, "range = {range:?}");
    }

    #[test]
    fn test_fixed_range_survives_new_frames() {
        let mut tracker = RangeTracker::with_range(DisplayRange::new(10, 50));
        let frame2 = Array2::from_shape_fn((8, 8), |(r, c)| (r * c) as f64 * 1000.0);
        assert_eq!(tracker.update(&frame2, false).unwrap(), DisplayRange { min: 10, max: 50 });
        assert_eq!(tracker.current(), Some(DisplayRange { min: 10, max: 50 }));
    }

    #[test]
    fn test_first_frame_without_auto_scale_uses_frame_bounds() {
        let mut tracker = RangeTracker::new();
        let grid = Array2::from_shape_vec((1, 3), vec![-2.7, 4.0, 12.9]).unwrap();
        assert_eq!(tracker.update(&grid, false).unwrap(), DisplayRange { min: -2, max: 12 });
    }

    #[test]
    fn test_nan_frame_is_a_processing_error() {
        let grid = Array2::from_elem((2, 2), f64::NAN);
        assert!(matches!(auto_range(&grid), Err(GdaError::Processing(_))));
    }
}
