//! New-high grade classification.
//!
//! Grades are tried from most to least exclusive. A day that is the highest
//! high of the entire history is automatically the highest of every shorter
//! window, so the first window whose maximum the day's high reaches wins.

use super::helpers::{calendar_window_start, max_high, month_window_start};
use crate::{NewHighGrade, OHLCV};

/// Grade windows in calendar days. `None` means the whole available history.
pub const GRADE_WINDOWS: [(NewHighGrade, Option<u64>); 6] = [
    (NewHighGrade::S, None),
    (NewHighGrade::A, Some(3650)),
    (NewHighGrade::B, Some(1825)),
    (NewHighGrade::C, Some(730)),
    (NewHighGrade::D, Some(365)),
    (NewHighGrade::E, Some(180)),
];

/// Classify how far back the high at `index` is unmatched.
///
/// Returns `None` when `index` is outside `bars`; callers skip such days
/// rather than defaulting to [`NewHighGrade::F`].
pub fn classify_new_high<T: OHLCV>(bars: &[T], index: usize) -> Option<NewHighGrade> {
    let peak = max_high(bars.get(..=index)?)?;
    classify_new_high_with_peak(bars, index, peak)
}

/// Like [`classify_new_high`], with `peak` the highest high of `bars[..=index]`.
///
/// Scanners carry `peak` as a running maximum so the whole-history check is
/// O(1); the remaining windows span a bounded number of calendar days.
pub fn classify_new_high_with_peak<T: OHLCV>(
    bars: &[T],
    index: usize,
    peak: f64,
) -> Option<NewHighGrade> {
    let current = bars.get(index)?.high();

    for (grade, days) in GRADE_WINDOWS {
        let window_max = match days {
            None => peak,
            Some(days) => max_high(&bars[calendar_window_start(bars, index, days)..=index])?,
        };
        if current >= window_max {
            return Some(grade);
        }
    }

    Some(NewHighGrade::F)
}

/// True if the high at `index` reaches the maximum high of the trailing `months`.
pub fn is_new_high_within_months<T: OHLCV>(bars: &[T], index: usize, months: u32) -> bool {
    let Some(current) = bars.get(index) else {
        return false;
    };
    let start = month_window_start(bars, index, months);
    max_high(&bars[start..=index]).is_some_and(|m| current.high() >= m)
}
