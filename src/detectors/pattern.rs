//! D / D+1 / D+2 volume pattern classification for Block 2 candidates.

use super::helpers::mean_volume;
use crate::{PatternKind, Period, OHLCV};

/// Baseline volume for the candidate at `d_index`.
///
/// Mean volume over the `avg_window` records strictly before `d_index`. With
/// fewer prior records than that the baseline falls back to half the
/// candidate's own volume.
pub fn pattern_baseline<T: OHLCV>(bars: &[T], d_index: usize, avg_window: Period) -> f64 {
    let window = avg_window.get();
    let Some(current) = bars.get(d_index) else {
        return 0.0;
    };
    if d_index >= window {
        mean_volume(&bars[d_index - window..d_index]).unwrap_or(0.0)
    } else {
        current.volume() as f64 * 0.5
    }
}

/// Classify whether D+1 and/or D+2 carry volume of at least
/// `threshold_pct` percent of the baseline. Missing days count as not elevated.
pub fn classify_pattern<T: OHLCV>(
    bars: &[T],
    d_index: usize,
    avg_window: Period,
    threshold_pct: f64,
) -> PatternKind {
    if d_index >= bars.len() {
        return PatternKind::DOnly;
    }

    let threshold = pattern_baseline(bars, d_index, avg_window) * threshold_pct / 100.0;
    let elevated = |offset: usize| {
        bars.get(d_index + offset)
            .is_some_and(|b| b.volume() as f64 >= threshold)
    };

    PatternKind::from_flags(elevated(1), elevated(2))
}
