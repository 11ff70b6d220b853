//! Trailing-window helpers shared by the scanners and classifiers.
//!
//! Every window is clamped at the start of the series: near the beginning of a
//! history the window is simply the available prefix. Nothing is padded and no
//! helper indexes out of range.

use chrono::{Days, Months, NaiveDate};

use crate::OHLCV;

/// Start of a trailing window of `len` records ending at `index` (inclusive).
#[inline]
pub fn window_start(index: usize, len: usize) -> usize {
    (index + 1).saturating_sub(len)
}

/// Start of the trailing calendar window that covers dates in `[date(index) - days, date(index)]`.
/// `bars` must be ordered by date.
#[inline]
pub fn calendar_window_start<T: OHLCV>(bars: &[T], index: usize, days: u64) -> usize {
    let Some(current) = bars.get(index) else {
        return bars.len();
    };
    let cutoff = current
        .date()
        .checked_sub_days(Days::new(days))
        .unwrap_or(NaiveDate::MIN);
    bars[..=index].partition_point(|b| b.date() < cutoff)
}

/// Like [`calendar_window_start`] with a lookback in calendar months.
#[inline]
pub fn month_window_start<T: OHLCV>(bars: &[T], index: usize, months: u32) -> usize {
    let Some(current) = bars.get(index) else {
        return bars.len();
    };
    let cutoff = current
        .date()
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN);
    bars[..=index].partition_point(|b| b.date() < cutoff)
}

/// Largest volume in `bars`. `None` when empty.
#[inline]
pub fn max_volume<T: OHLCV>(bars: &[T]) -> Option<u64> {
    bars.iter().map(|b| b.volume()).max()
}

/// Largest high in `bars`. `None` when empty.
#[inline]
pub fn max_high<T: OHLCV>(bars: &[T]) -> Option<f64> {
    bars.iter().map(|b| b.high()).reduce(f64::max)
}

/// Arithmetic mean volume. `None` when empty.
#[inline]
pub fn mean_volume<T: OHLCV>(bars: &[T]) -> Option<f64> {
    if bars.is_empty() {
        return None;
    }
    let sum: f64 = bars.iter().map(|b| b.volume() as f64).sum();
    Some(sum / bars.len() as f64)
}

/// Simple moving average of closes over `period` records ending at `index`.
/// `None` unless the full period is available.
#[inline]
pub fn sma_close<T: OHLCV>(bars: &[T], index: usize, period: usize) -> Option<f64> {
    if period == 0 || index >= bars.len() || index + 1 < period {
        return None;
    }
    let slice = &bars[index + 1 - period..=index];
    Some(slice.iter().map(|b| b.close()).sum::<f64>() / period as f64)
}
