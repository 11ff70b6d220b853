//! Post-event range measurement and support levels.
//!
//! Everything here is advisory: missing data yields `None` or an empty list,
//! never an error.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::helpers::{mean_volume, sma_close};
use crate::{Period, PriceRecord, PriceSeries, VolumeBlockEvent, OHLCV};

/// Default moving average period for range termination and S3
pub const DEFAULT_MA_PERIOD: Period = Period::new_const(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeEndReason {
    /// First close below the moving average
    #[serde(rename = "ma_break")]
    MovingAverageBreak,
    /// Data ran out before the moving average was broken
    #[serde(rename = "series_end")]
    SeriesEnd,
}

/// Price range following a block event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeMetrics {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_days: i64,
    pub end_reason: RangeEndReason,
    pub high: f64,
    pub high_date: NaiveDate,
    pub low: f64,
    pub low_date: NaiveDate,
    pub avg_volume: f64,
    pub ma_at_start: Option<f64>,
    pub ma_at_end: Option<f64>,
}

/// Stock return over a range against a benchmark index, in percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelativePerformance {
    pub market_index: String,
    pub range_return: f64,
    pub index_return: f64,
    pub relative_return: f64,
    pub beta: Option<f64>,
    pub alpha: Option<f64>,
    pub outperformance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportLevel {
    pub level: u8,
    pub price: f64,
    pub label: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RangeCalculator {
    pub ma_period: Period,
}

impl Default for RangeCalculator {
    fn default() -> Self {
        Self {
            ma_period: DEFAULT_MA_PERIOD,
        }
    }
}

impl RangeCalculator {
    pub fn new(ma_period: Period) -> Self {
        Self { ma_period }
    }

    /// Support levels for a Block 2 event. S1 (the low of the last record on or
    /// before the event date) is present whenever such a record exists.
    pub fn support_levels(
        &self,
        block2: &VolumeBlockEvent,
        series: &PriceSeries,
    ) -> Vec<SupportLevel> {
        self.support_levels_with_parent(block2, None, series)
    }

    /// Like [`support_levels`](Self::support_levels), adding S2 from the parent's low when given.
    pub fn support_levels_with_parent(
        &self,
        block2: &VolumeBlockEvent,
        parent: Option<&VolumeBlockEvent>,
        series: &PriceSeries,
    ) -> Vec<SupportLevel> {
        let bars = series.as_slice();
        let upto = series.first_after(block2.date);
        if upto == 0 {
            return Vec::new();
        }
        let index = upto - 1;

        let mut levels = vec![SupportLevel {
            level: 1,
            price: bars[index].low(),
            label: "S1 (Block2 Low)".to_string(),
        }];

        if let Some(low) = parent.and_then(|p| series.position(p.date)).map(|i| bars[i].low()) {
            levels.push(SupportLevel {
                level: 2,
                price: low,
                label: "S2 (Block1 Low)".to_string(),
            });
        }

        if let Some(ma) = sma_close(bars, index, self.ma_period.get()) {
            levels.push(SupportLevel {
                level: 3,
                price: ma,
                label: format!("S3 (MA{})", self.ma_period.get()),
            });
        }

        levels
    }

    /// Range starting at the first record on or after `start`, ending at the first
    /// later close below the moving average or at the end of the series.
    pub fn range_metrics(&self, start: NaiveDate, series: &PriceSeries) -> Option<RangeMetrics> {
        let bars = series.as_slice();
        let start_index = bars.partition_point(|r| r.date() < start);
        let first = bars.get(start_index)?;
        let period = self.ma_period.get();

        let ma_break = (start_index + 1..bars.len())
            .find(|&i| sma_close(bars, i, period).is_some_and(|ma| bars[i].close() < ma));
        let (end_index, end_reason) = match ma_break {
            Some(i) => (i, RangeEndReason::MovingAverageBreak),
            None => (bars.len() - 1, RangeEndReason::SeriesEnd),
        };

        let span = &bars[start_index..=end_index];
        let (high_bar, low_bar) = extremes(span)?;
        let last = &bars[end_index];

        Some(RangeMetrics {
            start_date: first.date(),
            end_date: last.date(),
            duration_days: (last.date() - first.date()).num_days(),
            end_reason,
            high: high_bar.high(),
            high_date: high_bar.date(),
            low: low_bar.low(),
            low_date: low_bar.date(),
            avg_volume: mean_volume(span)?,
            ma_at_start: sma_close(bars, start_index, period),
            ma_at_end: sma_close(bars, end_index, period),
        })
    }

    /// Compare the stock's return over `metrics` with a benchmark index.
    ///
    /// Index closes are taken from the last index record on or before each range
    /// boundary. `beta` and `alpha` are left unset.
    pub fn relative_performance(
        &self,
        metrics: &RangeMetrics,
        series: &PriceSeries,
        market_index: &str,
        index_series: &PriceSeries,
    ) -> Option<RelativePerformance> {
        let range_return = pct_return(
            close_on_or_before(series, metrics.start_date)?,
            close_on_or_before(series, metrics.end_date)?,
        )?;
        let index_return = pct_return(
            close_on_or_before(index_series, metrics.start_date)?,
            close_on_or_before(index_series, metrics.end_date)?,
        )?;
        let relative_return = range_return - index_return;

        Some(RelativePerformance {
            market_index: market_index.to_string(),
            range_return,
            index_return,
            relative_return,
            beta: None,
            alpha: None,
            outperformance: relative_return > 0.0,
        })
    }

    /// Attach range metrics (and performance when a benchmark is given) to `event`.
    pub fn annotate(
        &self,
        event: &mut VolumeBlockEvent,
        series: &PriceSeries,
        benchmark: Option<(&str, &PriceSeries)>,
    ) {
        let Some(metrics) = self.range_metrics(event.date, series) else {
            return;
        };
        event.performance = benchmark
            .and_then(|(name, index)| self.relative_performance(&metrics, series, name, index));
        event.range = Some(metrics);
    }
}

fn extremes(span: &[PriceRecord]) -> Option<(&PriceRecord, &PriceRecord)> {
    let first = span.first()?;
    let mut high = first;
    let mut low = first;
    for bar in &span[1..] {
        if bar.high() > high.high() {
            high = bar;
        }
        if bar.low() < low.low() {
            low = bar;
        }
    }
    Some((high, low))
}

fn close_on_or_before(series: &PriceSeries, date: NaiveDate) -> Option<f64> {
    let upto = series.first_after(date);
    upto.checked_sub(1).and_then(|i| series.get(i)).map(|r| r.close())
}

fn pct_return(from: f64, to: f64) -> Option<f64> {
    (from > 0.0).then(|| (to / from - 1.0) * 100.0)
}
