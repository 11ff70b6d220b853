//! Block 1 scanner.
//!
//! Single left-to-right pass over a stock's history. A day becomes a Block 1
//! candidate when every enabled condition holds:
//!
//! - **A** trading value at or above `min_trading_value`
//! - **B** volume compared (per `comparison`) against the largest volume of the
//!   trailing `max_volume_period_days` records
//! - **C** (optional) high at the top of the last `new_high_period_months`
//!
//! and a new-high grade can be computed for it. Adjacent qualifying days are
//! all reported; deduplication happens at persistence by (stock, kind, date).

use tracing::debug;

use super::helpers::{max_high, max_volume, window_start};
use super::new_high::{classify_new_high_with_peak, is_new_high_within_months};
use crate::settings::Block1Settings;
use crate::{
    DetectionError, OHLCVExt, PriceRecord, PriceSeries, Result, StockId, VolumeBlockEvent, OHLCV,
};

/// Default minimum history before scanning
pub const MIN_HISTORY_RECORDS: usize = 100;

#[derive(Debug, Clone)]
pub struct Block1Scanner {
    pub settings: Block1Settings,
    pub min_records: usize,
}

impl Default for Block1Scanner {
    fn default() -> Self {
        Self {
            settings: Block1Settings::default(),
            min_records: MIN_HISTORY_RECORDS,
        }
    }
}

/// Why a day did or did not qualify
#[derive(Debug)]
enum DayOutcome {
    Qualified(VolumeBlockEvent),
    NoVolume,
    LowTradingValue,
    NotMaxVolume,
    NotNewHigh,
    Ungraded,
}

#[derive(Debug, Default)]
struct ScanStats {
    low_trading_value: usize,
    not_max_volume: usize,
    not_new_high: usize,
    skipped: usize,
    found: usize,
}

impl Block1Scanner {
    pub fn new(settings: Block1Settings, min_records: usize) -> Self {
        Self {
            settings,
            min_records,
        }
    }

    /// Scan the whole series for Block 1 candidates.
    ///
    /// Fails with [`DetectionError::InsufficientData`] when the series is shorter
    /// than `min_records`; no partial result is returned.
    pub fn detect(
        &self,
        stock_id: StockId,
        series: &PriceSeries,
    ) -> Result<Vec<VolumeBlockEvent>> {
        if series.len() < self.min_records {
            return Err(DetectionError::InsufficientData {
                need: self.min_records,
                got: series.len(),
            });
        }

        let bars = series.as_slice();
        let mut stats = ScanStats::default();
        let mut events = Vec::new();
        let mut peak = f64::MIN;

        for (index, bar) in bars.iter().enumerate() {
            peak = peak.max(bar.high());
            match self.evaluate(stock_id, bars, index, peak)? {
                DayOutcome::Qualified(event) => {
                    stats.found += 1;
                    events.push(event);
                }
                DayOutcome::LowTradingValue => stats.low_trading_value += 1,
                DayOutcome::NotMaxVolume => stats.not_max_volume += 1,
                DayOutcome::NotNewHigh => stats.not_new_high += 1,
                DayOutcome::NoVolume | DayOutcome::Ungraded => stats.skipped += 1,
            }
        }

        debug!(
            %stock_id,
            records = bars.len(),
            failed_trading_value = stats.low_trading_value,
            failed_volume = stats.not_max_volume,
            failed_new_high = stats.not_new_high,
            skipped = stats.skipped,
            found = stats.found,
            "block 1 scan complete"
        );

        Ok(events)
    }

    /// Evaluate a single day. `None` when the day does not qualify or `index` is out of range.
    pub fn detect_at(
        &self,
        stock_id: StockId,
        series: &PriceSeries,
        index: usize,
    ) -> Result<Option<VolumeBlockEvent>> {
        let bars = series.as_slice();
        let Some(peak) = bars.get(..=index).and_then(max_high) else {
            return Ok(None);
        };
        match self.evaluate(stock_id, bars, index, peak)? {
            DayOutcome::Qualified(event) => Ok(Some(event)),
            _ => Ok(None),
        }
    }

    /// New-high lookback when the optional condition is on
    fn new_high_months(&self) -> Option<u32> {
        self.settings
            .new_high_enabled
            .then_some(self.settings.new_high_period_months)
            .flatten()
    }

    /// `peak` is the highest high of `bars[..=index]`.
    fn evaluate(
        &self,
        stock_id: StockId,
        bars: &[PriceRecord],
        index: usize,
        peak: f64,
    ) -> Result<DayOutcome> {
        let bar = &bars[index];
        if bar.volume() == 0 {
            return Ok(DayOutcome::NoVolume);
        }

        let trading_value = bar.trading_value_or(self.settings.trading_value_calc);
        if let Some(min) = self.settings.min_trading_value {
            if trading_value < min {
                return Ok(DayOutcome::LowTradingValue);
            }
        }

        if let Some(period) = self.settings.max_volume_period_days {
            let start = window_start(index, period.get());
            // Largest volume of the window's earlier days; a lone day is compared with itself
            let window_max = max_volume(&bars[start..index]).unwrap_or(bar.volume());
            if !self.settings.comparison.holds(bar.volume(), window_max) {
                return Ok(DayOutcome::NotMaxVolume);
            }
        }

        if let Some(months) = self.new_high_months() {
            if !is_new_high_within_months(bars, index, months) {
                return Ok(DayOutcome::NotNewHigh);
            }
        }

        let Some(grade) = classify_new_high_with_peak(bars, index, peak) else {
            return Ok(DayOutcome::Ungraded);
        };

        let event = VolumeBlockEvent::block1(
            stock_id,
            bar,
            trading_value,
            grade,
            self.settings.max_volume_period_days.map(|p| p.get()),
        )?;
        Ok(DayOutcome::Qualified(event))
    }
}
