//! Block 2 scanner.
//!
//! Walks the records after a Block 1 parent in date order and reports
//! follow-through volume days. Scanning stops at the first record more than
//! `max_days_from_parent` calendar days after the parent; later records can
//! only be further away.

use tracing::debug;

use super::helpers::max_high;
use super::pattern::classify_pattern;
use crate::settings::{Block2Settings, TradingValueCalc};
use crate::{
    DetectionError, OHLCVExt, Period, PriceRecord, PriceSeries, Result, VolumeBlockEvent, OHLCV,
};

#[derive(Debug, Clone, Default)]
pub struct Block2Scanner {
    pub settings: Block2Settings,
}

#[derive(Debug, Default)]
struct ScanStats {
    scanned: usize,
    low_ratio: usize,
    low_trading_value: usize,
    no_breakthrough: usize,
    found: usize,
}

impl Block2Scanner {
    pub fn new(settings: Block2Settings) -> Self {
        Self { settings }
    }

    /// Scan `series` for Block 2 candidates of `parent`.
    ///
    /// `series` may start at or before the parent's date; only records strictly
    /// after it are candidates. Earlier records still feed the pattern baseline.
    pub fn detect(
        &self,
        parent: &VolumeBlockEvent,
        series: &PriceSeries,
    ) -> Result<Vec<VolumeBlockEvent>> {
        if parent.volume == 0 {
            return Err(DetectionError::InvalidEvent("parent volume must be positive"));
        }

        let bars = series.as_slice();
        let reference_high = self.breakthrough_reference(parent, series);
        let mut stats = ScanStats::default();
        let mut events = Vec::new();

        for index in series.first_after(parent.date)..bars.len() {
            let bar = &bars[index];
            let days = (bar.date() - parent.date).num_days();
            if let Some(max_days) = self.settings.max_days_from_parent {
                if days > i64::from(max_days) {
                    break;
                }
            }
            stats.scanned += 1;

            if bar.volume() == 0 {
                stats.low_ratio += 1;
                continue;
            }

            let volume_ratio = bar.volume() as f64 / parent.volume as f64;
            if let Some(min_ratio) = self.settings.min_volume_ratio {
                if volume_ratio < min_ratio {
                    stats.low_ratio += 1;
                    continue;
                }
            }

            let trading_value = bar.trading_value_or(TradingValueCalc::CloseVolume);
            if let Some(min) = self.settings.min_trading_value {
                if trading_value < min {
                    stats.low_trading_value += 1;
                    continue;
                }
            }

            let pattern = self.pattern_settings().map(|(period, threshold_pct)| {
                classify_pattern(bars, index, period, threshold_pct)
            });

            if let Some(pct) = self.breakthrough_pct() {
                if !breaks_through(bars, index, reference_high, pct) {
                    stats.no_breakthrough += 1;
                    continue;
                }
            }

            events.push(VolumeBlockEvent::block2(
                parent,
                bar,
                trading_value,
                volume_ratio,
                pattern,
            )?);
            stats.found += 1;
        }

        debug!(
            stock_id = %parent.stock_id,
            parent_date = %parent.date,
            scanned = stats.scanned,
            failed_ratio = stats.low_ratio,
            failed_trading_value = stats.low_trading_value,
            failed_breakthrough = stats.no_breakthrough,
            found = stats.found,
            "block 2 scan complete"
        );

        Ok(events)
    }

    /// Pattern window and threshold, `None` when classification is off
    fn pattern_settings(&self) -> Option<(Period, f64)> {
        if !self.settings.pattern_enabled {
            return None;
        }
        Some((self.settings.pattern_avg_period?, self.settings.pattern_threshold_pct?))
    }

    fn breakthrough_pct(&self) -> Option<f64> {
        self.settings
            .price_breakthrough_enabled
            .then_some(self.settings.price_breakthrough_pct)
            .flatten()
    }

    /// Parent's range high, else the parent day's high, else its close
    fn breakthrough_reference(&self, parent: &VolumeBlockEvent, series: &PriceSeries) -> f64 {
        if let Some(range) = &parent.range {
            return range.high;
        }
        series
            .position(parent.date)
            .and_then(|i| series.get(i))
            .map_or(parent.close_price, |r| r.high())
    }
}

/// Highest high over D, D+1 and D+2 exceeds the reference by more than `pct` percent
fn breaks_through(bars: &[PriceRecord], index: usize, reference_high: f64, pct: f64) -> bool {
    let end = (index + 3).min(bars.len());
    let target = reference_high * (1.0 + pct / 100.0);
    max_high(&bars[index..end]).is_some_and(|h| h > target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NewHighGrade, PatternKind, StockId};
    use chrono::{Days, NaiveDate};

    fn day(i: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 6, 1).unwrap() + Days::new(i)
    }

    fn rec(i: u64, high: f64, volume: u64) -> PriceRecord {
        PriceRecord::new(day(i), high - 5.0, high, high - 10.0, high - 5.0, volume).unwrap()
    }

    fn parent(volume: u64) -> VolumeBlockEvent {
        let bar = rec(0, 100.0, volume);
        VolumeBlockEvent::block1(StockId(9), &bar, 1.0, NewHighGrade::S, Some(730)).unwrap()
    }

    fn scanner() -> Block2Scanner {
        Block2Scanner::new(Block2Settings {
            pattern_enabled: false,
            ..Block2Settings::default()
        })
    }

    #[test]
    fn test_ratio_filter_and_linkage() {
        let p = parent(1_000);
        let s = PriceSeries::new(vec![
            rec(0, 100.0, 1_000),
            rec(1, 100.0, 700),
            rec(2, 100.0, 800),
            rec(3, 100.0, 2_000),
        ])
        .unwrap();
        let events = scanner().detect(&p, &s).unwrap();
        let dates: Vec<_> = events.iter().map(|e| e.date).collect();
        assert_eq!(dates, vec![day(2), day(3)]);
        assert_eq!(events[0].volume_ratio, Some(0.8));
        assert_eq!(events[1].days_from_parent, Some(3));
        assert!(events.iter().all(|e| e.is_block_2() && e.pattern_kind.is_none()));
    }

    #[test]
    fn test_stops_past_window() {
        let mut sc = scanner();
        sc.settings.max_days_from_parent = Some(5);
        let p = parent(1_000);
        let s = PriceSeries::new(vec![
            rec(5, 100.0, 1_000),
            rec(6, 100.0, 5_000),
            rec(7, 100.0, 5_000),
        ])
        .unwrap();
        let events = sc.detect(&p, &s).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].days_from_parent, Some(5));
    }

    #[test]
    fn test_unbounded_window_and_no_ratio() {
        let mut sc = scanner();
        sc.settings.max_days_from_parent = None;
        sc.settings.min_volume_ratio = None;
        let p = parent(1_000);
        let s = PriceSeries::new(vec![
            rec(400, 100.0, 10),
            rec(900, 100.0, 0),
            rec(1_000, 100.0, 1),
        ])
        .unwrap();
        // zero volume day is skipped
        assert_eq!(sc.detect(&p, &s).unwrap().len(), 2);
    }

    #[test]
    fn test_parent_day_is_never_a_candidate() {
        let p = parent(1_000);
        let s = PriceSeries::new(vec![rec(0, 100.0, 1_000)]).unwrap();
        assert!(scanner().detect(&p, &s).unwrap().is_empty());
    }

    #[test]
    fn test_trading_value_filter() {
        let mut sc = scanner();
        sc.settings.min_trading_value = Some(90_000.0);
        let p = parent(1_000);
        // close = high - 5 = 95
        let s = PriceSeries::new(vec![rec(1, 100.0, 900), rec(2, 100.0, 1_000)]).unwrap();
        let events = sc.detect(&p, &s).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].trading_value, 95_000.0);
    }

    #[test]
    fn test_pattern_attached() {
        let mut sc = scanner();
        sc.settings.pattern_enabled = true;
        let p = parent(1_000_000);
        let s = PriceSeries::new(vec![
            rec(0, 100.0, 1_000_000),
            rec(10, 100.0, 850_000),
            rec(11, 100.0, 400_000),
            rec(12, 100.0, 350_000),
        ])
        .unwrap();
        let events = sc.detect(&p, &s).unwrap();
        assert_eq!(events.len(), 1);
        // short history: baseline 425_000, threshold 340_000
        assert_eq!(events[0].pattern_kind, Some(PatternKind::DD1D2));
    }

    #[test]
    fn test_price_breakthrough() {
        let mut sc = scanner();
        sc.settings.price_breakthrough_enabled = true;
        sc.settings.price_breakthrough_pct = Some(30.0);
        let p = parent(1_000);
        let s = PriceSeries::new(vec![
            rec(0, 100.0, 1_000),
            rec(1, 120.0, 1_000),
            rec(2, 110.0, 1_000),
            rec(3, 131.0, 100),
            rec(4, 100.0, 1_000),
        ])
        .unwrap();
        let dates: Vec<_> = sc.detect(&p, &s).unwrap().iter().map(|e| e.date).collect();
        // D+2 of day 1 reaches 131 > 130; day 2 sees it at D+1; day 4 never does
        assert_eq!(dates, vec![day(1), day(2)]);
    }

    #[test]
    fn test_breakthrough_needs_strict_excess() {
        let mut sc = scanner();
        sc.settings.price_breakthrough_enabled = true;
        sc.settings.price_breakthrough_pct = Some(30.0);
        let p = parent(1_000);
        // 130 only ties the target
        let s = PriceSeries::new(vec![rec(0, 100.0, 1_000), rec(1, 130.0, 1_000)]).unwrap();
        assert!(sc.detect(&p, &s).unwrap().is_empty());
    }

    #[test]
    fn test_breakthrough_reference_falls_back_to_close() {
        let mut sc = scanner();
        sc.settings.price_breakthrough_enabled = true;
        sc.settings.price_breakthrough_pct = Some(0.0);
        let p = parent(1_000);
        // parent day missing from series: reference is its close (95)
        let s = PriceSeries::new(vec![rec(1, 96.0, 1_000), rec(2, 95.0, 1_000)]).unwrap();
        let dates: Vec<_> = sc.detect(&p, &s).unwrap().iter().map(|e| e.date).collect();
        assert_eq!(dates, vec![day(1)]);
    }

    #[test]
    fn test_null_breakthrough_pct_disables_filter() {
        let mut sc = scanner();
        sc.settings.price_breakthrough_enabled = true;
        sc.settings.price_breakthrough_pct = None;
        let p = parent(1_000);
        let s = PriceSeries::new(vec![rec(0, 100.0, 1_000), rec(1, 90.0, 1_000)]).unwrap();
        assert_eq!(sc.detect(&p, &s).unwrap().len(), 1);
    }

    #[test]
    fn test_null_pattern_settings_leave_unclassified() {
        let p = parent(1_000);
        let s = PriceSeries::new(vec![
            rec(0, 100.0, 1_000),
            rec(1, 100.0, 1_000),
            rec(2, 100.0, 1_000),
        ])
        .unwrap();

        let mut sc = scanner();
        sc.settings.pattern_enabled = true;
        sc.settings.pattern_threshold_pct = None;
        let events = sc.detect(&p, &s).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.pattern_kind.is_none()));

        sc.settings.pattern_threshold_pct = Some(80.0);
        sc.settings.pattern_avg_period = None;
        assert!(sc.detect(&p, &s).unwrap().iter().all(|e| e.pattern_kind.is_none()));
    }
}
