//! # volblock - Volume Block Detector
//!
//! Detection of chained "volume block" events in daily stock histories.
//!
//! A **Block 1** is an unusually large money-flow day that also sets a fresh
//! price high over some lookback horizon. A **Block 2** is a follow-through
//! large-volume day inside a bounded window after a Block 1, optionally
//! followed by elevated volume on D+1 / D+2.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{Days, NaiveDate};
//! use volblock::prelude::*;
//!
//! let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
//! let records: Vec<PriceRecord> = (0..120u64)
//!     .map(|i| {
//!         let day = start + Days::new(i);
//!         let base = 10_000.0 + i as f64 * 10.0;
//!         let volume = 1_000_000 + i * 1_000;
//!         PriceRecord::new(day, base, base + 50.0, base - 50.0, base + 20.0, volume).unwrap()
//!     })
//!     .collect();
//! let series = PriceSeries::new(records).unwrap();
//!
//! // Disable the trading value floor for this small example
//! let mut settings = DetectionSettings::default();
//! settings.block1.min_trading_value = None;
//!
//! let scanner = Block1Scanner::new(settings.block1.clone(), settings.min_history_records);
//! let blocks = scanner.detect(StockId(1), &series).unwrap();
//! assert!(!blocks.is_empty());
//! ```

pub mod detectors;
pub mod orchestrator;
pub mod repository;
pub mod settings;

pub mod prelude {
    pub use crate::{
        // Detectors
        detectors::*,
        // Orchestration
        orchestrator::{
            BatchReport, DetectionOrchestrator, DetectionReport, StockFailure, StockOutcome,
            StockRef, StopFlag,
        },
        // Persistence contracts
        repository::{
            BlockRepository, InMemoryBlockRepository, InMemoryPriceDataRepository,
            InMemoryStockRepository, PriceDataRepository, StockRepository,
        },
        // Settings
        settings::{
            Block1Settings, Block2Settings, DetectionSettings, ParamMeta, TradingValueCalc,
            VolumeComparison,
        },
        // Core types
        BlockId,
        BlockKey,
        BlockKind,
        // Errors
        DetectionError,
        Market,
        NewHighGrade,
        OHLCVExt,
        PatternKind,
        Period,
        PriceRecord,
        PriceSeries,
        Result,
        Stock,
        StockId,
        VolumeBlockEvent,
        OHLCV,
    };
}

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::detectors::range::{RangeMetrics, RelativePerformance};
use crate::settings::TradingValueCalc;

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, DetectionError>;

/// Errors that can occur during volume block detection
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectionError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} records, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("{entity} not found: {key}")]
    EntityNotFound { entity: &'static str, key: String },

    #[error("Invalid price record at index {index}: {reason}")]
    InvalidRecord { index: usize, reason: &'static str },

    #[error("Invalid volume block: {0}")]
    InvalidEvent(&'static str),

    #[error("Repository error: {0}")]
    Repository(String),
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Window length in records or days (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(DetectionError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core daily bar trait
pub trait OHLCV {
    fn date(&self) -> NaiveDate;
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> u64;

    /// Turnover reported by the data provider, if any
    fn trading_value(&self) -> Option<f64> {
        None
    }
}

/// Extension trait with computed properties for daily bars
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn upper_shadow(&self) -> f64 {
        self.high() - self.open().max(self.close())
    }

    #[inline]
    fn lower_shadow(&self) -> f64 {
        self.open().min(self.close()) - self.low()
    }

    #[inline]
    fn is_up(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_down(&self) -> bool {
        self.close() < self.open()
    }

    #[inline]
    fn price_change(&self) -> f64 {
        self.close() - self.open()
    }

    /// Intraday change in percent. Returns 0 when open is 0.
    #[inline]
    fn price_change_pct(&self) -> f64 {
        if self.open() == 0.0 {
            return 0.0;
        }
        (self.close() - self.open()) / self.open() * 100.0
    }

    /// Mean of open, high, low and close
    #[inline]
    fn avg_price(&self) -> f64 {
        (self.open() + self.high() + self.low() + self.close()) / 4.0
    }

    /// Midpoint of open and close
    #[inline]
    fn mid_price(&self) -> f64 {
        (self.open() + self.close()) / 2.0
    }

    /// Stored trading value when present (and positive), otherwise derived with `calc`.
    #[inline]
    fn trading_value_or(&self, calc: TradingValueCalc) -> f64 {
        match self.trading_value() {
            Some(v) if v > 0.0 => v,
            _ => calc.derive(self),
        }
    }

    /// Validate bar consistency
    fn validate(&self) -> Result<()> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan() || p.is_infinite()) {
            return Err(DetectionError::InvalidRecord {
                index: 0,
                reason: "non-finite price",
            });
        }
        if prices.iter().any(|p| *p <= 0.0) {
            return Err(DetectionError::InvalidRecord {
                index: 0,
                reason: "price must be positive",
            });
        }
        if self.high() < self.low() {
            return Err(DetectionError::InvalidRecord {
                index: 0,
                reason: "high < low",
            });
        }
        if self.high() < self.open() || self.high() < self.close() {
            return Err(DetectionError::InvalidRecord {
                index: 0,
                reason: "high below open or close",
            });
        }
        if self.low() > self.open() || self.low() > self.close() {
            return Err(DetectionError::InvalidRecord {
                index: 0,
                reason: "low above open or close",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

// ============================================================
// PRICE RECORD / PRICE SERIES
// ============================================================

/// One trading day for one stock. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPriceRecord")]
pub struct PriceRecord {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    trading_value: Option<f64>,
    market_cap: Option<f64>,
}

#[derive(Deserialize)]
struct RawPriceRecord {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    #[serde(default)]
    trading_value: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
}

impl TryFrom<RawPriceRecord> for PriceRecord {
    type Error = DetectionError;

    fn try_from(raw: RawPriceRecord) -> Result<Self> {
        let mut record =
            PriceRecord::new(raw.date, raw.open, raw.high, raw.low, raw.close, raw.volume)?;
        if let Some(v) = raw.trading_value {
            record = record.with_trading_value(v)?;
        }
        if let Some(v) = raw.market_cap {
            record = record.with_market_cap(v)?;
        }
        Ok(record)
    }
}

impl PriceRecord {
    /// Create a record, rejecting any OHLC inconsistency.
    pub fn new(
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self> {
        let record = Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            trading_value: None,
            market_cap: None,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn with_trading_value(mut self, value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(DetectionError::InvalidRecord {
                index: 0,
                reason: "trading value must be finite and non-negative",
            });
        }
        self.trading_value = Some(value);
        Ok(self)
    }

    pub fn with_market_cap(mut self, value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(DetectionError::InvalidRecord {
                index: 0,
                reason: "market cap must be finite and non-negative",
            });
        }
        self.market_cap = Some(value);
        Ok(self)
    }

    #[inline]
    pub fn market_cap(&self) -> Option<f64> {
        self.market_cap
    }

    /// Trading value in units of 100 million (KRW 억)
    pub fn trading_value_billion(&self) -> f64 {
        self.trading_value_or(TradingValueCalc::CloseVolume) / 100_000_000.0
    }
}

impl OHLCV for PriceRecord {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> u64 {
        self.volume
    }

    fn trading_value(&self) -> Option<f64> {
        self.trading_value
    }
}

/// Chronological daily records of one stock: strictly increasing dates, no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceSeries {
    records: Vec<PriceRecord>,
}

impl PriceSeries {
    pub fn new(records: Vec<PriceRecord>) -> Result<Self> {
        for (i, pair) in records.windows(2).enumerate() {
            if pair[1].date <= pair[0].date {
                return Err(DetectionError::InvalidRecord {
                    index: i + 1,
                    reason: "dates must be strictly increasing",
                });
            }
        }
        Ok(Self { records })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[PriceRecord] {
        &self.records
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&PriceRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PriceRecord> {
        self.records.iter()
    }

    pub fn first(&self) -> Option<&PriceRecord> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&PriceRecord> {
        self.records.last()
    }

    /// Index of the record on `date`, if any
    pub fn position(&self, date: NaiveDate) -> Option<usize> {
        self.records.binary_search_by_key(&date, |r| r.date).ok()
    }

    /// Index of the first record strictly after `date`
    pub fn first_after(&self, date: NaiveDate) -> usize {
        self.records.partition_point(|r| r.date <= date)
    }

    pub fn into_inner(self) -> Vec<PriceRecord> {
        self.records
    }
}

impl TryFrom<Vec<PriceRecord>> for PriceSeries {
    type Error = DetectionError;

    fn try_from(records: Vec<PriceRecord>) -> Result<Self> {
        Self::new(records)
    }
}

impl<'a> IntoIterator for &'a PriceSeries {
    type Item = &'a PriceRecord;
    type IntoIter = std::slice::Iter<'a, PriceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// ============================================================
// IDENTIFIERS / STOCK
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockId(pub u64);

impl fmt::Display for StockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the block repository on first persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "KOSPI")]
    Kospi,
    #[serde(rename = "KOSDAQ")]
    Kosdaq,
}

/// Listed stock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub id: StockId,
    pub code: String,
    pub name: String,
    pub market: Market,
}

impl Stock {
    /// Codes are six ASCII digits (e.g. "005930")
    pub fn new(
        id: StockId,
        code: impl Into<String>,
        name: impl Into<String>,
        market: Market,
    ) -> Result<Self> {
        let code = code.into();
        let name = name.into();
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DetectionError::InvalidValue("Stock code must be 6 digits"));
        }
        if name.trim().is_empty() {
            return Err(DetectionError::InvalidValue("Stock name is required"));
        }
        Ok(Self {
            id,
            code,
            name,
            market,
        })
    }
}

impl fmt::Display for Stock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.code)
    }
}

// ============================================================
// CLASSIFICATIONS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    #[serde(rename = "BLOCK_1")]
    Block1,
    #[serde(rename = "BLOCK_2")]
    Block2,
    #[serde(rename = "BLOCK_3")]
    Block3,
    #[serde(rename = "BLOCK_4")]
    Block4,
}

impl BlockKind {
    pub fn number(self) -> u8 {
        match self {
            BlockKind::Block1 => 1,
            BlockKind::Block2 => 2,
            BlockKind::Block3 => 3,
            BlockKind::Block4 => 4,
        }
    }

    /// Every kind except Block 1 hangs off a parent block
    #[inline]
    pub fn requires_parent(self) -> bool {
        !matches!(self, BlockKind::Block1)
    }
}

/// How far back the day's high is unmatched. Declared from most to least exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NewHighGrade {
    /// All-time high within the available history
    S,
    /// 10-year high
    A,
    /// 5-year high
    B,
    /// 2-year high
    C,
    /// 1-year high
    D,
    /// 6-month high
    E,
    /// None of the above
    F,
}

impl NewHighGrade {
    pub const ALL: [NewHighGrade; 7] = [
        NewHighGrade::S,
        NewHighGrade::A,
        NewHighGrade::B,
        NewHighGrade::C,
        NewHighGrade::D,
        NewHighGrade::E,
        NewHighGrade::F,
    ];

    /// S, A or B
    #[inline]
    pub fn is_high_grade(self) -> bool {
        matches!(self, NewHighGrade::S | NewHighGrade::A | NewHighGrade::B)
    }
}

/// Elevated-volume shape of the days following a Block 2 candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    #[serde(rename = "D")]
    DOnly,
    #[serde(rename = "D+D+1")]
    DD1,
    #[serde(rename = "D+D+2")]
    DD2,
    #[serde(rename = "D+D+1+D+2")]
    DD1D2,
}

impl PatternKind {
    pub fn from_flags(has_d1: bool, has_d2: bool) -> Self {
        match (has_d1, has_d2) {
            (true, true) => PatternKind::DD1D2,
            (true, false) => PatternKind::DD1,
            (false, true) => PatternKind::DD2,
            (false, false) => PatternKind::DOnly,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatternKind::DOnly => "D",
            PatternKind::DD1 => "D+D+1",
            PatternKind::DD2 => "D+D+2",
            PatternKind::DD1D2 => "D+D+1+D+2",
        }
    }
}

// ============================================================
// VOLUME BLOCK EVENT
// ============================================================

/// Uniqueness key of a persisted block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockKey {
    pub stock_id: StockId,
    pub block_kind: BlockKind,
    pub date: NaiveDate,
}

/// A detected volume block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeBlockEvent {
    pub id: Option<BlockId>,
    pub stock_id: StockId,
    pub block_kind: BlockKind,
    pub date: NaiveDate,
    pub volume: u64,
    pub trading_value: f64,
    pub close_price: f64,

    // Block 1
    pub new_high_grade: Option<NewHighGrade>,
    pub lookback_window_days: Option<usize>,

    // Block 2
    pub parent_block_id: Option<BlockId>,
    pub days_from_parent: Option<i64>,
    pub volume_ratio: Option<f64>,
    pub pattern_kind: Option<PatternKind>,

    #[serde(default)]
    pub range: Option<RangeMetrics>,
    #[serde(default)]
    pub performance: Option<RelativePerformance>,
}

impl VolumeBlockEvent {
    fn base<T: OHLCV>(
        stock_id: StockId,
        block_kind: BlockKind,
        bar: &T,
        trading_value: f64,
    ) -> Self {
        Self {
            id: None,
            stock_id,
            block_kind,
            date: bar.date(),
            volume: bar.volume(),
            trading_value,
            close_price: bar.close(),
            new_high_grade: None,
            lookback_window_days: None,
            parent_block_id: None,
            days_from_parent: None,
            volume_ratio: None,
            pattern_kind: None,
            range: None,
            performance: None,
        }
    }

    /// Build a Block 1 event from the qualifying bar
    pub fn block1<T: OHLCV>(
        stock_id: StockId,
        bar: &T,
        trading_value: f64,
        grade: NewHighGrade,
        lookback_window_days: Option<usize>,
    ) -> Result<Self> {
        let mut event = Self::base(stock_id, BlockKind::Block1, bar, trading_value);
        event.new_high_grade = Some(grade);
        event.lookback_window_days = lookback_window_days;
        event.validate()?;
        Ok(event)
    }

    /// Build a Block 2 event. `parent_block_id` is copied from the parent and may
    /// still be `None` if the parent has not been persisted yet.
    pub fn block2<T: OHLCV>(
        parent: &VolumeBlockEvent,
        bar: &T,
        trading_value: f64,
        volume_ratio: f64,
        pattern_kind: Option<PatternKind>,
    ) -> Result<Self> {
        let mut event = Self::base(parent.stock_id, BlockKind::Block2, bar, trading_value);
        event.parent_block_id = parent.id;
        event.days_from_parent = Some((bar.date() - parent.date).num_days());
        event.volume_ratio = Some(volume_ratio);
        event.pattern_kind = pattern_kind;
        event.validate()?;
        Ok(event)
    }

    #[inline]
    pub fn key(&self) -> BlockKey {
        BlockKey {
            stock_id: self.stock_id,
            block_kind: self.block_kind,
            date: self.date,
        }
    }

    /// Field-level invariants. Parent linkage is checked by
    /// [`validate_for_commit`](Self::validate_for_commit).
    pub fn validate(&self) -> Result<()> {
        if self.volume == 0 {
            return Err(DetectionError::InvalidEvent("volume must be positive"));
        }
        if !(self.trading_value.is_finite() && self.trading_value > 0.0) {
            return Err(DetectionError::InvalidEvent("trading value must be positive"));
        }
        if !(self.close_price.is_finite() && self.close_price > 0.0) {
            return Err(DetectionError::InvalidEvent("close price must be positive"));
        }
        match self.block_kind {
            BlockKind::Block1 => {
                if self.new_high_grade.is_none() {
                    return Err(DetectionError::InvalidEvent("Block 1 requires new_high_grade"));
                }
            }
            BlockKind::Block2 => match self.volume_ratio {
                Some(r) if r.is_finite() && r > 0.0 => {}
                _ => {
                    return Err(DetectionError::InvalidEvent("Block 2 requires valid volume_ratio"))
                }
            },
            BlockKind::Block3 | BlockKind::Block4 => {}
        }
        if let Some(days) = self.days_from_parent {
            if days <= 0 {
                return Err(DetectionError::InvalidEvent("block must follow its parent"));
            }
        }
        Ok(())
    }

    /// Invariants required before the event may be committed
    pub fn validate_for_commit(&self) -> Result<()> {
        self.validate()?;
        if self.block_kind.requires_parent() && self.parent_block_id.is_none() {
            return Err(DetectionError::InvalidEvent("block requires a persisted parent_block_id"));
        }
        Ok(())
    }

    #[inline]
    pub fn is_block_1(&self) -> bool {
        self.block_kind == BlockKind::Block1
    }

    #[inline]
    pub fn is_block_2(&self) -> bool {
        self.block_kind == BlockKind::Block2
    }

    pub fn is_high_grade(&self) -> bool {
        self.new_high_grade.is_some_and(NewHighGrade::is_high_grade)
    }

    pub fn has_pattern(&self) -> bool {
        self.pattern_kind.is_some()
    }

    /// Trading value in units of 100 million (KRW 억)
    pub fn trading_value_billion(&self) -> f64 {
        self.trading_value / 100_000_000.0
    }
}

impl fmt::Display for VolumeBlockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block {} stock={} date={}",
            self.block_kind.number(),
            self.stock_id,
            self.date
        )
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn bar(d: u32, volume: u64) -> PriceRecord {
        PriceRecord::new(day(d), 100.0, 110.0, 90.0, 105.0, volume).unwrap()
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(730).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_record_rejects_inconsistent_ohlc() {
        assert!(PriceRecord::new(day(1), 100.0, 99.0, 90.0, 95.0, 10).is_err());
        assert!(PriceRecord::new(day(1), 100.0, 110.0, 101.0, 105.0, 10).is_err());
        assert!(PriceRecord::new(day(1), 100.0, 110.0, 90.0, 111.0, 10).is_err());
        assert!(PriceRecord::new(day(1), 0.0, 110.0, 90.0, 100.0, 10).is_err());
        assert!(PriceRecord::new(day(1), f64::NAN, 110.0, 90.0, 100.0, 10).is_err());
        assert!(PriceRecord::new(day(1), 100.0, 110.0, 90.0, 105.0, 0).is_ok());
    }

    #[test]
    fn test_record_rejects_negative_trading_value() {
        assert!(bar(1, 10).with_trading_value(-1.0).is_err());
        assert!(bar(1, 10).with_market_cap(f64::INFINITY).is_err());
    }

    #[test]
    fn test_record_ext() {
        let r = bar(1, 1_000);
        assert_eq!(r.body(), 5.0);
        assert_eq!(r.range(), 20.0);
        assert!(r.is_up());
        assert!((r.price_change_pct() - 5.0).abs() < 1e-9);
        assert!((r.avg_price() - 101.25).abs() < 1e-9);
        assert!((r.mid_price() - 102.5).abs() < 1e-9);
    }

    #[test]
    fn test_trading_value_prefers_stored() {
        let r = bar(1, 1_000);
        assert_eq!(r.trading_value_or(TradingValueCalc::CloseVolume), 105_000.0);
        let r = r.with_trading_value(7.0).unwrap();
        assert_eq!(r.trading_value_or(TradingValueCalc::CloseVolume), 7.0);
        // Zero is treated as missing
        let r = bar(1, 1_000).with_trading_value(0.0).unwrap();
        assert_eq!(r.trading_value_or(TradingValueCalc::MidVolume), 102_500.0);
    }

    #[test]
    fn test_series_requires_strictly_increasing_dates() {
        assert!(PriceSeries::new(vec![bar(1, 1), bar(2, 1), bar(3, 1)]).is_ok());
        let err = PriceSeries::new(vec![bar(1, 1), bar(3, 1), bar(3, 1)]).unwrap_err();
        assert_eq!(
            err,
            DetectionError::InvalidRecord {
                index: 2,
                reason: "dates must be strictly increasing"
            }
        );
        assert!(PriceSeries::new(vec![bar(2, 1), bar(1, 1)]).is_err());
    }

    #[test]
    fn test_series_lookup() {
        let series = PriceSeries::new(vec![bar(1, 1), bar(4, 1), bar(6, 1)]).unwrap();
        assert_eq!(series.position(day(4)), Some(1));
        assert_eq!(series.position(day(5)), None);
        assert_eq!(series.first_after(day(4)), 2);
        assert_eq!(series.first_after(day(3)), 1);
        assert_eq!(series.first_after(day(9)), 3);
    }

    #[test]
    fn test_record_deserialize_validates() {
        let ok = r#"{"date":"2024-03-01","open":100,"high":110,"low":90,"close":105,"volume":5}"#;
        assert!(serde_json::from_str::<PriceRecord>(ok).is_ok());
        let bad = r#"{"date":"2024-03-01","open":100,"high":95,"low":90,"close":105,"volume":5}"#;
        assert!(serde_json::from_str::<PriceRecord>(bad).is_err());
    }

    #[test]
    fn test_stock_validation() {
        assert!(Stock::new(StockId(1), "005930", "Samsung", Market::Kospi).is_ok());
        assert!(Stock::new(StockId(1), "5930", "Samsung", Market::Kospi).is_err());
        assert!(Stock::new(StockId(1), "00593A", "Samsung", Market::Kospi).is_err());
        assert!(Stock::new(StockId(1), "005930", "  ", Market::Kospi).is_err());
    }

    #[test]
    fn test_block1_requires_positive_values() {
        let r = bar(1, 0);
        assert!(VolumeBlockEvent::block1(StockId(1), &r, 1.0, NewHighGrade::S, None).is_err());
        let r = bar(1, 10);
        assert!(VolumeBlockEvent::block1(StockId(1), &r, 0.0, NewHighGrade::S, None).is_err());
        assert!(VolumeBlockEvent::block1(StockId(1), &r, 1.0, NewHighGrade::F, Some(730)).is_ok());
    }

    #[test]
    fn test_block2_links_parent() {
        let mut parent =
            VolumeBlockEvent::block1(StockId(1), &bar(1, 100), 1.0, NewHighGrade::A, None).unwrap();
        let child = VolumeBlockEvent::block2(&parent, &bar(5, 90), 1.0, 0.9, None).unwrap();
        assert_eq!(child.days_from_parent, Some(4));
        assert!(child.validate_for_commit().is_err());

        parent.id = Some(BlockId(7));
        let child = VolumeBlockEvent::block2(&parent, &bar(5, 90), 1.0, 0.9, None).unwrap();
        assert_eq!(child.parent_block_id, Some(BlockId(7)));
        assert!(child.validate_for_commit().is_ok());

        // Same-day child violates ordering
        assert!(VolumeBlockEvent::block2(&parent, &bar(1, 90), 1.0, 0.9, None).is_err());
    }

    #[test]
    fn test_grade_order() {
        assert!(NewHighGrade::S < NewHighGrade::A);
        assert!(NewHighGrade::E < NewHighGrade::F);
        assert!(NewHighGrade::B.is_high_grade());
        assert!(!NewHighGrade::C.is_high_grade());
    }

    #[test]
    fn test_pattern_kind_from_flags() {
        assert_eq!(PatternKind::from_flags(true, true), PatternKind::DD1D2);
        assert_eq!(PatternKind::from_flags(true, false), PatternKind::DD1);
        assert_eq!(PatternKind::from_flags(false, true), PatternKind::DD2);
        assert_eq!(PatternKind::from_flags(false, false), PatternKind::DOnly);
        assert_eq!(PatternKind::DD1D2.as_str(), "D+D+1+D+2");
    }
}
