//! Detection settings and parameter metadata
//!
//! Settings are a typed, versioned configuration object. Every option has a
//! documented default; an option left out of a serialized document takes that
//! default, while a numeric option explicitly set to `null` turns the
//! corresponding condition off entirely.
//!
//! Numeric options are checked once against [`DetectionSettings::param_meta`]
//! when entering the orchestrator (or via [`DetectionSettings::from_json`]).
//!
//! # Example
//!
//! ```rust
//! use volblock::settings::DetectionSettings;
//!
//! let settings = DetectionSettings::from_json(
//!   r#"{ "block1": { "min_trading_value": null }, "block2": { "min_volume_ratio": 1.2 } }"#,
//! )
//! .unwrap();
//!
//! assert!(settings.block1.min_trading_value.is_none());
//! assert_eq!(settings.block1.max_volume_period_days.map(|p| p.get()), Some(730));
//! assert_eq!(settings.block2.min_volume_ratio, Some(1.2));
//! ```

use serde::{Deserialize, Serialize};

use crate::{DetectionError, Period, Result, OHLCV};

/// The only settings schema version this crate understands
pub const SETTINGS_VERSION: u32 = 1;

// ============================================================
// OPTION ENUMS
// ============================================================

/// How a missing trading value is derived from price and volume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingValueCalc {
  /// close × volume
  #[default]
  #[serde(rename = "close_volume")]
  CloseVolume,
  /// avg(open, high, low, close) × volume
  #[serde(rename = "avg_ohlc_volume", alias = "avg_volume")]
  AvgOhlcVolume,
  /// mid(open, close) × volume
  #[serde(rename = "mid_volume")]
  MidVolume,
}

impl TradingValueCalc {
  pub fn derive<T: OHLCV + ?Sized>(self, bar: &T) -> f64 {
    let price = match self {
      TradingValueCalc::CloseVolume => bar.close(),
      TradingValueCalc::AvgOhlcVolume => (bar.open() + bar.high() + bar.low() + bar.close()) / 4.0,
      TradingValueCalc::MidVolume => (bar.open() + bar.close()) / 2.0,
    };
    price * bar.volume() as f64
  }
}

/// Comparison of a day's volume against the trailing window maximum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeComparison {
  /// At least tied for the largest volume in the window
  #[default]
  #[serde(rename = ">=")]
  AtLeast,
  /// Strict new record
  #[serde(rename = ">")]
  Greater,
  /// Exactly ties the previous window maximum (diagnostic)
  #[serde(rename = "==")]
  Equal,
}

impl VolumeComparison {
  /// `window_max` is the largest volume of the window's records before the current day.
  #[inline]
  pub fn holds(self, volume: u64, window_max: u64) -> bool {
    match self {
      VolumeComparison::AtLeast => volume >= window_max,
      VolumeComparison::Greater => volume > window_max,
      VolumeComparison::Equal => volume == window_max,
    }
  }
}

// ============================================================
// SETTINGS
// ============================================================

/// Block 1 conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Block1Settings {
  /// Trailing volume window in records. `None` disables the volume condition.
  pub max_volume_period_days: Option<Period>,
  /// Minimum trading value. `None` disables the trading value condition.
  pub min_trading_value: Option<f64>,
  pub trading_value_calc: TradingValueCalc,
  pub comparison: VolumeComparison,
  /// Require the day's high to be the highest of the last `new_high_period_months`
  pub new_high_enabled: bool,
  /// `None` disables the new-high condition even when enabled
  pub new_high_period_months: Option<u32>,
}

impl Default for Block1Settings {
  fn default() -> Self {
    Self {
      max_volume_period_days: Some(Period::new_const(730)),
      min_trading_value: Some(50_000_000_000.0),
      trading_value_calc: TradingValueCalc::CloseVolume,
      comparison: VolumeComparison::AtLeast,
      new_high_enabled: false,
      new_high_period_months: Some(3),
    }
  }
}

/// Block 2 conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Block2Settings {
  /// Calendar days after the parent. `None` scans to the end of the tail series.
  pub max_days_from_parent: Option<u32>,
  /// Minimum volume relative to the parent. `None` disables the ratio condition.
  pub min_volume_ratio: Option<f64>,
  /// Minimum trading value. Disabled by default.
  pub min_trading_value: Option<f64>,
  pub pattern_enabled: bool,
  /// D+1 / D+2 volume threshold, in percent of the baseline average.
  /// `None` leaves candidates unclassified.
  pub pattern_threshold_pct: Option<f64>,
  /// Baseline window for the pattern classifier. `None` leaves candidates unclassified.
  pub pattern_avg_period: Option<Period>,
  pub price_breakthrough_enabled: bool,
  /// Required excess of the D..D+2 high over the parent's range high, in percent.
  /// `None` disables the breakthrough filter.
  pub price_breakthrough_pct: Option<f64>,
}

impl Default for Block2Settings {
  fn default() -> Self {
    Self {
      max_days_from_parent: Some(180),
      min_volume_ratio: Some(0.8),
      min_trading_value: None,
      pattern_enabled: true,
      pattern_threshold_pct: Some(80.0),
      pattern_avg_period: Some(Period::new_const(20)),
      price_breakthrough_enabled: false,
      price_breakthrough_pct: Some(30.0),
    }
  }
}

/// Complete detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
  pub version: u32,
  /// Minimum history length before Block 1 scanning runs
  pub min_history_records: usize,
  pub block1: Block1Settings,
  pub block2: Block2Settings,
}

impl Default for DetectionSettings {
  fn default() -> Self {
    Self {
      version: SETTINGS_VERSION,
      min_history_records: 100,
      block1: Block1Settings::default(),
      block2: Block2Settings::default(),
    }
  }
}

impl DetectionSettings {
  /// Parse and validate a JSON settings document
  pub fn from_json(json: &str) -> Result<Self> {
    let settings: Self =
      serde_json::from_str(json).map_err(|e| DetectionError::InvalidConfig(e.to_string()))?;
    settings.validate()?;
    Ok(settings)
  }

  pub fn to_json(&self) -> Result<String> {
    serde_json::to_string_pretty(self).map_err(|e| DetectionError::InvalidConfig(e.to_string()))
  }

  /// Metadata for every numeric option
  pub fn param_meta() -> &'static [ParamMeta] {
    PARAMS
  }

  /// Check the version and every numeric option against its allowed range
  pub fn validate(&self) -> Result<()> {
    if self.version != SETTINGS_VERSION {
      return Err(DetectionError::InvalidConfig(format!(
        "unsupported settings version {} (expected {})",
        self.version, SETTINGS_VERSION
      )));
    }

    check("min_history_records", self.min_history_records as f64)?;

    let b1 = &self.block1;
    if let Some(p) = b1.max_volume_period_days {
      check("block1.max_volume_period_days", p.get() as f64)?;
    }
    if let Some(v) = b1.min_trading_value {
      check("block1.min_trading_value", v)?;
    }
    if let Some(m) = b1.new_high_period_months {
      check("block1.new_high_period_months", m as f64)?;
    }

    let b2 = &self.block2;
    if let Some(d) = b2.max_days_from_parent {
      check("block2.max_days_from_parent", d as f64)?;
    }
    if let Some(r) = b2.min_volume_ratio {
      check("block2.min_volume_ratio", r)?;
    }
    if let Some(v) = b2.min_trading_value {
      check("block2.min_trading_value", v)?;
    }
    if let Some(pct) = b2.pattern_threshold_pct {
      check("block2.pattern_threshold_pct", pct)?;
    }
    if let Some(p) = b2.pattern_avg_period {
      check("block2.pattern_avg_period", p.get() as f64)?;
    }
    if let Some(pct) = b2.price_breakthrough_pct {
      check("block2.price_breakthrough_pct", pct)?;
    }

    Ok(())
  }
}

fn check(name: &'static str, value: f64) -> Result<()> {
  match PARAMS.iter().find(|m| m.name == name) {
    Some(meta) => meta.validate(value),
    None => Err(DetectionError::InvalidConfig(format!("unknown parameter {name}"))),
  }
}

// ============================================================
// PARAMETER METADATA
// ============================================================

/// Metadata for a single numeric setting
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Dotted path of the option (e.g., "block2.min_volume_ratio")
  pub name: &'static str,
  /// Default value, `None` when the condition is off by default
  pub default: Option<f64>,
  /// Allowed (min, max), inclusive
  pub range: (f64, f64),
  /// Human-readable description
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn new(
    name: &'static str,
    default: Option<f64>,
    range: (f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, default, range, description }
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    if value.is_nan() || value.is_infinite() {
      return Err(DetectionError::InvalidValue("setting cannot be NaN or infinite"));
    }
    let (min, max) = self.range;
    if value < min || value > max {
      return Err(DetectionError::OutOfRange { field: self.name, value, min, max });
    }
    Ok(())
  }
}

const PARAMS: &[ParamMeta] = &[
  ParamMeta::new(
    "min_history_records",
    Some(100.0),
    (1.0, 100_000.0),
    "Records required before Block 1 scanning",
  ),
  ParamMeta::new(
    "block1.max_volume_period_days",
    Some(730.0),
    (1.0, 20_000.0),
    "Trailing volume window (records)",
  ),
  ParamMeta::new(
    "block1.min_trading_value",
    Some(50_000_000_000.0),
    (0.0, 1e16),
    "Minimum Block 1 trading value",
  ),
  ParamMeta::new(
    "block1.new_high_period_months",
    Some(3.0),
    (1.0, 600.0),
    "Lookback for the optional new-high condition (months)",
  ),
  ParamMeta::new(
    "block2.max_days_from_parent",
    Some(180.0),
    (1.0, 3650.0),
    "Maximum calendar days between Block 1 and Block 2",
  ),
  ParamMeta::new(
    "block2.min_volume_ratio",
    Some(0.8),
    (0.0, 100.0),
    "Minimum Block 2 volume relative to Block 1",
  ),
  ParamMeta::new("block2.min_trading_value", None, (0.0, 1e16), "Minimum Block 2 trading value"),
  ParamMeta::new(
    "block2.pattern_threshold_pct",
    Some(80.0),
    (0.0, 1000.0),
    "D+1/D+2 volume threshold in percent of baseline",
  ),
  ParamMeta::new(
    "block2.pattern_avg_period",
    Some(20.0),
    (1.0, 250.0),
    "Baseline averaging window (records)",
  ),
  ParamMeta::new(
    "block2.price_breakthrough_pct",
    Some(30.0),
    (0.0, 1000.0),
    "Required excess over the parent's range high (percent)",
  ),
];

// ============================================================
// TESTS
// ============================================================
