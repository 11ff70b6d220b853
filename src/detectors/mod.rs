//! Volume block detectors
//!
//! # Components
//!
//! - **new_high**: how far back a day's high is unmatched (grade S..F)
//! - **pattern**: D / D+1 / D+2 elevated volume shape after a candidate
//! - **block1**: large money-flow days at a volume high
//! - **block2**: follow-through volume days after a Block 1
//! - **range**: post-event range, relative performance, support levels
//!
//! Classifiers are pure functions over `&[T: OHLCV]`; scanners own their settings.

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod block1;
pub mod block2;
pub mod new_high;
pub mod pattern;
pub mod range;

impl_with_defaults!(block1::Block1Scanner, block2::Block2Scanner, range::RangeCalculator);

// Re-export all detectors for convenience
pub use block1::*;
pub use block2::*;
pub use helpers::*;
pub use new_high::*;
pub use pattern::*;
pub use range::*;
