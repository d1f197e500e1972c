//! # Axis Modifier Module
//!
//! Turns a raw axis reading plus its recorded extremes into a bounded
//! modifier.
//!
//! ## Split Range (steering)
//!
//! The neutral position sits between two independently calibrated extremes.
//! Calibration stores `left = |raw at full left|` and
//! `right = |raw at full right|`:
//!
//! - `raw < 0`: `modifier = clamp(raw / left, -1, 1)`
//! - otherwise: `modifier = clamp(raw / right, 0, 1)`
//!
//! ## Full Range Inverted (throttle, brake)
//!
//! Calibration stores the rest reading `off` and the fully engaged reading
//! `full`, in either order:
//!
//! `modifier = clamp((off - raw) / (off - full), 0, 1)`
//!
//! ## Precision
//!
//! Results are rounded to a fixed number of decimal digits (2 by default).
//! This sets the smallest change a consumer can see and keeps analog noise
//! from reaching UI bars and command messages.
//!
//! ## Usage
//!
//! ```
//! use wheel_input::controller::modifier::{AxisCalibration, ModifierCalculator};
//!
//! let steering = AxisCalibration::SplitRange { left_magnitude: 0.97, right_magnitude: 0.43 };
//! let calc = ModifierCalculator::default();
//!
//! assert_eq!(calc.compute(&steering, -0.5), Ok(-0.52));
//! assert_eq!(calc.compute(&steering, 0.2), Ok(0.47));
//! ```

use serde::Deserialize;
use thiserror::Error;

/// Decimal digits kept by [`ModifierCalculator::default`].
pub const DEFAULT_PRECISION_DIGITS: u32 = 2;

/// Which modifier formula applies to a logical axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisKind {
    /// Signed output in `[-1, 1]`, neutral between two extremes.
    SplitRange,
    /// Output in `[0, 1]`, rest position is 0.
    FullRangeInverted,
}

impl AxisKind {
    /// Kind implied by a logical axis name, if any.
    ///
    /// # Examples
    ///
    /// ```
    /// use wheel_input::controller::modifier::AxisKind;
    ///
    /// assert_eq!(AxisKind::conventional("steering"), Some(AxisKind::SplitRange));
    /// assert_eq!(AxisKind::conventional("brake"), Some(AxisKind::FullRangeInverted));
    /// assert_eq!(AxisKind::conventional("rudder"), None);
    /// ```
    #[must_use]
    pub fn conventional(axis: &str) -> Option<Self> {
        match axis {
            "steering" => Some(AxisKind::SplitRange),
            "throttle" | "brake" | "clutch" => Some(AxisKind::FullRangeInverted),
            _ => None,
        }
    }
}

/// Recorded extremes are unusable (zero magnitude, or `off == full`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("calibration extremes are degenerate")]
pub struct DegenerateCalibration;

/// Calibration of one axis, ready for modifier computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisCalibration {
    SplitRange { left_magnitude: f64, right_magnitude: f64 },
    FullRangeInverted { off: f64, full: f64 },
}

impl AxisCalibration {
    /// Build from the readings recorded for the `min` and `max` steps.
    ///
    /// For a split range axis `min` is the full-left reading and `max` the
    /// full-right one. For a full range inverted axis `min` is the rest
    /// reading and `max` the fully engaged one.
    #[must_use]
    pub fn from_extremes(kind: AxisKind, min: f64, max: f64) -> Self {
        match kind {
            AxisKind::SplitRange => AxisCalibration::SplitRange {
                left_magnitude: min.abs(),
                right_magnitude: max.abs(),
            },
            AxisKind::FullRangeInverted => AxisCalibration::FullRangeInverted { off: min, full: max },
        }
    }

    #[must_use]
    pub fn kind(&self) -> AxisKind {
        match self {
            AxisCalibration::SplitRange { .. } => AxisKind::SplitRange,
            AxisCalibration::FullRangeInverted { .. } => AxisKind::FullRangeInverted,
        }
    }

    /// `true` when no modifier can be computed from these extremes.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        match *self {
            AxisCalibration::SplitRange {
                left_magnitude,
                right_magnitude,
            } => left_magnitude == 0.0 || right_magnitude == 0.0,
            AxisCalibration::FullRangeInverted { off, full } => off == full,
        }
    }

    /// Clamped, unrounded modifier for `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`DegenerateCalibration`] instead of dividing by zero.
    pub fn apply(&self, raw: f64) -> Result<f64, DegenerateCalibration> {
        if self.is_degenerate() {
            return Err(DegenerateCalibration);
        }

        let modifier = match *self {
            AxisCalibration::SplitRange {
                left_magnitude,
                right_magnitude,
            } => {
                if raw < 0.0 {
                    (raw / left_magnitude).clamp(-1.0, 1.0)
                } else {
                    (raw / right_magnitude).clamp(0.0, 1.0)
                }
            }
            AxisCalibration::FullRangeInverted { off, full } => {
                ((off - raw) / (off - full)).clamp(0.0, 1.0)
            }
        };

        Ok(modifier)
    }
}

/// Computes rounded modifiers at a fixed precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifierCalculator {
    precision_digits: u32,
}

impl Default for ModifierCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION_DIGITS)
    }
}

impl ModifierCalculator {
    #[must_use]
    pub fn new(precision_digits: u32) -> Self {
        Self { precision_digits }
    }

    #[must_use]
    pub fn precision_digits(&self) -> u32 {
        self.precision_digits
    }

    /// Clamped modifier for `raw`, rounded to the configured precision.
    ///
    /// # Examples
    ///
    /// ```
    /// use wheel_input::controller::modifier::{AxisCalibration, ModifierCalculator};
    ///
    /// let throttle = AxisCalibration::FullRangeInverted { off: 1.0, full: 0.0 };
    /// let calc = ModifierCalculator::new(2);
    ///
    /// assert_eq!(calc.compute(&throttle, 1.0), Ok(0.0));
    /// assert_eq!(calc.compute(&throttle, 0.25), Ok(0.75));
    /// assert_eq!(calc.compute(&throttle, -0.3), Ok(1.0)); // overtravel
    /// ```
    pub fn compute(&self, calibration: &AxisCalibration, raw: f64) -> Result<f64, DegenerateCalibration> {
        calibration
            .apply(raw)
            .map(|m| round_to_precision(m, self.precision_digits))
    }
}

/// Round `value` to `digits` decimal digits, half away from zero.
///
/// Negative zero is returned as `0.0`.
#[must_use]
pub fn round_to_precision(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    let rounded = (value * factor).round() / factor;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}
