//! # Error Types
//!
//! Custom error types for Wheel Input using `thiserror`.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for Wheel Input
#[derive(Debug, Error)]
pub enum WheelInputError {
    /// None of the connected devices has a matching profile
    #[error("No supported controller is connected")]
    NoSupportedDevice,

    /// A matched device has no profile file
    #[error("No profile found for device '{device}'")]
    MissingProfile { device: String },

    /// Calibration recorded identical extremes (or a zero magnitude) for an axis
    #[error("Degenerate calibration for axis '{axis}', recalibration required")]
    CalibrationDegenerate { axis: String },

    /// A modifier was requested before the axis finished calibrating
    #[error("Axis '{axis}' is not calibrated")]
    NotCalibrated { axis: String },

    /// Backend read failed or the device vanished
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The profile has no function with this name
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// Profile content violates a layout invariant
    #[error("Invalid profile {}: {reason}", path.display())]
    InvalidProfile { path: PathBuf, reason: String },

    /// Profile JSON errors
    #[error("Profile parse error: {0}")]
    ProfileParse(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WheelInputError {
    /// Returns `true` when the caller can retry after (re)calibrating.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WheelInputError::NotCalibrated { .. } | WheelInputError::CalibrationDegenerate { .. }
        )
    }
}

/// Result type alias for Wheel Input
pub type Result<T> = std::result::Result<T, WheelInputError>;
