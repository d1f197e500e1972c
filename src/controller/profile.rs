//! # Device Profile Module
//!
//! Per-model controller profiles, one JSON file per supported device model.
//! The file stem is the normalized device name (see
//! [`DeviceMatcher::normalize`](super::matcher::DeviceMatcher::normalize)).
//!
//! ## File Format
//!
//! ```json
//! {
//!   "type": "wheel",
//!   "controls": {
//!     "axis": ["steering", "throttle", "brake"],
//!     "buttons": ["paddle_left", "paddle_right"],
//!     "hats": ["dpad"]
//!   },
//!   "functions": { "steering": "steering", "throttle": "throttle", "brake": "brake" },
//!   "calibration": [
//!     {"axis": 0, "limit": "min", "msg": "Turn wheel fully LEFT"},
//!     {"axis": 0, "limit": "max", "msg": "Turn wheel fully RIGHT"}
//!   ]
//! }
//! ```
//!
//! A calibration step without `axis`/`limit` only shows its message. An
//! optional `"kinds"` object overrides the axis kind convention.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::matcher::DeviceMatcher;
use super::modifier::AxisKind;
use crate::error::{Result, WheelInputError};

/// Profile file extension.
pub const PROFILE_EXTENSION: &str = "json";

/// Which recorded extreme a calibration step captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtremeKind {
    Min,
    Max,
}

/// One operator-confirmed calibration position.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalibrationStep {
    /// Raw axis index, absent for message-only steps.
    #[serde(default)]
    pub axis: Option<usize>,
    #[serde(default)]
    pub limit: Option<ExtremeKind>,
    #[serde(rename = "msg")]
    pub prompt: String,
}

/// Raw control index to logical name tables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControlLayout {
    #[serde(rename = "axis")]
    pub axes: Vec<String>,
    #[serde(default)]
    pub buttons: Vec<String>,
    #[serde(default)]
    pub hats: Vec<String>,
}

/// Parsed and validated device profile.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceProfile {
    #[serde(rename = "type")]
    pub device_type: String,
    pub controls: ControlLayout,
    /// Logical function name to logical axis name.
    #[serde(default)]
    pub functions: BTreeMap<String, String>,
    #[serde(rename = "calibration")]
    pub calibration_plan: Vec<CalibrationStep>,
    /// Per-axis kind overrides.
    #[serde(default)]
    pub kinds: BTreeMap<String, AxisKind>,
}

impl DeviceProfile {
    /// Load and validate a profile file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents, path)
    }

    /// Parse and validate profile JSON. `origin` is only used in error messages.
    pub fn from_json(contents: &str, origin: &Path) -> Result<Self> {
        let profile: DeviceProfile = serde_json::from_str(contents)?;
        profile.validate().map_err(|reason| WheelInputError::InvalidProfile {
            path: origin.to_path_buf(),
            reason,
        })?;
        Ok(profile)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.calibration_plan.is_empty() {
            return Err("calibration plan is empty".to_string());
        }

        let mut seen = BTreeSet::new();
        for name in &self.controls.axes {
            if !seen.insert(name.as_str()) {
                return Err(format!("axis '{}' is listed twice", name));
            }
        }

        let mut recorded: BTreeMap<&str, (bool, bool)> = BTreeMap::new();
        for (i, step) in self.calibration_plan.iter().enumerate() {
            match (step.axis, step.limit) {
                (Some(axis), Some(limit)) => {
                    let name = self.axis_name(axis).ok_or_else(|| {
                        format!(
                            "calibration step {} references axis {} but only {} axes are mapped",
                            i,
                            axis,
                            self.controls.axes.len()
                        )
                    })?;
                    let entry = recorded.entry(name).or_default();
                    match limit {
                        ExtremeKind::Min => entry.0 = true,
                        ExtremeKind::Max => entry.1 = true,
                    }
                }
                (None, None) => {}
                _ => {
                    return Err(format!(
                        "calibration step {} must give both 'axis' and 'limit' or neither",
                        i
                    ))
                }
            }
        }

        for (function, axis) in &self.functions {
            if self.axis_index(axis).is_none() {
                return Err(format!("function '{}' maps to unknown axis '{}'", function, axis));
            }
            if self.axis_kind(axis).is_none() {
                return Err(format!(
                    "axis '{}' has no kind; add it to \"kinds\"",
                    axis
                ));
            }
            if recorded.get(axis.as_str()) != Some(&(true, true)) {
                return Err(format!(
                    "axis '{}' used by function '{}' is not calibrated for both min and max",
                    axis, function
                ));
            }
        }

        Ok(())
    }

    /// Logical name of raw axis `index`.
    #[must_use]
    pub fn axis_name(&self, index: usize) -> Option<&str> {
        self.controls.axes.get(index).map(String::as_str)
    }

    /// Raw index of the axis called `name`.
    #[must_use]
    pub fn axis_index(&self, name: &str) -> Option<usize> {
        self.controls.axes.iter().position(|a| a == name)
    }

    #[must_use]
    pub fn button_name(&self, index: usize) -> Option<&str> {
        self.controls.buttons.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn hat_name(&self, index: usize) -> Option<&str> {
        self.controls.hats.get(index).map(String::as_str)
    }

    /// Logical axis driven by `function`.
    #[must_use]
    pub fn function_axis(&self, function: &str) -> Option<&str> {
        self.functions.get(function).map(String::as_str)
    }

    /// Functions driven by the axis called `axis`.
    pub fn functions_for_axis<'a>(&'a self, axis: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.functions
            .iter()
            .filter(move |(_, a)| a.as_str() == axis)
            .map(|(f, _)| f.as_str())
    }

    /// Kind of the axis called `axis`: explicit override, else naming convention.
    #[must_use]
    pub fn axis_kind(&self, axis: &str) -> Option<AxisKind> {
        self.kinds
            .get(axis)
            .copied()
            .or_else(|| AxisKind::conventional(axis))
    }
}

/// Directory of profile files.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
    matcher: DeviceMatcher,
}

impl ProfileStore {
    /// Create a store over `dir`, resolving names with `matcher`.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(dir: P, matcher: DeviceMatcher) -> Self {
        Self {
            dir: dir.into(),
            matcher,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Matcher used to resolve device names against profile stems.
    #[must_use]
    pub fn matcher(&self) -> &DeviceMatcher {
        &self.matcher
    }

    /// Stems of all profile files, sorted.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be read.
    pub fn supported_stems(&self) -> Result<Vec<String>> {
        let mut stems = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PROFILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }
        stems.sort();
        Ok(stems)
    }

    /// Load the profile of the device called `device_name`.
    ///
    /// # Errors
    ///
    /// - `MissingProfile`: no profile file matches the normalized name
    /// - `ProfileParse` / `InvalidProfile`: the file exists but is unusable
    pub fn load_profile(&self, device_name: &str) -> Result<DeviceProfile> {
        let key = self.matcher.normalize(device_name);
        let stem = self
            .supported_stems()?
            .into_iter()
            .find(|stem| self.matcher.normalize(stem) == key)
            .ok_or_else(|| WheelInputError::MissingProfile {
                device: device_name.to_string(),
            })?;

        let path = self.dir.join(format!("{}.{}", stem, PROFILE_EXTENSION));
        debug!("Loading profile for '{}' from {}", device_name, path.display());
        DeviceProfile::load(path)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use std::io::Write;

    fn parse(json: &str) -> Result<DeviceProfile> {
        DeviceProfile::from_json(json, Path::new("test.json"))
    }

    fn store_with(files: &[(&str, &str)]) -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            let mut file = fs::File::create(dir.path().join(name)).unwrap();
            file.write_all(contents.as_bytes()).unwrap();
        }
        let store = ProfileStore::new(dir.path(), DeviceMatcher::default());
        (dir, store)
    }

    // ==================== Parsing Tests ====================

    #[test]
    fn test_parse_wheel_profile() {
        let profile = wheel_profile();
        assert_eq!(profile.device_type, "wheel");
        assert_eq!(profile.controls.axes, vec!["steering", "throttle", "brake"]);
        assert_eq!(profile.calibration_plan.len(), 8);
        assert_eq!(profile.calibration_plan[1].axis, Some(0));
        assert_eq!(profile.calibration_plan[1].limit, Some(ExtremeKind::Min));
        assert_eq!(profile.calibration_plan[1].prompt, "Turn wheel fully LEFT");
        assert_eq!(profile.calibration_plan[0].axis, None);
    }

    #[test]
    fn test_lookups() {
        let profile = wheel_profile();
        assert_eq!(profile.axis_name(2), Some("brake"));
        assert_eq!(profile.axis_name(3), None);
        assert_eq!(profile.axis_index("throttle"), Some(1));
        assert_eq!(profile.button_name(1), Some("paddle_right"));
        assert_eq!(profile.hat_name(0), Some("dpad"));
        assert_eq!(profile.function_axis("brake"), Some("brake"));
        assert_eq!(profile.function_axis("clutch"), None);
        assert_eq!(profile.functions_for_axis("steering").collect::<Vec<_>>(), vec!["steering"]);
    }

    #[test]
    fn test_axis_kind_convention_and_override() {
        let profile = wheel_profile();
        assert_eq!(profile.axis_kind("steering"), Some(AxisKind::SplitRange));
        assert_eq!(profile.axis_kind("throttle"), Some(AxisKind::FullRangeInverted));
        assert_eq!(profile.axis_kind("rudder"), None);

        let json = WHEEL_PROFILE.replace(
            r#""type": "wheel","#,
            r#""type": "wheel", "kinds": {"throttle": "split_range"},"#,
        );
        let profile = parse(&json).unwrap();
        assert_eq!(profile.axis_kind("throttle"), Some(AxisKind::SplitRange));
    }

    #[test]
    fn test_function_remapping() {
        let json = WHEEL_PROFILE.replace(
            r#""functions": { "steering": "steering", "throttle": "throttle", "brake": "brake" }"#,
            r#""functions": { "steering": "steering", "throttle": "brake", "brake": "throttle" }"#,
        );
        let profile = parse(&json).unwrap();
        assert_eq!(profile.function_axis("throttle"), Some("brake"));
        assert_eq!(profile.functions_for_axis("throttle").collect::<Vec<_>>(), vec!["brake"]);
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_empty_plan_rejected() {
        let json = r#"{"type": "wheel", "controls": {"axis": ["steering"]}, "calibration": []}"#;
        assert!(matches!(parse(json), Err(WheelInputError::InvalidProfile { .. })));
    }

    #[test]
    fn test_step_axis_out_of_range_rejected() {
        let json = r#"{
            "type": "wheel",
            "controls": {"axis": ["steering"]},
            "calibration": [{"axis": 1, "limit": "min", "msg": "x"}]
        }"#;
        assert!(matches!(parse(json), Err(WheelInputError::InvalidProfile { .. })));
    }

    #[test]
    fn test_step_with_axis_but_no_limit_rejected() {
        let json = r#"{
            "type": "wheel",
            "controls": {"axis": ["steering"]},
            "calibration": [{"axis": 0, "msg": "x"}]
        }"#;
        assert!(matches!(parse(json), Err(WheelInputError::InvalidProfile { .. })));
    }

    #[test]
    fn test_function_to_unknown_axis_rejected() {
        let json = r#"{
            "type": "wheel",
            "controls": {"axis": ["steering"]},
            "functions": {"throttle": "throttle"},
            "calibration": [{"msg": "x"}]
        }"#;
        assert!(matches!(parse(json), Err(WheelInputError::InvalidProfile { .. })));
    }

    #[test]
    fn test_function_axis_without_kind_rejected() {
        let json = r#"{
            "type": "stick",
            "controls": {"axis": ["rudder"]},
            "functions": {"yaw": "rudder"},
            "calibration": [
                {"axis": 0, "limit": "min", "msg": "a"},
                {"axis": 0, "limit": "max", "msg": "b"}
            ]
        }"#;
        assert!(matches!(parse(json), Err(WheelInputError::InvalidProfile { .. })));
    }

    #[test]
    fn test_function_axis_half_calibrated_rejected() {
        let json = r#"{
            "type": "wheel",
            "controls": {"axis": ["steering"]},
            "functions": {"steering": "steering"},
            "calibration": [{"axis": 0, "limit": "min", "msg": "a"}]
        }"#;
        assert!(matches!(parse(json), Err(WheelInputError::InvalidProfile { .. })));
    }

    #[test]
    fn test_duplicate_axis_name_rejected() {
        let json = r#"{
            "type": "wheel",
            "controls": {"axis": ["brake", "brake"]},
            "calibration": [{"msg": "a"}]
        }"#;
        assert!(matches!(parse(json), Err(WheelInputError::InvalidProfile { .. })));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(parse("{ not json"), Err(WheelInputError::ProfileParse(_))));
    }

    // ==================== ProfileStore Tests ====================

    #[test]
    fn test_supported_stems_only_json() {
        let (_dir, store) = store_with(&[
            ("logitech_g920.json", WHEEL_PROFILE),
            ("logitech_driving_force.json", WHEEL_PROFILE),
            ("README.md", "not a profile"),
        ]);
        assert_eq!(
            store.supported_stems().unwrap(),
            vec!["logitech_driving_force".to_string(), "logitech_g920".to_string()]
        );
    }

    #[test]
    fn test_load_profile_by_device_name() {
        let (_dir, store) = store_with(&[("logitech_g920.json", WHEEL_PROFILE)]);
        let profile = store.load_profile("Logitech G920").unwrap();
        assert_eq!(profile.device_type, "wheel");
    }

    #[test]
    fn test_load_profile_trims_vendor_suffix() {
        let (_dir, store) = store_with(&[("logitech_g920.json", WHEEL_PROFILE)]);
        assert!(store.load_profile("Logitech G920 USB").is_ok());
    }

    #[test]
    fn test_load_profile_missing() {
        let (_dir, store) = store_with(&[("logitech_g920.json", WHEEL_PROFILE)]);
        assert!(matches!(
            store.load_profile("Logitech G29"),
            Err(WheelInputError::MissingProfile { device }) if device == "Logitech G29"
        ));
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let store = ProfileStore::new("/nonexistent/wheel-input/profiles", DeviceMatcher::default());
        assert!(matches!(store.supported_stems(), Err(WheelInputError::Io(_))));
    }
}
