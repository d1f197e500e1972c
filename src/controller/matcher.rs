//! # Device Matcher Module
//!
//! Enumerates connected devices and keeps the ones that have a profile.
//!
//! ## Name Normalization
//!
//! A device name is normalized by trimming, lower-casing, replacing spaces
//! with underscores and then stripping known vendor suffixes such as `_usb`
//! or `_wireless` (repeatedly, so `"Pad USB Wireless"` becomes `"pad"`).
//! Profile file stems go through the same normalization.
//!
//! ## Matching
//!
//! A device is supported when its normalized name is *equal* to a normalized
//! profile stem. Substring containment is not used: a short
//! stem such as `g9` would otherwise claim `"Logitech G920"` and every other
//! device whose name happens to contain it.
//!
//! ```
//! use wheel_input::controller::matcher::DeviceMatcher;
//!
//! let matcher = DeviceMatcher::default();
//! let connected = ["Logitech G920", "Xbox Controller"];
//! let supported = matcher.filter_supported(&connected, &["logitech_g920"]);
//!
//! assert_eq!(supported.len(), 1);
//! assert_eq!(supported["Logitech G920"], 0);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::backend::DeviceBackend;
use super::profile::ProfileStore;
use crate::config::MatcherConfig;
use crate::error::{Result, WheelInputError};

/// Suffixes stripped from normalized names when no configuration is given.
pub const DEFAULT_VENDOR_SUFFIXES: &[&str] = &["_usb", "_(usb)", "_wired", "_wireless", "_bluetooth"];

/// Supported device name to connection index.
pub type SupportedDevices = BTreeMap<String, usize>;

/// Matched devices that appeared or disappeared between two enumerations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterChange {
    /// Newly matched devices with their connection index.
    pub added: Vec<(String, usize)>,
    /// Names no longer connected.
    pub removed: Vec<String>,
}

impl RosterChange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Filters connected devices down to the ones with a profile.
#[derive(Debug, Clone)]
pub struct DeviceMatcher {
    vendor_suffixes: Vec<String>,
}

impl Default for DeviceMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_VENDOR_SUFFIXES.iter().map(|s| s.to_string()).collect())
    }
}

impl DeviceMatcher {
    /// Creates a matcher stripping the given normalized suffixes.
    #[must_use]
    pub fn new(vendor_suffixes: Vec<String>) -> Self {
        Self { vendor_suffixes }
    }

    #[must_use]
    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(config.vendor_suffixes.clone())
    }

    /// Normalize a device name or profile stem for comparison.
    ///
    /// # Examples
    ///
    /// ```
    /// use wheel_input::controller::matcher::DeviceMatcher;
    ///
    /// let matcher = DeviceMatcher::default();
    /// assert_eq!(matcher.normalize("Logitech G920"), "logitech_g920");
    /// assert_eq!(matcher.normalize("  Logitech G920 USB "), "logitech_g920");
    /// ```
    #[must_use]
    pub fn normalize(&self, name: &str) -> String {
        let mut normalized = name.trim().to_lowercase().replace(' ', "_");

        // A name made only of a suffix is kept as is.
        'strip: loop {
            for suffix in &self.vendor_suffixes {
                if normalized.len() > suffix.len() && normalized.ends_with(suffix.as_str()) {
                    normalized.truncate(normalized.len() - suffix.len());
                    continue 'strip;
                }
            }
            break;
        }

        normalized
    }

    /// Connected device names in connection order.
    pub fn list_connected<B: DeviceBackend>(&self, backend: &mut B) -> Result<Vec<String>> {
        let connected = backend.list_devices()?;
        debug!("Connected devices: {:?}", connected);
        Ok(connected)
    }

    /// Keep the connected devices whose normalized name equals a normalized
    /// profile stem.
    ///
    /// When several connected devices normalize to the same name only the
    /// one with the lowest connection index is kept.
    #[must_use]
    pub fn filter_supported<N, S>(&self, connected: &[N], supported_stems: &[S]) -> SupportedDevices
    where
        N: AsRef<str>,
        S: AsRef<str>,
    {
        let stems: BTreeSet<String> = supported_stems
            .iter()
            .map(|s| self.normalize(s.as_ref()))
            .collect();

        let mut claimed = BTreeSet::new();
        let mut supported = SupportedDevices::new();

        for (index, name) in connected.iter().enumerate() {
            let name = name.as_ref();
            let normalized = self.normalize(name);
            if !stems.contains(&normalized) {
                debug!("Ignoring unsupported device '{}' ({})", name, normalized);
                continue;
            }
            if !claimed.insert(normalized) {
                debug!("Ignoring duplicate device '{}' at index {}", name, index);
                continue;
            }
            supported.insert(name.to_string(), index);
        }

        supported
    }

    /// Enumerate the backend and filter against the store's profiles.
    ///
    /// # Errors
    ///
    /// - `NoSupportedDevice`: nothing connected has a profile
    /// - `Io`: the profile directory cannot be read
    pub fn select_supported<B: DeviceBackend>(
        &self,
        backend: &mut B,
        store: &ProfileStore,
    ) -> Result<SupportedDevices> {
        let connected = self.list_connected(backend)?;
        let stems = store.supported_stems()?;
        let supported = self.filter_supported(&connected, &stems);

        if supported.is_empty() {
            return Err(WheelInputError::NoSupportedDevice);
        }

        info!("Supported devices: {:?}", supported);
        Ok(supported)
    }

    /// Compare two matched rosters.
    #[must_use]
    pub fn diff(previous: &SupportedDevices, current: &SupportedDevices) -> RosterChange {
        let mut added: Vec<(String, usize)> = current
            .iter()
            .filter(|(name, _)| !previous.contains_key(*name))
            .map(|(name, index)| (name.clone(), *index))
            .collect();
        added.sort_by_key(|(_, index)| *index);

        let removed = previous
            .keys()
            .filter(|name| !current.contains_key(*name))
            .cloned()
            .collect();

        RosterChange { added, removed }
    }
}
