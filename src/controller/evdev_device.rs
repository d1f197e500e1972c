//! # evdev Controller Backend
//!
//! Linux implementation of [`DeviceBackend`] on top of the evdev interface.
//!
//! ## Device Detection
//!
//! Every `/dev/input/event*` node that reports both absolute axes and keys
//! is listed as a controller, sorted by path so connection indices are
//! stable between scans. Nodes that cannot be opened (usually permission
//! denied) are skipped.
//!
//! ## Input Normalization
//!
//! - Absolute axes (hat axes excluded) are numbered in code order and mapped
//!   from the kernel's `[minimum, maximum]` onto `[-1.0, 1.0]`
//! - Keys from `BTN_MISC` upwards are numbered in code order as buttons
//! - `ABS_HAT0X`..`ABS_HAT3Y` pairs are reported as hat motion

use evdev::{AbsoluteAxisType, Device, InputEventKind, Key};
use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use tracing::{debug, info, trace};

use super::backend::{ControlEvent, DeviceBackend, DeviceHandle, RawAxisReader};
use crate::error::{Result, WheelInputError};

/// First hat axis code (`ABS_HAT0X`)
const ABS_HAT_FIRST: u16 = 0x10;

/// Last hat axis code (`ABS_HAT3Y`)
const ABS_HAT_LAST: u16 = 0x17;

/// First key code treated as a controller button (`BTN_MISC`)
const BTN_FIRST: u16 = 0x100;

fn is_hat_axis(code: u16) -> bool {
    (ABS_HAT_FIRST..=ABS_HAT_LAST).contains(&code)
}

/// Map `value` from `[min, max]` onto `[-1.0, 1.0]`, clamped.
///
/// A degenerate range maps everything to `0.0`.
#[must_use]
pub fn normalize_abs(value: i32, min: i32, max: i32) -> f64 {
    if max <= min {
        return 0.0;
    }
    let span = f64::from(max) - f64::from(min);
    (2.0 * (f64::from(value) - f64::from(min)) / span - 1.0).clamp(-1.0, 1.0)
}

/// Enumerates evdev controllers.
#[derive(Debug, Default)]
pub struct EvdevBackend {
    paths: Vec<PathBuf>,
}

impl EvdevBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceBackend for EvdevBackend {
    type Handle = EvdevDevice;

    fn list_devices(&mut self) -> Result<Vec<String>> {
        let mut found: Vec<(PathBuf, String)> = evdev::enumerate()
            .filter(|(_, device)| device.supported_absolute_axes().is_some() && device.supported_keys().is_some())
            .map(|(path, device)| {
                let name = device.name().unwrap_or("Unknown device").to_string();
                debug!("Found input device: {} ({})", path.display(), name);
                (path, name)
            })
            .collect();

        // Sort for deterministic indices when several controllers are connected
        found.sort_by(|a, b| a.0.cmp(&b.0));

        let (paths, names) = found.into_iter().unzip();
        self.paths = paths;
        Ok(names)
    }

    fn open(&mut self, index: usize) -> Result<EvdevDevice> {
        let path = self
            .paths
            .get(index)
            .ok_or_else(|| WheelInputError::DeviceUnavailable(format!("no device at index {}", index)))?;
        EvdevDevice::open(path.clone())
    }
}

/// An opened evdev controller.
pub struct EvdevDevice {
    device: Device,
    path: PathBuf,
    name: String,
    /// Axis codes with their `(minimum, maximum)`, in code order.
    axes: Vec<(AbsoluteAxisType, i32, i32)>,
    buttons: Vec<Key>,
    /// Last `(x, y)` of every hat that has reported.
    hats: BTreeMap<usize, (i8, i8)>,
    hat_count: usize,
}

impl EvdevDevice {
    /// Open the device node at `path` in non-blocking mode.
    ///
    /// # Errors
    ///
    /// - `DeviceUnavailable`: the node cannot be opened or queried
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wheel_input::controller::evdev_device::EvdevDevice;
    ///
    /// let device = EvdevDevice::open("/dev/input/event5".into())?;
    /// println!("Opened {}", device.path().display());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(path: PathBuf) -> Result<Self> {
        let unavailable = |e: io::Error| WheelInputError::DeviceUnavailable(format!("{}: {}", path.display(), e));

        let device = Device::open(&path).map_err(unavailable)?;
        set_nonblocking(&device).map_err(unavailable)?;

        let name = device.name().unwrap_or("Unknown device").to_string();
        let abs_state = device.get_abs_state().map_err(unavailable)?;

        let mut axes = Vec::new();
        let mut hat_count = 0;
        if let Some(supported) = device.supported_absolute_axes() {
            for axis in supported.iter() {
                if is_hat_axis(axis.0) {
                    hat_count = hat_count.max(usize::from((axis.0 - ABS_HAT_FIRST) / 2) + 1);
                    continue;
                }
                let info = abs_state[usize::from(axis.0)];
                axes.push((axis, info.minimum, info.maximum));
            }
        }

        let buttons: Vec<Key> = device
            .supported_keys()
            .map(|keys| keys.iter().filter(|k| k.code() >= BTN_FIRST).collect())
            .unwrap_or_default();

        info!(
            "Opened {} at {}: {} axes, {} buttons, {} hats",
            name,
            path.display(),
            axes.len(),
            buttons.len(),
            hat_count
        );

        Ok(Self {
            device,
            path,
            name,
            axes,
            buttons,
            hats: BTreeMap::new(),
            hat_count,
        })
    }

    /// The `/dev/input/eventX` node this device was opened from.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn unavailable(&self, e: io::Error) -> WheelInputError {
        WheelInputError::DeviceUnavailable(format!("{}: {}", self.path.display(), e))
    }

    fn axis_index(&self, axis: AbsoluteAxisType) -> Option<usize> {
        self.axes.iter().position(|(code, _, _)| *code == axis)
    }

    fn button_index(&self, key: Key) -> Option<usize> {
        self.buttons.iter().position(|k| *k == key)
    }

    fn hat_event(&mut self, code: u16, value: i32) -> ControlEvent {
        let hat = usize::from((code - ABS_HAT_FIRST) / 2);
        let entry = self.hats.entry(hat).or_insert((0, 0));
        let direction = value.signum() as i8;
        if (code - ABS_HAT_FIRST) % 2 == 0 {
            entry.0 = direction;
        } else {
            entry.1 = direction;
        }
        ControlEvent::HatMotion {
            hat,
            x: entry.0,
            y: entry.1,
        }
    }
}

fn set_nonblocking(device: &Device) -> io::Result<()> {
    let fd = device.as_raw_fd();
    // SAFETY: fd is a valid descriptor owned by `device` for this whole call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above, only the O_NONBLOCK status flag is added.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl RawAxisReader for EvdevDevice {
    fn read_axis(&mut self, index: usize) -> Result<f64> {
        let (axis, min, max) = *self
            .axes
            .get(index)
            .ok_or_else(|| WheelInputError::DeviceUnavailable(format!("{} has no axis {}", self.name, index)))?;
        let state = self.device.get_abs_state().map_err(|e| self.unavailable(e))?;
        Ok(normalize_abs(state[usize::from(axis.0)].value, min, max))
    }
}

impl DeviceHandle for EvdevDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn axis_count(&self) -> usize {
        self.axes.len()
    }

    fn button_count(&self) -> usize {
        self.buttons.len()
    }

    fn hat_count(&self) -> usize {
        self.hat_count
    }

    fn read_button(&mut self, index: usize) -> Result<bool> {
        let key = *self
            .buttons
            .get(index)
            .ok_or_else(|| WheelInputError::DeviceUnavailable(format!("{} has no button {}", self.name, index)))?;
        let state = self.device.get_key_state().map_err(|e| self.unavailable(e))?;
        Ok(state.contains(key))
    }

    fn poll_events(&mut self) -> Result<Vec<ControlEvent>> {
        let fetched = self.device.fetch_events().map(|events| events.collect::<Vec<_>>());
        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Vec::new()),
            Err(e) => return Err(self.unavailable(e)),
        };

        let mut events = Vec::with_capacity(raw.len());
        for event in raw {
            match event.kind() {
                InputEventKind::AbsAxis(axis) if is_hat_axis(axis.0) => {
                    events.push(self.hat_event(axis.0, event.value()));
                }
                InputEventKind::AbsAxis(axis) => {
                    if let Some(index) = self.axis_index(axis) {
                        let (_, min, max) = self.axes[index];
                        events.push(ControlEvent::AxisMotion {
                            axis: index,
                            value: normalize_abs(event.value(), min, max),
                        });
                    }
                }
                InputEventKind::Key(key) => {
                    // value 2 is autorepeat
                    let Some(button) = self.button_index(key) else { continue };
                    match event.value() {
                        1 => events.push(ControlEvent::ButtonDown { button }),
                        0 => events.push(ControlEvent::ButtonUp { button }),
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        trace!("Drained {} events from {}", events.len(), self.name);
        Ok(events)
    }

    fn release(&mut self) {
        info!("Closing {}", self.path.display());
        // The fd is closed when `device` is dropped; ungrab in case anything grabbed it.
        let _ = self.device.ungrab();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_abs_endpoints() {
        assert_eq!(normalize_abs(0, 0, 255), -1.0);
        assert_eq!(normalize_abs(255, 0, 255), 1.0);
        assert_eq!(normalize_abs(-32768, -32768, 32767), -1.0);
        assert_eq!(normalize_abs(32767, -32768, 32767), 1.0);
    }

    #[test]
    fn test_normalize_abs_center() {
        assert!(normalize_abs(32768, 0, 65536).abs() < 1e-12);
        assert!((normalize_abs(128, 0, 255) - 0.003_921_568_627).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_abs_clamps() {
        assert_eq!(normalize_abs(300, 0, 255), 1.0);
        assert_eq!(normalize_abs(-5, 0, 255), -1.0);
    }

    #[test]
    fn test_normalize_abs_degenerate_range() {
        assert_eq!(normalize_abs(10, 10, 10), 0.0);
        assert_eq!(normalize_abs(10, 20, 10), 0.0);
    }

    #[test]
    fn test_hat_axis_codes() {
        assert!(is_hat_axis(AbsoluteAxisType::ABS_HAT0X.0));
        assert!(is_hat_axis(AbsoluteAxisType::ABS_HAT3Y.0));
        assert!(!is_hat_axis(AbsoluteAxisType::ABS_X.0));
        assert!(!is_hat_axis(AbsoluteAxisType::ABS_PRESSURE.0));
    }

    #[test]
    fn test_button_range_starts_at_btn_misc() {
        assert!(Key::BTN_SOUTH.code() >= BTN_FIRST);
        assert!(Key::BTN_TRIGGER.code() >= BTN_FIRST);
        assert!(Key::KEY_A.code() < BTN_FIRST);
    }

    // Integration test - only runs with real hardware
    #[test]
    #[ignore]
    fn test_list_with_real_hardware() {
        // This test requires a connected controller
        let mut backend = EvdevBackend::new();
        let names = backend.list_devices().unwrap();
        assert!(!names.is_empty(), "Should detect a connected controller");

        let mut device = backend.open(0).unwrap();
        assert_eq!(device.name(), names[0]);
        if device.axis_count() > 0 {
            let value = device.read_axis(0).unwrap();
            assert!((-1.0..=1.0).contains(&value));
        }
        device.release();
    }

    // Integration test - only runs with real hardware
    #[test]
    #[ignore]
    fn test_poll_events_with_real_hardware() {
        // This test requires a connected controller
        let mut backend = EvdevBackend::new();
        backend.list_devices().unwrap();
        let mut device = backend.open(0).expect("Controller not found");

        println!("Move an axis or press a button within 5 seconds...");

        // 100 iterations * 50ms
        for _ in 0..100 {
            if let Ok(events) = device.poll_events() {
                if let Some(event) = events.first() {
                    println!("Received event: {:?}", event);
                    return;
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        panic!("No events received from controller");
    }
}
