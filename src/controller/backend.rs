//! Trait abstraction for controller device backends to enable testing
//!
//! The core never talks to a device library directly. It sees an ordered
//! list of connected device names, opens one by its connection index and
//! then reads axes in `[-1.0, 1.0]`, button levels and pending events
//! through a [`DeviceHandle`]. Handles are not assumed to be thread-safe:
//! exactly one owner (the session, usually inside the poller task) uses
//! them.

use crate::error::Result;

/// A single input transition drained from a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    /// Absolute axis moved, `value` normalized to `[-1.0, 1.0]`.
    AxisMotion { axis: usize, value: f64 },
    /// Button pressed.
    ButtonDown { button: usize },
    /// Button released.
    ButtonUp { button: usize },
    /// Hat switch moved, each component in `{-1, 0, 1}`.
    HatMotion { hat: usize, x: i8, y: i8 },
}

/// Reads the current raw value of an axis.
///
/// Split out of [`DeviceHandle`] so calibration can be driven by scripted
/// values without any device I/O.
#[cfg_attr(test, mockall::automock)]
pub trait RawAxisReader {
    /// Current value of axis `index` in `[-1.0, 1.0]`.
    fn read_axis(&mut self, index: usize) -> Result<f64>;
}

/// Exclusive handle to one opened device.
pub trait DeviceHandle: RawAxisReader + Send {
    /// Device name as reported by the backend.
    fn name(&self) -> &str;

    /// Number of absolute axes (hats excluded).
    fn axis_count(&self) -> usize;

    /// Number of buttons.
    fn button_count(&self) -> usize;

    /// Number of hat switches.
    fn hat_count(&self) -> usize;

    /// Current level of button `index`.
    fn read_button(&mut self, index: usize) -> Result<bool>;

    /// Drain the events queued since the last call without blocking.
    fn poll_events(&mut self) -> Result<Vec<ControlEvent>>;

    /// Release the underlying device. Called at most once by the session.
    fn release(&mut self);
}

/// Enumerates and opens devices.
pub trait DeviceBackend: Send {
    /// Handle type produced by [`DeviceBackend::open`].
    type Handle: DeviceHandle;

    /// Names of connected devices in connection order. The position in this
    /// list is the device index used everywhere else.
    fn list_devices(&mut self) -> Result<Vec<String>>;

    /// Open the device at `index` of the last [`DeviceBackend::list_devices`] call.
    fn open(&mut self, index: usize) -> Result<Self::Handle>;
}


#[cfg(test)]
mod tests {
    use super::mocks::*;
    use super::*;

    #[test]
    fn test_scripted_backend_lists_in_connection_order() {
        let mut backend = ScriptedBackend::new(vec![
            ScriptedDevice::new("Logitech G920", 3, 4),
            ScriptedDevice::new("Xbox Controller", 6, 10),
        ]);
        assert_eq!(
            backend.list_devices().unwrap(),
            vec!["Logitech G920".to_string(), "Xbox Controller".to_string()]
        );

        backend.disconnect("Logitech G920");
        assert_eq!(backend.list_devices().unwrap(), vec!["Xbox Controller".to_string()]);
        assert_eq!(backend.open(0).unwrap().name(), "Xbox Controller");
    }

    #[test]
    fn test_scripted_device_reads_and_drains() {
        let device = ScriptedDevice::new("Logitech G920", 3, 4);
        device.set_axis(1, -0.25);
        device.push_event(ControlEvent::ButtonDown { button: 2 });

        let mut handle = device.clone();
        assert_eq!(handle.read_axis(1).unwrap(), -0.25);
        assert_eq!(handle.poll_events().unwrap(), vec![ControlEvent::ButtonDown { button: 2 }]);
        assert!(handle.poll_events().unwrap().is_empty());
        assert_eq!(device.read_count(), 1);
    }

    #[test]
    fn test_scripted_device_read_error() {
        let device = ScriptedDevice::new("Logitech G920", 3, 4);
        device.set_fail_reads(true);
        let mut handle = device.clone();
        assert!(handle.read_axis(0).is_err());
        assert!(handle.poll_events().is_err());
    }
}
