//! # Session Poller Module
//!
//! Single-owner actor around a [`ControllerSession`].
//!
//! The poller task is the only code that touches the device. On every poll
//! tick it drains pending input events, turns axis motion into modifiers
//! and publishes them on the [`feed`]; on every presence tick it
//! re-enumerates the backend, refreshes the roster of supported devices and
//! invalidates the session when its device is gone. Everything else
//! (calibration confirmations, modifier queries, pausing, switching to
//! another device, quit) arrives as a [`SessionCommand`] through a
//! [`SessionHandle`] and is answered over a oneshot channel, so calibration
//! and modifier computation never interleave.
//!
//! Modifier slots are emptied whenever their value stops holding: on a
//! calibration reset, a pause, a switch, a disconnect and on quit.
//!
//! ## Usage
//!
//! ```no_run
//! use wheel_input::controller::context::SessionContext;
//! use wheel_input::controller::evdev_device::EvdevBackend;
//! use wheel_input::controller::matcher::DeviceMatcher;
//! use wheel_input::controller::profile::ProfileStore;
//! use wheel_input::controller::session::ControllerSession;
//! use wheel_input::poller::SessionPoller;
//!
//! # async fn run() -> wheel_input::error::Result<()> {
//! let mut backend = EvdevBackend::new();
//! let matcher = DeviceMatcher::default();
//! let store = ProfileStore::new("./profiles", matcher.clone());
//! let supported = matcher.select_supported(&mut backend, &store)?;
//! let (name, index) = supported.iter().next().map(|(n, i)| (n.clone(), *i)).unwrap_or_default();
//!
//! let session = ControllerSession::open(&mut backend, &store, &SessionContext::default(), &name, index)?;
//! let (handle, mut feed, task) = SessionPoller::spawn(backend, session, store);
//!
//! while handle.commit_step().await?.is_some() {}
//! println!("steering = {}", handle.get_modifier("steering").await?);
//!
//! handle.quit().await?;
//! task.await.ok();
//! # Ok(())
//! # }
//! ```

pub mod feed;

use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::controller::backend::{ControlEvent, DeviceBackend};
use crate::controller::calibration::{CommittedStep, Step};
use crate::controller::matcher::{DeviceMatcher, SupportedDevices};
use crate::controller::profile::ProfileStore;
use crate::controller::session::{ControllerSession, SessionStatus};
use crate::error::{Result, WheelInputError};
use feed::{DiscreteEvent, FeedReceivers, FeedSender, ModifierUpdate};

/// Capacity of the command channel
const COMMAND_QUEUE_SIZE: usize = 32;

/// Commands sent to the poller
#[derive(Debug)]
pub enum SessionCommand {
    /// Commit the current calibration step
    CommitStep {
        response: oneshot::Sender<Result<Option<CommittedStep>>>,
    },
    /// Restart calibration from the first step
    ResetCalibration { response: oneshot::Sender<()> },
    /// Read the current modifier of a logical function
    GetModifier {
        function: String,
        response: oneshot::Sender<Result<f64>>,
    },
    /// Get a snapshot of the session state
    Snapshot {
        response: oneshot::Sender<SessionSnapshot>,
    },
    /// Stop publishing device input; the device stays open
    Pause { response: oneshot::Sender<()> },
    /// Publish device input again
    Resume { response: oneshot::Sender<()> },
    /// Re-enumerate and return the supported devices
    ListDevices {
        response: oneshot::Sender<Result<SupportedDevices>>,
    },
    /// Replace the session with one on another supported device
    SwitchTo {
        device: String,
        response: oneshot::Sender<Result<()>>,
    },
    /// Release the device and stop the poller
    Quit { response: oneshot::Sender<()> },
}

/// Point-in-time view of a session.
///
/// `step` follows the operator's confirmations only. A degenerate axis
/// leaves it at [`Step::Calibrated`] while `calibrated` turns `false`;
/// `needs_recalibration` then names the axes to redo.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub device: String,
    pub device_type: String,
    pub status: SessionStatus,
    pub step: Step,
    /// Prompt of the step awaiting confirmation.
    pub prompt: Option<String>,
    pub calibrated: bool,
    pub needs_recalibration: Vec<String>,
    /// Device input is not being published.
    pub paused: bool,
}

/// Owns the backend and the session; see the module docs.
pub struct SessionPoller<B: DeviceBackend> {
    backend: B,
    session: ControllerSession<B::Handle>,
    store: ProfileStore,
    roster: SupportedDevices,
    feed: FeedSender,
    commands: mpsc::Receiver<SessionCommand>,
    paused: bool,
    disconnect_announced: bool,
}

impl<B> SessionPoller<B>
where
    B: DeviceBackend + 'static,
    B::Handle: 'static,
{
    /// Build a poller and its client halves without starting it.
    ///
    /// The feed gets one slot per function of `session`'s profile.
    pub fn new(
        backend: B,
        session: ControllerSession<B::Handle>,
        store: ProfileStore,
    ) -> (Self, SessionHandle, FeedReceivers) {
        let (feed, receivers) = feed::channel(session.profile().functions.keys().map(String::as_str));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);

        let mut poller = Self {
            backend,
            session,
            store,
            roster: SupportedDevices::new(),
            feed,
            commands: command_rx,
            paused: false,
            disconnect_announced: false,
        };
        poller.roster = match poller.enumerate() {
            Ok((_, supported)) => supported,
            Err(e) => {
                warn!("Failed to enumerate devices: {}", e);
                let mut roster = SupportedDevices::new();
                roster.insert(poller.session.name().to_string(), poller.session.index());
                roster
            }
        };

        (poller, SessionHandle { commands: command_tx }, receivers)
    }

    /// Start the poller on the current tokio runtime.
    pub fn spawn(
        backend: B,
        session: ControllerSession<B::Handle>,
        store: ProfileStore,
    ) -> (SessionHandle, FeedReceivers, JoinHandle<()>) {
        let (poller, handle, receivers) = Self::new(backend, session, store);
        let task = tokio::spawn(poller.run().instrument(info_span!("poller")));
        (handle, receivers, task)
    }

    /// Poll until quit or until every [`SessionHandle`] is dropped.
    pub async fn run(mut self) {
        let ctx = self.session.context().clone();

        let mut poll_tick = interval(ctx.poll_period);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut presence_tick = ctx.presence_check_interval.map(|period| {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick
        });

        info!("Polling every {:?}", ctx.poll_period);

        loop {
            tokio::select! {
                _ = poll_tick.tick() => {
                    self.drain_events();
                }

                _ = optional_tick(&mut presence_tick) => {
                    self.check_presence();
                }

                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command) {
                                break;
                            }
                        }
                        None => {
                            debug!("All session handles dropped");
                            self.session.quit();
                            self.feed.clear_modifiers();
                            break;
                        }
                    }
                }
            }
        }

        info!("Poller stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::CommitStep { response } => {
                let result = self.session.commit_step();
                if !self.session.is_valid() {
                    self.announce_disconnect();
                }
                let _ = response.send(result);
            }
            SessionCommand::ResetCalibration { response } => {
                self.session.reset_calibration();
                self.feed.clear_modifiers();
                let _ = response.send(());
            }
            SessionCommand::GetModifier { function, response } => {
                let result = self.session.get_modifier(&function);
                if let Err(WheelInputError::CalibrationDegenerate { axis }) = &result {
                    self.request_recalibration(axis);
                }
                if !self.session.is_valid() {
                    self.announce_disconnect();
                }
                let _ = response.send(result);
            }
            SessionCommand::Snapshot { response } => {
                let _ = response.send(self.snapshot());
            }
            SessionCommand::Pause { response } => {
                if !self.paused {
                    info!("Pausing {}", self.session.name());
                    self.paused = true;
                    self.feed.clear_modifiers();
                }
                let _ = response.send(());
            }
            SessionCommand::Resume { response } => {
                if self.paused {
                    info!("Resuming {}", self.session.name());
                    self.paused = false;
                }
                let _ = response.send(());
            }
            SessionCommand::ListDevices { response } => {
                let result = self.refresh_roster().map(|_| self.roster.clone());
                let _ = response.send(result);
            }
            SessionCommand::SwitchTo { device, response } => {
                let _ = response.send(self.switch_to(&device));
            }
            SessionCommand::Quit { response } => {
                self.session.quit();
                self.feed.clear_modifiers();
                let _ = response.send(());
                return false;
            }
        }
        true
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            device: self.session.name().to_string(),
            device_type: self.session.device_type().to_string(),
            status: self.session.status(),
            step: self.session.calibration_step(),
            prompt: self.session.calibration_prompt().map(str::to_string),
            calibrated: self.session.is_calibrated(),
            needs_recalibration: self.session.axes_needing_recalibration(),
            paused: self.paused,
        }
    }

    /// Drain the device and publish what it produced.
    ///
    /// While paused the events stay queued on the device.
    fn drain_events(&mut self) {
        if self.paused || !self.session.is_valid() {
            return;
        }

        let events = match self.session.poll_events() {
            Ok(events) => events,
            Err(e) => {
                warn!("Failed to poll device: {}", e);
                self.announce_disconnect();
                return;
            }
        };
        if events.is_empty() {
            return;
        }
        trace!("Dispatching {} events", events.len());

        // Only the last motion of each axis in a batch matters.
        let mut motion = BTreeMap::new();
        for event in events {
            match event {
                ControlEvent::AxisMotion { axis, value } => {
                    motion.insert(axis, value);
                }
                ControlEvent::ButtonDown { button } => {
                    let (device_type, name) = self.button_labels(button);
                    self.feed.publish_event(DiscreteEvent::ButtonDown {
                        device_type,
                        index: button,
                        name,
                    });
                }
                ControlEvent::ButtonUp { button } => {
                    let (device_type, name) = self.button_labels(button);
                    self.feed.publish_event(DiscreteEvent::ButtonUp {
                        device_type,
                        index: button,
                        name,
                    });
                }
                ControlEvent::HatMotion { hat, x, y } => {
                    let profile = self.session.profile();
                    self.feed.publish_event(DiscreteEvent::HatMotion {
                        device_type: profile.device_type.clone(),
                        index: hat,
                        name: profile.hat_name(hat).map(str::to_string),
                        x,
                        y,
                    });
                }
            }
        }

        for (axis_index, raw) in motion {
            self.publish_axis(axis_index, raw);
        }
    }

    fn button_labels(&self, button: usize) -> (String, Option<String>) {
        let profile = self.session.profile();
        (
            profile.device_type.clone(),
            profile.button_name(button).map(str::to_string),
        )
    }

    fn publish_axis(&mut self, axis_index: usize, raw: f64) {
        let profile = self.session.profile();
        let Some(axis) = profile.axis_name(axis_index).map(str::to_string) else {
            return;
        };
        let functions: Vec<String> = profile.functions_for_axis(&axis).map(str::to_string).collect();
        if functions.is_empty() {
            return;
        }
        let device_type = profile.device_type.clone();

        match self.session.modifier_from_raw(&axis, raw) {
            Ok(value) => {
                for function in functions {
                    if !self.feed.publish_modifier(ModifierUpdate {
                        device_type: device_type.clone(),
                        axis_index,
                        function,
                        raw,
                        value,
                    }) {
                        trace!("No feed for a function of axis {}", axis);
                    }
                }
            }
            Err(WheelInputError::NotCalibrated { .. }) => {
                trace!("Axis {} not calibrated, dropping motion", axis);
            }
            Err(WheelInputError::CalibrationDegenerate { axis }) => {
                self.request_recalibration(&axis);
            }
            Err(e) => {
                warn!("Failed to compute modifier for {}: {}", axis, e);
            }
        }
    }

    fn request_recalibration(&self, axis: &str) {
        self.feed
            .clear_functions(self.session.profile().functions_for_axis(axis));
        self.feed.publish_event(DiscreteEvent::RecalibrationRequested {
            axis: axis.to_string(),
        });
    }

    /// Connected device names and the supported ones among them.
    fn enumerate(&mut self) -> Result<(Vec<String>, SupportedDevices)> {
        let matcher = self.store.matcher();
        let connected = matcher.list_connected(&mut self.backend)?;
        let stems = self.store.supported_stems()?;
        let supported = matcher.filter_supported(&connected, &stems);
        Ok((connected, supported))
    }

    /// Re-enumerate the backend and publish any roster change.
    ///
    /// Returns the connected device names.
    fn refresh_roster(&mut self) -> Result<Vec<String>> {
        let (connected, current) = self.enumerate()?;
        let change = DeviceMatcher::diff(&self.roster, &current);
        // Indices shift when an earlier device leaves, even without a change.
        self.roster = current;
        if !change.is_empty() {
            info!("Supported devices changed: +{:?} -{:?}", change.added, change.removed);
            self.feed.publish_event(DiscreteEvent::RosterChanged(change));
        }
        Ok(connected)
    }

    /// Refresh the roster and invalidate the session if its device is gone.
    fn check_presence(&mut self) {
        let connected = match self.refresh_roster() {
            Ok(connected) => connected,
            Err(e) => {
                warn!("Failed to enumerate devices: {}", e);
                return;
            }
        };

        if !self.session.check_presence(&connected) {
            self.announce_disconnect();
        }
    }

    /// Open `device` and make it the polled session.
    ///
    /// The current session is only released once the new one is open, so a
    /// failed switch leaves it untouched. Switching to the device already
    /// in use is a no-op.
    fn switch_to(&mut self, device: &str) -> Result<()> {
        if device == self.session.name() && self.session.is_valid() {
            return Ok(());
        }

        self.refresh_roster()?;
        let index = *self.roster.get(device).ok_or_else(|| {
            WheelInputError::DeviceUnavailable(format!("'{}' is not a connected supported device", device))
        })?;

        let ctx = self.session.context().clone();
        let next = ControllerSession::open(&mut self.backend, &self.store, &ctx, device, index)?;
        for function in next.profile().functions.keys() {
            if self.session.profile().function_axis(function).is_none() {
                warn!("{} maps '{}', which has no feed", device, function);
            }
        }

        info!("Switching from {} to {}", self.session.name(), device);
        let mut previous = std::mem::replace(&mut self.session, next);
        previous.quit();

        self.feed.clear_modifiers();
        self.paused = false;
        self.disconnect_announced = false;
        Ok(())
    }

    fn announce_disconnect(&mut self) {
        if self.session.status() == SessionStatus::Invalid && !self.disconnect_announced {
            self.disconnect_announced = true;
            self.feed.clear_modifiers();
            self.feed.publish_event(DiscreteEvent::Disconnected {
                device: self.session.name().to_string(),
            });
        }
    }
}

async fn optional_tick(tick: &mut Option<Interval>) {
    match tick {
        Some(tick) => {
            tick.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Client side of a running [`SessionPoller`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.commands
            .send(build(response_tx))
            .await
            .map_err(|_| stopped())?;
        response_rx.await.map_err(|_| stopped())
    }

    /// Confirm the current calibration position.
    ///
    /// Returns `Ok(None)` once calibration is complete.
    pub async fn commit_step(&self) -> Result<Option<CommittedStep>> {
        self.request(|response| SessionCommand::CommitStep { response }).await?
    }

    pub async fn reset_calibration(&self) -> Result<()> {
        self.request(|response| SessionCommand::ResetCalibration { response }).await
    }

    /// Current modifier of `function`, read from the device.
    pub async fn get_modifier(&self, function: &str) -> Result<f64> {
        let function = function.to_string();
        self.request(|response| SessionCommand::GetModifier { function, response })
            .await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|response| SessionCommand::Snapshot { response }).await
    }

    /// Stop publishing input. The device and its calibration are kept and
    /// commands are still served.
    pub async fn pause(&self) -> Result<()> {
        self.request(|response| SessionCommand::Pause { response }).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(|response| SessionCommand::Resume { response }).await
    }

    /// Supported devices connected right now, by name with their index.
    pub async fn list_devices(&self) -> Result<SupportedDevices> {
        self.request(|response| SessionCommand::ListDevices { response }).await?
    }

    /// Release the current device and continue with `device`, uncalibrated.
    ///
    /// # Errors
    ///
    /// - `DeviceUnavailable`: `device` is not a connected supported device or could not be opened
    /// - profile errors from loading its profile
    pub async fn switch_to(&self, device: &str) -> Result<()> {
        let device = device.to_string();
        self.request(|response| SessionCommand::SwitchTo { device, response })
            .await?
    }

    /// Release the device and stop the poller. Safe to call more than once.
    pub async fn quit(&self) -> Result<()> {
        match self.request(|response| SessionCommand::Quit { response }).await {
            Ok(()) | Err(WheelInputError::DeviceUnavailable(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn stopped() -> WheelInputError {
    WheelInputError::DeviceUnavailable("session poller stopped".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::backend::mocks::{ScriptedBackend, ScriptedDevice};
    use crate::controller::context::SessionContext;
    use crate::controller::profile::fixtures::{wheel_profile, WHEEL_PROFILE};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};
    use tokio_test::{assert_err, assert_ok};

    const WAIT: Duration = Duration::from_secs(2);

    /// A running poller on "Logitech G920" with a second profiled wheel
    /// and an unprofiled pad connected.
    struct Rig {
        backend: ScriptedBackend,
        device: ScriptedDevice,
        other: ScriptedDevice,
        handle: SessionHandle,
        feed: FeedReceivers,
        task: JoinHandle<()>,
        _profiles: TempDir,
    }

    fn start() -> Rig {
        let profiles = tempfile::tempdir().unwrap();
        for stem in ["logitech_g920", "logitech_driving_force_gt"] {
            std::fs::write(profiles.path().join(format!("{}.json", stem)), WHEEL_PROFILE).unwrap();
        }
        let store = ProfileStore::new(profiles.path(), DeviceMatcher::default());

        let device = ScriptedDevice::new("Logitech G920", 3, 4);
        let other = ScriptedDevice::new("Logitech Driving Force GT", 3, 4);
        let backend = ScriptedBackend::new(vec![
            device.clone(),
            ScriptedDevice::new("Xbox Controller", 6, 10),
            other.clone(),
        ]);

        let ctx = SessionContext::default()
            .with_periods(Duration::from_millis(1), Some(Duration::from_millis(10)));
        let session = ControllerSession::new(&ctx, "Logitech G920", 0, device.clone(), wheel_profile());
        let (handle, feed, task) = SessionPoller::spawn(backend.clone(), session, store);

        Rig {
            backend,
            device,
            other,
            handle,
            feed,
            task,
            _profiles: profiles,
        }
    }

    async fn calibrate(device: &ScriptedDevice, handle: &SessionHandle) {
        assert_ok!(handle.commit_step().await);
        for (i, value) in [-0.97, 0.43, 1.0, 0.0, 1.0, 0.0].iter().enumerate() {
            device.set_axis(i / 2, *value);
            assert_ok!(handle.commit_step().await);
        }
        let last = handle.commit_step().await.unwrap().unwrap();
        assert!(last.completed);
    }

    async fn next_event(feed: &mut FeedReceivers) -> DiscreteEvent {
        timeout(WAIT, feed.next_event()).await.unwrap().unwrap()
    }

    /// Skip roster changes until the session's disconnect is announced.
    async fn wait_for_disconnect(feed: &mut FeedReceivers) -> String {
        loop {
            match next_event(feed).await {
                DiscreteEvent::RosterChanged(_) => {}
                DiscreteEvent::Disconnected { device } => return device,
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    /// Push a full-throttle motion and wait until the feed shows it.
    async fn full_throttle(rig: &Rig) {
        let mut throttle = rig.feed.subscribe("throttle").unwrap();
        throttle.borrow_and_update();
        rig.device.push_event(ControlEvent::AxisMotion { axis: 1, value: 0.0 });
        assert_ok!(timeout(WAIT, throttle.changed()).await.unwrap());
        assert_eq!(rig.feed.latest("throttle").map(|u| u.value), Some(1.0));
    }

    // ==================== Command Tests ====================

    #[tokio::test]
    async fn test_calibrate_and_query_through_handle() {
        let rig = start();

        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.step, Step::Pending(0));
        assert_eq!(snapshot.prompt.as_deref(), Some("Starting calibration"));
        assert!(!snapshot.calibrated);
        assert!(!snapshot.paused);

        assert!(matches!(
            rig.handle.get_modifier("steering").await,
            Err(WheelInputError::NotCalibrated { .. })
        ));

        calibrate(&rig.device, &rig.handle).await;
        assert!(rig.handle.snapshot().await.unwrap().calibrated);
        assert_eq!(rig.handle.commit_step().await.unwrap(), None);

        rig.device.set_axis(0, -0.5);
        assert_eq!(rig.handle.get_modifier("steering").await.unwrap(), -0.52);
        rig.device.set_axis(1, 0.25);
        assert_eq!(rig.handle.get_modifier("throttle").await.unwrap(), 0.75);
    }

    #[tokio::test]
    async fn test_reset_calibration() {
        let rig = start();
        calibrate(&rig.device, &rig.handle).await;

        assert_ok!(rig.handle.reset_calibration().await);
        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.step, Step::Pending(0));
        assert!(!snapshot.calibrated);
        assert_err!(rig.handle.get_modifier("brake").await);
    }

    #[tokio::test]
    async fn test_quit_releases_and_stops() {
        let rig = start();
        calibrate(&rig.device, &rig.handle).await;
        full_throttle(&rig).await;

        assert_ok!(rig.handle.quit().await);
        assert_ok!(timeout(WAIT, rig.task).await.unwrap());
        assert_eq!(rig.device.release_count(), 1);
        assert_eq!(rig.feed.latest("throttle"), None);

        // Second quit is a no-op, other commands fail.
        assert_ok!(rig.handle.quit().await);
        assert!(matches!(
            rig.handle.get_modifier("steering").await,
            Err(WheelInputError::DeviceUnavailable(_))
        ));
        assert_eq!(rig.device.release_count(), 1);
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_poller() {
        let rig = start();
        drop(rig.handle);

        assert_ok!(timeout(WAIT, rig.task).await.unwrap());
        assert_eq!(rig.device.release_count(), 1);
    }

    // ==================== Feed Tests ====================

    #[tokio::test]
    async fn test_axis_motion_published_after_calibration() {
        let rig = start();
        let mut throttle = rig.feed.subscribe("throttle").unwrap();
        calibrate(&rig.device, &rig.handle).await;

        {
            // Same batch: only the last motion is published.
            let mut script = rig.device.script.lock().unwrap();
            script.pending.push_back(ControlEvent::AxisMotion { axis: 1, value: 0.9 });
            script.pending.push_back(ControlEvent::AxisMotion { axis: 1, value: 0.25 });
        }

        assert_ok!(timeout(WAIT, throttle.changed()).await.unwrap());
        let update = throttle.borrow_and_update().clone().unwrap();
        assert_eq!(update.device_type, "wheel");
        assert_eq!(update.axis_index, 1);
        assert_eq!(update.function, "throttle");
        assert_eq!(update.raw, 0.25);
        assert_eq!(update.value, 0.75);
        assert_eq!(rig.feed.latest("steering"), None);
    }

    #[tokio::test]
    async fn test_axis_motion_before_calibration_not_published() {
        let mut rig = start();
        let mut steering = rig.feed.subscribe("steering").unwrap();

        rig.device.push_event(ControlEvent::AxisMotion { axis: 0, value: -0.5 });
        rig.device.push_event(ControlEvent::ButtonDown { button: 0 });

        // The button proves the batch was drained.
        assert!(matches!(next_event(&mut rig.feed).await, DiscreteEvent::ButtonDown { .. }));
        assert!(!steering.has_changed().unwrap());
        assert!(steering.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn test_button_edges_delivered_in_order() {
        let mut rig = start();

        rig.device.push_event(ControlEvent::ButtonDown { button: 1 });
        rig.device.push_event(ControlEvent::ButtonUp { button: 1 });
        rig.device.push_event(ControlEvent::ButtonDown { button: 1 });
        rig.device.push_event(ControlEvent::HatMotion { hat: 0, x: -1, y: 0 });

        assert_eq!(
            next_event(&mut rig.feed).await,
            DiscreteEvent::ButtonDown {
                device_type: "wheel".to_string(),
                index: 1,
                name: Some("paddle_right".to_string()),
            }
        );
        assert!(matches!(next_event(&mut rig.feed).await, DiscreteEvent::ButtonUp { index: 1, .. }));
        assert!(matches!(next_event(&mut rig.feed).await, DiscreteEvent::ButtonDown { index: 1, .. }));
        assert_eq!(
            next_event(&mut rig.feed).await,
            DiscreteEvent::HatMotion {
                device_type: "wheel".to_string(),
                index: 0,
                name: Some("dpad".to_string()),
                x: -1,
                y: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_degenerate_axis_requests_recalibration() {
        let mut rig = start();

        assert_ok!(rig.handle.commit_step().await);
        for (i, value) in [-0.97, 0.43, 1.0, 0.0, 0.4, 0.4].iter().enumerate() {
            rig.device.set_axis(i / 2, *value);
            assert_ok!(rig.handle.commit_step().await);
        }
        assert_ok!(rig.handle.commit_step().await);
        assert!(rig.handle.snapshot().await.unwrap().needs_recalibration.is_empty());

        assert!(matches!(
            rig.handle.get_modifier("brake").await,
            Err(WheelInputError::CalibrationDegenerate { .. })
        ));
        assert_eq!(
            next_event(&mut rig.feed).await,
            DiscreteEvent::RecalibrationRequested {
                axis: "brake".to_string()
            }
        );

        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.step, Step::Calibrated);
        assert!(!snapshot.calibrated);
        assert_eq!(snapshot.needs_recalibration, vec!["brake".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_modifiers_cleared_on_reset_and_disconnect() {
        let mut rig = start();
        calibrate(&rig.device, &rig.handle).await;
        full_throttle(&rig).await;

        assert_ok!(rig.handle.reset_calibration().await);
        assert_eq!(rig.feed.latest("throttle"), None);

        calibrate(&rig.device, &rig.handle).await;
        full_throttle(&rig).await;

        rig.backend.disconnect("Logitech G920");
        assert_eq!(wait_for_disconnect(&mut rig.feed).await, "Logitech G920");
        assert_eq!(rig.feed.latest("throttle"), None);
    }

    // ==================== Pause Tests ====================

    #[tokio::test]
    async fn test_pause_holds_input_until_resume() {
        let mut rig = start();
        calibrate(&rig.device, &rig.handle).await;
        full_throttle(&rig).await;

        assert_ok!(rig.handle.pause().await);
        assert!(rig.handle.snapshot().await.unwrap().paused);
        assert_eq!(rig.feed.latest("throttle"), None);

        rig.device.push_event(ControlEvent::ButtonDown { button: 2 });
        sleep(Duration::from_millis(50)).await;
        assert_eq!(rig.feed.try_next_event(), None);

        // Device and calibration are kept while paused.
        assert_eq!(rig.device.release_count(), 0);
        rig.device.set_axis(2, 0.5);
        assert_eq!(rig.handle.get_modifier("brake").await.unwrap(), 0.5);

        assert_ok!(rig.handle.resume().await);
        assert!(matches!(
            next_event(&mut rig.feed).await,
            DiscreteEvent::ButtonDown { index: 2, .. }
        ));
        let snapshot = rig.handle.snapshot().await.unwrap();
        assert!(!snapshot.paused);
        assert!(snapshot.calibrated);
    }

    // ==================== Roster Tests ====================

    #[tokio::test]
    async fn test_list_devices_returns_supported_only() {
        let rig = start();
        let roster = rig.handle.list_devices().await.unwrap();

        assert_eq!(roster.get("Logitech G920"), Some(&0));
        assert_eq!(roster.get("Logitech Driving Force GT"), Some(&2));
        assert!(!roster.contains_key("Xbox Controller"));
    }

    #[tokio::test]
    async fn test_switch_to_other_device() {
        let mut rig = start();
        calibrate(&rig.device, &rig.handle).await;
        full_throttle(&rig).await;

        assert_ok!(rig.handle.switch_to("Logitech Driving Force GT").await);
        assert_eq!(rig.device.release_count(), 1);
        assert_eq!(rig.feed.latest("throttle"), None);

        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.device, "Logitech Driving Force GT");
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert_eq!(snapshot.step, Step::Pending(0));

        rig.other.push_event(ControlEvent::ButtonDown { button: 3 });
        assert_eq!(
            next_event(&mut rig.feed).await,
            DiscreteEvent::ButtonDown {
                device_type: "wheel".to_string(),
                index: 3,
                name: Some("select".to_string()),
            }
        );

        assert_ok!(rig.handle.quit().await);
        assert_eq!(rig.other.release_count(), 1);
        assert_eq!(rig.device.release_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_switch_keeps_current_session() {
        let rig = start();
        calibrate(&rig.device, &rig.handle).await;

        assert!(matches!(
            rig.handle.switch_to("Xbox Controller").await,
            Err(WheelInputError::DeviceUnavailable(_))
        ));
        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.device, "Logitech G920");
        assert!(snapshot.calibrated);
        assert_eq!(rig.device.release_count(), 0);

        // Already in use.
        assert_ok!(rig.handle.switch_to("Logitech G920").await);
        assert_eq!(rig.device.release_count(), 0);
    }

    #[tokio::test]
    async fn test_switch_after_disconnect() {
        let mut rig = start();
        rig.backend.disconnect("Logitech G920");
        wait_for_disconnect(&mut rig.feed).await;

        // The remaining wheel moved down to index 1.
        let roster = rig.handle.list_devices().await.unwrap();
        assert_eq!(roster.get("Logitech Driving Force GT"), Some(&1));

        assert_ok!(rig.handle.switch_to("Logitech Driving Force GT").await);
        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert_eq!(snapshot.device, "Logitech Driving Force GT");
        calibrate(&rig.other, &rig.handle).await;
    }

    // ==================== Presence Tests ====================

    #[tokio::test]
    async fn test_disconnect_invalidates_session() {
        let mut rig = start();
        calibrate(&rig.device, &rig.handle).await;

        rig.backend.disconnect("Logitech G920");

        let mut saw_roster_change = false;
        loop {
            match next_event(&mut rig.feed).await {
                DiscreteEvent::RosterChanged(change) => {
                    assert_eq!(change.removed, vec!["Logitech G920".to_string()]);
                    saw_roster_change = true;
                }
                DiscreteEvent::Disconnected { device } => {
                    assert_eq!(device, "Logitech G920");
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(saw_roster_change);

        assert_eq!(rig.handle.snapshot().await.unwrap().status, SessionStatus::Invalid);
        assert!(matches!(
            rig.handle.get_modifier("steering").await,
            Err(WheelInputError::DeviceUnavailable(_))
        ));
        assert_eq!(rig.device.release_count(), 1);

        assert_ok!(rig.handle.quit().await);
        assert_eq!(rig.device.release_count(), 1);
    }

    #[tokio::test]
    async fn test_read_failure_announces_disconnect() {
        let mut rig = start();
        rig.device.set_fail_reads(true);

        assert_eq!(
            next_event(&mut rig.feed).await,
            DiscreteEvent::Disconnected {
                device: "Logitech G920".to_string()
            }
        );
        assert_eq!(rig.device.release_count(), 1);
    }
}
