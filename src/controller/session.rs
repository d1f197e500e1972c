//! # Controller Session Module
//!
//! One live device together with its profile and calibration.
//!
//! A session owns its [`DeviceHandle`] exclusively. It is created when a
//! matched device is selected and releases the handle exactly once: on
//! [`ControllerSession::quit`], on drop, or as soon as the device is found
//! to be gone. After that every call that would touch the device returns
//! `DeviceUnavailable`.
//!
//! Modifiers are only computed for axes whose calibration is complete.
//! Degenerate extremes are reported once as `CalibrationDegenerate`; the
//! axis then counts as uncalibrated until the calibration is reset and
//! redone.

use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};

use super::backend::{ControlEvent, DeviceBackend, DeviceHandle};
use super::calibration::{CalibrationState, CalibrationStateMachine, CommittedStep, Step};
use super::context::SessionContext;
use super::modifier::{AxisCalibration, ModifierCalculator};
use super::profile::{DeviceProfile, ProfileStore};
use crate::error::{Result, WheelInputError};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Device open and readable.
    Active,
    /// Device vanished or a read failed; the handle has been released.
    Invalid,
    /// [`ControllerSession::quit`] was called.
    Released,
}

/// A connected, profiled controller.
pub struct ControllerSession<H: DeviceHandle> {
    ctx: SessionContext,
    name: String,
    index: usize,
    handle: Option<H>,
    profile: DeviceProfile,
    calibration: CalibrationStateMachine,
    calculator: ModifierCalculator,
    degenerate: BTreeSet<String>,
    status: SessionStatus,
}

impl<H: DeviceHandle> fmt::Debug for ControllerSession<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerSession")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("status", &self.status)
            .field("step", &self.calibration.step())
            .finish_non_exhaustive()
    }
}

impl<H: DeviceHandle> ControllerSession<H> {
    /// Load the profile of `name` and open the device at `index`.
    ///
    /// The profile is loaded first so a device without a profile is never
    /// opened.
    ///
    /// # Errors
    ///
    /// - `MissingProfile` / `InvalidProfile` / `ProfileParse`: profile problems
    /// - `DeviceUnavailable`: the backend could not open the device
    pub fn open<B>(
        backend: &mut B,
        store: &ProfileStore,
        ctx: &SessionContext,
        name: &str,
        index: usize,
    ) -> Result<Self>
    where
        B: DeviceBackend<Handle = H>,
    {
        let profile = store.load_profile(name)?;
        let handle = backend.open(index)?;
        Ok(Self::new(ctx, name, index, handle, profile))
    }

    /// Wrap an already opened handle.
    #[must_use]
    pub fn new(ctx: &SessionContext, name: &str, index: usize, handle: H, profile: DeviceProfile) -> Self {
        let ctx = ctx.for_device(name, index);
        let span = ctx.span().clone();
        let _enter = span.enter();

        if handle.axis_count() < profile.controls.axes.len() {
            warn!(
                "Device reports {} axes but its profile maps {}",
                handle.axis_count(),
                profile.controls.axes.len()
            );
        }
        info!("Creating '{}' session with {} calibration steps", profile.device_type, profile.calibration_plan.len());

        Self {
            calculator: ctx.calculator(),
            calibration: CalibrationStateMachine::new(&profile),
            ctx,
            name: name.to_string(),
            index,
            handle: Some(handle),
            profile,
            degenerate: BTreeSet::new(),
            status: SessionStatus::Active,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection index the session was opened with.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Profile `type` tag.
    #[must_use]
    pub fn device_type(&self) -> &str {
        &self.profile.device_type
    }

    #[must_use]
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.status == SessionStatus::Active
    }

    // ==================== Calibration ====================

    #[must_use]
    pub fn calibration_step(&self) -> Step {
        self.calibration.step()
    }

    #[must_use]
    pub fn calibration_state(&self) -> &CalibrationState {
        self.calibration.state()
    }

    /// Prompt of the next calibration step, `None` once calibrated.
    #[must_use]
    pub fn calibration_prompt(&self) -> Option<&str> {
        self.calibration.current_prompt()
    }

    /// Operator confirmed the current calibration position.
    ///
    /// Returns `Ok(None)` once calibration is complete.
    pub fn commit_step(&mut self) -> Result<Option<CommittedStep>> {
        self.ensure_active()?;
        let span = self.ctx.span().clone();
        let _enter = span.enter();

        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| WheelInputError::DeviceUnavailable(self.name.clone()))?;

        match self.calibration.commit_step(handle) {
            Ok(Some(step)) => {
                if step.completed {
                    self.warn_degenerate_axes();
                }
                Ok(Some(step))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.invalidate(&e.to_string());
                Err(e)
            }
        }
    }

    /// Start calibration over from the first step.
    pub fn reset_calibration(&mut self) {
        let span = self.ctx.span().clone();
        let _enter = span.enter();
        self.calibration.reset();
        self.degenerate.clear();
    }

    /// `true` when `axis` can produce modifiers.
    #[must_use]
    pub fn is_axis_calibrated(&self, axis: &str) -> bool {
        self.axis_calibration(axis).is_ok()
    }

    /// `true` when every axis used by a function is calibrated.
    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_calibrated()
            && self
                .profile
                .functions
                .values()
                .all(|axis| self.is_axis_calibrated(axis))
    }

    /// Axes whose recorded extremes proved degenerate, in name order.
    ///
    /// The calibration itself stays at [`Step::Calibrated`] until reset, so
    /// this is how a caller tells which axes to redo.
    #[must_use]
    pub fn axes_needing_recalibration(&self) -> Vec<String> {
        self.degenerate.iter().cloned().collect()
    }

    fn axis_calibration(&self, axis: &str) -> Result<AxisCalibration> {
        let not_calibrated = || WheelInputError::NotCalibrated { axis: axis.to_string() };

        if self.degenerate.contains(axis) {
            return Err(not_calibrated());
        }
        let kind = self.profile.axis_kind(axis).ok_or_else(not_calibrated)?;
        self.calibration.calibration_for(axis, kind).ok_or_else(not_calibrated)
    }

    fn warn_degenerate_axes(&self) {
        for axis in self.profile.functions.values() {
            if let Ok(cal) = self.axis_calibration(axis) {
                if cal.is_degenerate() {
                    warn!("Axis '{}' recorded the same position twice: {:?}", axis, cal);
                }
            }
        }
    }

    // ==================== Modifiers ====================

    /// Current modifier of logical function `function`, read from the device.
    ///
    /// # Errors
    ///
    /// - `UnknownFunction`: the profile has no such function
    /// - `NotCalibrated`: the function's axis is not calibrated (yet, or any more)
    /// - `CalibrationDegenerate`: the extremes cannot produce a modifier
    /// - `DeviceUnavailable`: the session is no longer valid or the read failed
    pub fn get_modifier(&mut self, function: &str) -> Result<f64> {
        self.ensure_active()?;
        let axis = self
            .profile
            .function_axis(function)
            .ok_or_else(|| WheelInputError::UnknownFunction(function.to_string()))?
            .to_string();
        let calibration = self.axis_calibration(&axis)?;
        let index = self
            .profile
            .axis_index(&axis)
            .ok_or_else(|| WheelInputError::UnknownFunction(function.to_string()))?;

        let raw = self.read_axis(index)?;
        self.apply(&axis, &calibration, raw)
    }

    /// Modifier of the axis called `axis` for a raw value already drained
    /// from the device.
    pub fn modifier_from_raw(&mut self, axis: &str, raw: f64) -> Result<f64> {
        self.ensure_active()?;
        let calibration = self.axis_calibration(axis)?;
        self.apply(axis, &calibration, raw)
    }

    fn apply(&mut self, axis: &str, calibration: &AxisCalibration, raw: f64) -> Result<f64> {
        match self.calculator.compute(calibration, raw) {
            Ok(modifier) => {
                debug!("Axis {} raw {} -> modifier {}", axis, raw, modifier);
                Ok(modifier)
            }
            Err(_) => {
                let span = self.ctx.span().clone();
                let _enter = span.enter();
                warn!("Degenerate calibration for axis '{}' ({:?}), recalibration required", axis, calibration);
                self.degenerate.insert(axis.to_string());
                Err(WheelInputError::CalibrationDegenerate { axis: axis.to_string() })
            }
        }
    }

    // ==================== Device Access ====================

    /// Raw value of axis `index`.
    pub fn read_axis(&mut self, index: usize) -> Result<f64> {
        let result = self.handle_mut()?.read_axis(index);
        self.track(result)
    }

    /// Level of button `index`.
    pub fn read_button(&mut self, index: usize) -> Result<bool> {
        let result = self.handle_mut()?.read_button(index);
        self.track(result)
    }

    /// Drain pending device events.
    pub fn poll_events(&mut self) -> Result<Vec<ControlEvent>> {
        let result = self.handle_mut()?.poll_events();
        self.track(result)
    }

    /// Invalidate the session unless `connected` still lists its device.
    ///
    /// Returns whether the session is still valid.
    pub fn check_presence<S: AsRef<str>>(&mut self, connected: &[S]) -> bool {
        if self.is_valid() && !connected.iter().any(|n| n.as_ref() == self.name) {
            self.invalidate("device disconnected");
        }
        self.is_valid()
    }

    /// Mark the session invalid and release the device.
    pub fn invalidate(&mut self, reason: &str) {
        if self.status != SessionStatus::Active {
            return;
        }
        let span = self.ctx.span().clone();
        let _enter = span.enter();
        warn!("Session invalid: {}", reason);
        self.status = SessionStatus::Invalid;
        self.release_handle();
    }

    /// Release the device. Safe to call any number of times.
    pub fn quit(&mut self) {
        if self.status == SessionStatus::Active {
            self.status = SessionStatus::Released;
        }
        self.release_handle();
    }

    fn release_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            let span = self.ctx.span().clone();
            let _enter = span.enter();
            info!("Releasing device");
            handle.release();
        }
    }

    fn ensure_active(&self) -> Result<()> {
        match self.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Invalid => Err(WheelInputError::DeviceUnavailable(format!(
                "{} is disconnected",
                self.name
            ))),
            SessionStatus::Released => Err(WheelInputError::DeviceUnavailable(format!(
                "{} has been released",
                self.name
            ))),
        }
    }

    fn handle_mut(&mut self) -> Result<&mut H> {
        self.ensure_active()?;
        let name = &self.name;
        self.handle
            .as_mut()
            .ok_or_else(|| WheelInputError::DeviceUnavailable(name.clone()))
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.invalidate(&e.to_string());
        }
        result
    }
}

impl<H: DeviceHandle> Drop for ControllerSession<H> {
    fn drop(&mut self) {
        self.release_handle();
    }
}
