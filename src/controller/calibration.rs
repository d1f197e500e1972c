//! # Calibration Module
//!
//! Confirmation-driven calibration of a device's logical axes.
//!
//! The profile's calibration plan is an ordered list of physical positions.
//! Each call to [`CalibrationStateMachine::commit_step`] is one operator
//! confirmation: the current raw value of the step's axis is read and stored
//! as that axis' `min` or `max` extreme, the step's prompt is returned and
//! the machine advances. Nothing ever happens on a timer.
//!
//! ```text
//! Pending(0) -> Pending(1) -> ... -> Pending(N-1) -> Calibrated
//! ```
//!
//! `Calibrated` is terminal: further commits do nothing at all (no read, no
//! prompt, no mutation) until [`CalibrationStateMachine::reset`] is called.
//!
//! ## Usage
//!
//! ```
//! use std::path::Path;
//! use wheel_input::controller::backend::RawAxisReader;
//! use wheel_input::controller::calibration::{CalibrationStateMachine, Step};
//! use wheel_input::controller::profile::DeviceProfile;
//!
//! struct Fixed(f64);
//! impl RawAxisReader for Fixed {
//!     fn read_axis(&mut self, _index: usize) -> wheel_input::error::Result<f64> {
//!         Ok(self.0)
//!     }
//! }
//!
//! let profile = DeviceProfile::from_json(r#"{
//!     "type": "pedal",
//!     "controls": {"axis": ["brake"]},
//!     "functions": {"brake": "brake"},
//!     "calibration": [
//!         {"axis": 0, "limit": "min", "msg": "Release brake fully"},
//!         {"axis": 0, "limit": "max", "msg": "Press brake fully"}
//!     ]
//! }"#, Path::new("pedal.json"))?;
//!
//! let mut machine = CalibrationStateMachine::new(&profile);
//! machine.commit_step(&mut Fixed(1.0))?;
//! machine.commit_step(&mut Fixed(-1.0))?;
//!
//! assert_eq!(machine.step(), Step::Calibrated);
//! assert!(machine.commit_step(&mut Fixed(0.0))?.is_none());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeMap;
use tracing::{debug, info, trace};

use super::backend::RawAxisReader;
use super::modifier::{AxisCalibration, AxisKind};
use super::profile::{DeviceProfile, ExtremeKind};
use crate::error::Result;

/// Position of the machine in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Waiting for the confirmation of plan step `n`.
    Pending(usize),
    /// Every step has been committed.
    Calibrated,
}

/// Extremes recorded for one logical axis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisExtremes {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl AxisExtremes {
    fn record(&mut self, kind: ExtremeKind, value: f64) {
        match kind {
            ExtremeKind::Min => self.min = Some(value),
            ExtremeKind::Max => self.max = Some(value),
        }
    }

    /// Both extremes, once recorded.
    #[must_use]
    pub fn both(&self) -> Option<(f64, f64)> {
        self.min.zip(self.max)
    }
}

/// Everything calibration has recorded so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationState {
    extremes: BTreeMap<String, AxisExtremes>,
    step: usize,
    calibrated: bool,
}

impl CalibrationState {
    /// Extremes recorded for `axis`.
    #[must_use]
    pub fn extremes(&self, axis: &str) -> Option<&AxisExtremes> {
        self.extremes.get(axis)
    }

    /// Index of the next step to commit.
    #[must_use]
    pub fn step_index(&self) -> usize {
        self.step
    }

    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }
}

/// A value stored by a committed step.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedExtreme {
    pub axis: String,
    pub kind: ExtremeKind,
    pub value: f64,
}

/// Outcome of one effective [`CalibrationStateMachine::commit_step`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedStep {
    /// Plan index of the committed step.
    pub index: usize,
    /// The step's prompt message.
    pub prompt: String,
    /// `None` for message-only steps.
    pub recorded: Option<RecordedExtreme>,
    /// `true` when this commit completed the plan.
    pub completed: bool,
}

#[derive(Debug, Clone)]
struct StepTarget {
    axis_index: usize,
    axis_name: String,
    kind: ExtremeKind,
}

#[derive(Debug, Clone)]
struct PlannedStep {
    target: Option<StepTarget>,
    prompt: String,
}

/// Drives a profile's calibration plan.
#[derive(Debug, Clone)]
pub struct CalibrationStateMachine {
    plan: Vec<PlannedStep>,
    state: CalibrationState,
}

impl CalibrationStateMachine {
    /// Creates an uncalibrated machine for `profile`'s plan.
    #[must_use]
    pub fn new(profile: &DeviceProfile) -> Self {
        let plan = profile
            .calibration_plan
            .iter()
            .map(|step| {
                let target = match (step.axis, step.limit) {
                    (Some(axis_index), Some(kind)) => profile.axis_name(axis_index).map(|name| StepTarget {
                        axis_index,
                        axis_name: name.to_string(),
                        kind,
                    }),
                    _ => None,
                };
                PlannedStep {
                    target,
                    prompt: step.prompt.clone(),
                }
            })
            .collect::<Vec<_>>();

        let state = CalibrationState {
            calibrated: plan.is_empty(),
            ..CalibrationState::default()
        };

        Self { plan, state }
    }

    /// Number of steps in the plan.
    #[must_use]
    pub fn plan_len(&self) -> usize {
        self.plan.len()
    }

    #[must_use]
    pub fn step(&self) -> Step {
        if self.state.calibrated {
            Step::Calibrated
        } else {
            Step::Pending(self.state.step)
        }
    }

    #[must_use]
    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.state.calibrated
    }

    /// Prompt of the step awaiting confirmation.
    #[must_use]
    pub fn current_prompt(&self) -> Option<&str> {
        match self.step() {
            Step::Pending(index) => self.plan.get(index).map(|s| s.prompt.as_str()),
            Step::Calibrated => None,
        }
    }

    /// Commit the current step.
    ///
    /// Returns `Ok(None)` without touching `reader` once calibrated.
    ///
    /// # Errors
    ///
    /// Propagates the reader's error; the state is left unchanged.
    pub fn commit_step<R: RawAxisReader + ?Sized>(&mut self, reader: &mut R) -> Result<Option<CommittedStep>> {
        if self.state.calibrated {
            trace!("Calibration already complete, ignoring commit");
            return Ok(None);
        }

        let index = self.state.step;
        let Some(planned) = self.plan.get(index) else {
            return Ok(None);
        };

        let recorded = match &planned.target {
            Some(target) => {
                let value = reader.read_axis(target.axis_index)?;
                debug!(
                    "Saving axis {} ({}) {:?} as {}",
                    target.axis_index, target.axis_name, target.kind, value
                );
                self.state
                    .extremes
                    .entry(target.axis_name.clone())
                    .or_default()
                    .record(target.kind, value);
                Some(RecordedExtreme {
                    axis: target.axis_name.clone(),
                    kind: target.kind,
                    value,
                })
            }
            None => None,
        };

        info!("Calibration step {}/{}: {}", index + 1, self.plan.len(), planned.prompt);
        let prompt = planned.prompt.clone();

        self.state.step += 1;
        let completed = self.state.step == self.plan.len();
        if completed {
            self.state.calibrated = true;
            info!("Calibration complete");
        }

        Ok(Some(CommittedStep {
            index,
            prompt,
            recorded,
            completed,
        }))
    }

    /// Discard everything recorded and restart at step 0.
    pub fn reset(&mut self) {
        info!("Resetting calibration");
        self.state = CalibrationState {
            calibrated: self.plan.is_empty(),
            ..CalibrationState::default()
        };
    }

    /// Calibration of `axis` as `kind`, available only once the whole plan
    /// is complete and both extremes of the axis were recorded.
    #[must_use]
    pub fn calibration_for(&self, axis: &str, kind: AxisKind) -> Option<AxisCalibration> {
        if !self.state.calibrated {
            return None;
        }
        let (min, max) = self.state.extremes(axis)?.both()?;
        Some(AxisCalibration::from_extremes(kind, min, max))
    }
}
