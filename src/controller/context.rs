//! Session-scoped settings passed explicitly to every component.

use std::time::Duration;
use tracing::{info_span, Span};

use super::modifier::{ModifierCalculator, DEFAULT_PRECISION_DIGITS};
use crate::config::SessionConfig;

/// Settings and tracing span shared by the components of one session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Decimal digits kept in published modifiers.
    pub precision_digits: u32,
    /// Poll tick period.
    pub poll_period: Duration,
    /// Device presence check period, `None` to disable.
    pub presence_check_interval: Option<Duration>,
    span: Span,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            precision_digits: DEFAULT_PRECISION_DIGITS,
            poll_period: Duration::from_millis(10),
            presence_check_interval: Some(Duration::from_secs(1)),
            span: Span::none(),
        }
    }
}

impl SessionContext {
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            precision_digits: config.precision_digits,
            poll_period: config.poll_period(),
            presence_check_interval: config.presence_check_interval(),
            span: Span::none(),
        }
    }

    /// Copy of this context whose log lines are attributed to one device.
    #[must_use]
    pub fn for_device(&self, name: &str, index: usize) -> Self {
        Self {
            span: info_span!("controller", device = %name, index),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_precision(mut self, digits: u32) -> Self {
        self.precision_digits = digits;
        self
    }

    /// Replace the poll period and the presence check interval.
    #[must_use]
    pub fn with_periods(mut self, poll_period: Duration, presence_check_interval: Option<Duration>) -> Self {
        self.poll_period = poll_period;
        self.presence_check_interval = presence_check_interval;
        self
    }

    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    #[must_use]
    pub fn calculator(&self) -> ModifierCalculator {
        ModifierCalculator::new(self.precision_digits)
    }
}
