//! # Controller Module
//!
//! Controller input normalization and calibration.
//!
//! This module handles:
//! - Device enumeration and profile matching
//! - Confirmation-driven calibration of every logical axis
//! - Turning raw axis readings into bounded modifiers
//! - The per-device session tying these together

pub mod backend;
pub mod calibration;
pub mod context;
pub mod evdev_device;
pub mod matcher;
pub mod modifier;
pub mod profile;
pub mod session;
