//! # Wheel Input Library
//!
//! Read a steering wheel, pedals or gamepad and turn it into calibrated
//! steering, throttle and brake modifiers.
//!
//! Connected devices are matched against per-model JSON profiles, an
//! operator walks each device through its calibration plan, and the
//! resulting extremes map raw axis readings onto bounded modifiers that a
//! poller publishes for the rest of the application.

pub mod config;
pub mod controller;
pub mod error;
pub mod poller;
