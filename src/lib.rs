// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Server fan control over IPMI.
//!
//! A [`Controller`](controller::Controller) turns a rolling CPU temperature
//! history into a fan speed, switching between an idle curve and a
//! sustained-load curve with hysteresis. The [`daemon`] module drives it
//! from a periodic poll loop against a BMC reached through `ipmitool`.

pub mod clock;
pub mod config;
pub mod controller;
pub mod curve;
pub mod daemon;
pub mod error;
pub mod history;
pub mod ipmi;

pub use error::{Error, Result};
