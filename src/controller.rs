// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Two-mode fan controller.
//!
//! The controller keeps a rolling temperature history and picks between an
//! idle curve and a sustained-load curve. It escalates to the sustained
//! curve once more than 90% of recent readings are over the overheat
//! threshold, where "recent" shrinks the hotter the machine runs. It only
//! drops back once fewer than 10% of readings across the full allowance
//! window are over the threshold.

use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::curve::{FanCurve, clamp};
use crate::history::TemperatureHistory;
use std::fmt;
use std::time::{Duration, Instant};

/// Window used to find the current peak temperature.
pub const PEAK_WINDOW: Duration = Duration::from_secs(15);

const ESCALATE_FRACTION: f32 = 0.9;
const DEESCALATE_FRACTION: f32 = 0.1;

/// Which curve is driving the fans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idling,
    SustainedLoad,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Idling => f.write_str("idling"),
            Mode::SustainedLoad => f.write_str("sustained load"),
        }
    }
}

/// Result of one evaluation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// `false` once the recent peak exceeds the maximum temperature. The
    /// caller should hand fan control back to the firmware.
    pub safe: bool,
    /// Desired fan speed percentage.
    pub speed: f32,
}

#[derive(Debug)]
pub struct Controller<C = SystemClock> {
    idle: FanCurve,
    sustained: FanCurve,
    overheat_threshold: u8,
    max_temperature: u8,
    max_overheat_allowance: Duration,
    history: TemperatureHistory,
    mode: Mode,
    clock: C,
}

impl Controller<SystemClock> {
    /// Create a controller driven by the system clock.
    ///
    /// `overheat_threshold` defaults to the idle curve's hottest point.
    /// `max_temperature` is raised to the overheat threshold if lower.
    pub fn new(
        idle: FanCurve,
        sustained: FanCurve,
        overheat_threshold: Option<u8>,
        max_temperature: u8,
        max_overheat_allowance: Duration,
    ) -> Self {
        Self::with_clock(
            SystemClock,
            idle,
            sustained,
            overheat_threshold,
            max_temperature,
            max_overheat_allowance,
        )
    }

    /// Curves in `Settings` were validated when it was resolved, so this
    /// cannot fail.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.idle_curve.clone(),
            settings.sustained_curve.clone(),
            Some(settings.overheat_temperature),
            settings.max_temperature,
            settings.overheat_allowance,
        )
    }
}

impl<C: Clock> Controller<C> {
    pub fn with_clock(
        clock: C,
        idle: FanCurve,
        sustained: FanCurve,
        overheat_threshold: Option<u8>,
        max_temperature: u8,
        max_overheat_allowance: Duration,
    ) -> Self {
        let overheat_threshold = overheat_threshold.unwrap_or_else(|| idle.max_temperature());
        let max_temperature = max_temperature.max(overheat_threshold);
        let retention = max_overheat_allowance.max(PEAK_WINDOW);

        Self {
            idle,
            sustained,
            overheat_threshold,
            max_temperature,
            max_overheat_allowance,
            history: TemperatureHistory::new(retention),
            // Assume the worst until the history says otherwise.
            mode: Mode::SustainedLoad,
            clock,
        }
    }

    pub fn current_mode(&self) -> Mode {
        self.mode
    }

    pub fn overheat_threshold(&self) -> u8 {
        self.overheat_threshold
    }

    pub fn max_temperature(&self) -> u8 {
        self.max_temperature
    }

    pub fn max_overheat_allowance(&self) -> Duration {
        self.max_overheat_allowance
    }

    /// Whether any reading has been pushed yet.
    pub fn has_readings(&self) -> bool {
        self.history.latest().is_some()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Record a temperature reading. Readings must arrive in time order.
    pub fn push_reading(&mut self, time: Instant, temp: u8) {
        log::debug!("Measuring {temp}°C");
        self.history.push(time, temp);
    }

    /// Update the mode from recent history and compute the fan speed.
    pub fn evaluate(&mut self) -> Evaluation {
        let now = self.clock.now();
        let temp = self.history.recent_maximum(now, PEAK_WINDOW);

        let next = match self.mode {
            Mode::Idling => {
                let allowance = self.overheat_allowance(temp);
                let fraction = self
                    .history
                    .recent_fraction_over(now, allowance, self.overheat_threshold);
                if fraction > ESCALATE_FRACTION {
                    Mode::SustainedLoad
                } else {
                    Mode::Idling
                }
            }
            Mode::SustainedLoad => {
                let fraction = self.history.recent_fraction_over(
                    now,
                    self.max_overheat_allowance,
                    self.overheat_threshold,
                );
                if fraction < DEESCALATE_FRACTION {
                    Mode::Idling
                } else {
                    Mode::SustainedLoad
                }
            }
        };

        if next != self.mode {
            log::info!("Switching fan curve: {} -> {next} (peak {temp}°C)", self.mode);
            self.mode = next;
        }

        let speed = match self.mode {
            Mode::Idling => self.idle.evaluate(temp),
            Mode::SustainedLoad => self.sustained.evaluate(temp),
        };

        Evaluation {
            safe: temp <= self.max_temperature,
            speed,
        }
    }

    /// How long the machine may stay over the overheat threshold at `temp`
    /// before escalating. Saturates instead of overflowing.
    fn overheat_allowance(&self, temp: u8) -> Duration {
        let secs = self.max_overheat_allowance.as_secs_f64() * f64::from(self.overheat_alpha(temp));
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// 1 at or below the overheat threshold, falling to 0 at the maximum.
    fn overheat_alpha(&self, temp: u8) -> f32 {
        let headroom = f32::from(self.max_temperature) - f32::from(temp);
        let band = f32::from(self.max_temperature) - f32::from(self.overheat_threshold);
        clamp(headroom / band, 0.0, 1.0)
    }
}
