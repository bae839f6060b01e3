// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The poll loop: read a temperature, evaluate the controller, command the
//! fans. Failures are logged and counted; after too many in a row, or
//! when the controller reports an unsafe temperature, fan control is
//! handed back to the BMC. It is also handed back whenever the loop exits.

use crate::clock::{Clock, SystemClock};
use crate::controller::Controller;
use crate::error::Result;
use crate::ipmi::{FanActuator, TemperatureSensor};
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};

/// Consecutive failed cycles tolerated before releasing manual control.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 2;

/// What a successful cycle did to the fans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Fans set to this percentage.
    Applied(u8),
    /// Control handed back to the BMC because the temperature was unsafe.
    Released,
}

pub struct FanDaemon<S, A, C = SystemClock> {
    controller: Controller<C>,
    sensor: S,
    actuator: A,
    consecutive_failures: u32,
}

impl<S, A, C> FanDaemon<S, A, C>
where
    S: TemperatureSensor,
    A: FanActuator,
    C: Clock,
{
    pub fn new(controller: Controller<C>, sensor: S, actuator: A) -> Self {
        Self {
            controller,
            sensor,
            actuator,
            consecutive_failures: 0,
        }
    }

    pub fn controller(&self) -> &Controller<C> {
        &self.controller
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// One read → evaluate → actuate pass. Errors are returned untouched.
    pub async fn cycle(&mut self) -> Result<CycleOutcome> {
        let temp = self.sensor.read_temperature().await?;
        let now = self.controller.clock().now();
        self.controller.push_reading(now, temp);

        let eval = self.controller.evaluate();
        if eval.safe {
            let percent = to_percent(eval.speed);
            log::debug!(
                "{temp}°C, {} curve -> {percent}%",
                self.controller.current_mode()
            );
            self.actuator.set_fan_speed(percent).await?;
            Ok(CycleOutcome::Applied(percent))
        } else {
            log::warn!(
                "Recent peak is above the {}°C maximum, handing fan control to the BMC",
                self.controller.max_temperature()
            );
            self.actuator.release_manual_control().await?;
            Ok(CycleOutcome::Released)
        }
    }

    /// Run one cycle, absorbing and counting failures.
    pub async fn tick(&mut self) -> Option<CycleOutcome> {
        match self.cycle().await {
            Ok(outcome) => {
                self.consecutive_failures = 0;
                Some(outcome)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                log::error!(
                    "Fan control cycle failed ({} in a row): {e}",
                    self.consecutive_failures
                );

                if self.consecutive_failures > MAX_CONSECUTIVE_FAILURES {
                    log::warn!("Too many consecutive failures, releasing manual fan control");
                    if let Err(e) = self.actuator.release_manual_control().await {
                        log::error!("Failed to release manual fan control: {e}");
                    }
                }
                None
            }
        }
    }

    /// Tick every `interval` until `shutdown` resolves, then release manual
    /// control. `shutdown` is polled before every tick, so it is armed
    /// before the first cycle touches the fans.
    pub async fn run(&mut self, interval: Duration, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    log::info!("Fan control loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.actuator.release_manual_control().await
    }
}

/// Round a curve speed to a whole percentage in `0..=100`.
pub fn to_percent(speed: f32) -> u8 {
    // NaN casts to 0.
    speed.round().clamp(0.0, 100.0) as u8
}
