// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Rolling temperature history.
//!
//! Samples are kept oldest-first in a ring buffer and evicted once they
//! fall outside the retention window. The most recent sample is also kept
//! separately so queries always have something to answer with, even after
//! a long gap has emptied the window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One temperature reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub time: Instant,
    /// Degrees Celsius
    pub temp: u8,
}

#[derive(Debug, Clone)]
pub struct TemperatureHistory {
    retention: Duration,
    samples: VecDeque<Sample>,
    /// Survives eviction; `None` until the first push.
    last: Option<Sample>,
}

impl TemperatureHistory {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            samples: VecDeque::new(),
            last: None,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Record a reading. Readings must arrive in non-decreasing time order.
    pub fn push(&mut self, time: Instant, temp: u8) {
        let sample = Sample { time, temp };
        self.samples.push_back(sample);
        self.last = Some(sample);
    }

    /// The most recent reading ever pushed, regardless of age.
    pub fn latest(&self) -> Option<Sample> {
        self.last
    }

    /// Number of samples currently retained.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop samples older than `now - retention`.
    pub fn evict(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.saturating_duration_since(front.time) <= self.retention {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// Highest temperature seen within `duration` of `now`.
    ///
    /// Falls back to the latest reading when the window holds nothing, and
    /// to 0 when nothing has ever been pushed.
    pub fn recent_maximum(&mut self, now: Instant, duration: Duration) -> u8 {
        self.recent(now, duration).max().unwrap_or(0)
    }

    /// Fraction (0..=1) of readings within `duration` of `now` that are
    /// strictly above `threshold`. Uses the same fallback as
    /// [`recent_maximum`](Self::recent_maximum).
    pub fn recent_fraction_over(&mut self, now: Instant, duration: Duration, threshold: u8) -> f32 {
        let (over, total) = self
            .recent(now, duration)
            .fold((0u32, 0u32), |(over, total), temp| {
                (over + u32::from(temp > threshold), total + 1)
            });
        over as f32 / total as f32
    }

    fn recent(&mut self, now: Instant, duration: Duration) -> impl Iterator<Item = u8> + '_ {
        self.evict(now);

        let mut window = self
            .samples
            .iter()
            .rev()
            .take_while(move |s| now.saturating_duration_since(s.time) <= duration)
            .map(|s| s.temp)
            .peekable();
        let fallback = match window.peek() {
            Some(_) => None,
            None => Some(self.last.map_or(0, |s| s.temp)),
        };
        window.chain(fallback)
    }
}
