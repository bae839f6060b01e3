// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan curve definitions and interpolation.
//!
//! A curve maps a CPU temperature to a fan speed percentage.
//! Points are linearly interpolated between defined thresholds; outside
//! the defined range the nearest endpoint's speed is held.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// A single point on a fan curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    /// Temperature in degrees Celsius
    pub temp: u8,
    /// Fan speed percentage. Not clamped here.
    pub speed: f32,
}

impl CurvePoint {
    pub fn new(temp: u8, speed: f32) -> Self {
        Self { temp, speed }
    }
}

impl From<(u8, f32)> for CurvePoint {
    fn from((temp, speed): (u8, f32)) -> Self {
        Self { temp, speed }
    }
}

impl FromStr for CurvePoint {
    type Err = Error;

    /// Parse a single `temp,speed` pair.
    fn from_str(s: &str) -> Result<Self> {
        let (temp, speed) = s
            .split_once(',')
            .ok_or_else(|| Error::InvalidCurve(format!("expected 'temp,speed', got '{s}'")))?;

        let temp = temp
            .trim()
            .parse::<u8>()
            .map_err(|e| Error::InvalidCurve(format!("bad temperature in '{s}': {e}")))?;
        let speed = speed
            .trim()
            .parse::<f32>()
            .map_err(|e| Error::InvalidCurve(format!("bad speed in '{s}': {e}")))?;

        Ok(Self { temp, speed })
    }
}

/// An immutable fan curve with points in strictly ascending temperature order.
#[derive(Debug, Clone, PartialEq)]
pub struct FanCurve {
    points: Vec<CurvePoint>,
}

impl FanCurve {
    /// Create a new fan curve.
    ///
    /// Fails if `points` is empty or the temperatures are not strictly
    /// ascending. Points are never reordered.
    pub fn new(points: impl IntoIterator<Item = CurvePoint>) -> Result<Self> {
        let points: Vec<CurvePoint> = points.into_iter().collect();

        if points.is_empty() {
            return Err(Error::InvalidCurve(
                "curve must contain at least one point".to_string(),
            ));
        }
        for (i, pair) in points.windows(2).enumerate() {
            if pair[0].temp >= pair[1].temp {
                return Err(Error::InvalidCurve(format!(
                    "points must have strictly increasing temperatures (point {})",
                    i + 1
                )));
            }
        }

        Ok(Self { points })
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Temperature of the hottest control point.
    pub fn max_temperature(&self) -> u8 {
        // Construction guarantees at least one point, sorted ascending.
        self.points.last().map_or(0, |p| p.temp)
    }

    /// Interpolate the fan speed for a given temperature.
    ///
    /// - Below the lowest point: returns the lowest point's speed
    /// - Above the highest point: returns the highest point's speed
    /// - Between two points: linear interpolation
    pub fn evaluate(&self, temp: u8) -> f32 {
        for pair in self.points.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            if end.temp < temp {
                continue;
            }

            let span = f32::from(end.temp) - f32::from(start.temp);
            let remaining = (f32::from(end.temp) - f32::from(temp)) / span;
            let progress = 1.0 - clamp(remaining, 0.0, 1.0);
            return lerp(start.speed, end.speed, progress);
        }

        self.points.last().map_or(0.0, |p| p.speed)
    }
}

impl FromStr for FanCurve {
    type Err = Error;

    /// Parse `temp,speed` pairs separated by `;`, e.g. `30,5;40,10;50,20`.
    fn from_str(s: &str) -> Result<Self> {
        let points = s
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(CurvePoint::from_str)
            .collect::<Result<Vec<_>>>()?;
        Self::new(points)
    }
}

impl fmt::Display for FanCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.points.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{},{}", p.temp, p.speed)?;
        }
        Ok(())
    }
}

/// Clamp `value` into `[min, max]`.
///
/// Negative infinity maps to `min`; NaN and positive infinity map to `max`.
pub fn clamp(value: f32, min: f32, max: f32) -> f32 {
    if value == f32::NEG_INFINITY {
        return min;
    }
    if value.is_nan() || value == f32::INFINITY {
        return max;
    }
    value.min(max).max(min)
}

/// Linear blend from `a` (alpha 0) to `b` (alpha 1).
pub fn lerp(a: f32, b: f32, alpha: f32) -> f32 {
    a * (1.0 - alpha) + b * alpha
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve(points: &[(u8, f32)]) -> FanCurve {
        FanCurve::new(points.iter().copied().map(CurvePoint::from)).unwrap()
    }

    #[test]
    fn test_evaluate_reference_points() {
        let c = curve(&[(30, 5.0), (40, 10.0), (50, 20.0)]);
        for (temp, speed) in [(20, 5.0), (30, 5.0), (40, 10.0), (45, 15.0), (50, 20.0), (60, 20.0)] {
            assert_eq!(c.evaluate(temp), speed, "temp {temp}");
        }
    }

    #[test]
    fn test_evaluate_single_point() {
        let c = curve(&[(40, 33.0)]);
        assert_eq!(c.evaluate(0), 33.0);
        assert_eq!(c.evaluate(40), 33.0);
        assert_eq!(c.evaluate(255), 33.0);
    }

    #[test]
    fn test_evaluate_hits_every_control_point() {
        let c = curve(&[(0, 0.0), (25, 12.5), (60, 40.0), (80, 100.0)]);
        for p in c.points() {
            assert_eq!(c.evaluate(p.temp), p.speed);
        }
    }

    #[test]
    fn test_evaluate_monotonic_for_monotonic_speeds() {
        let c = curve(&[(30, 5.0), (50, 20.0), (70, 100.0)]);
        let mut previous = c.evaluate(0);
        for temp in 1..=u8::MAX {
            let speed = c.evaluate(temp);
            assert!(speed >= previous, "dropped at {temp}: {speed} < {previous}");
            previous = speed;
        }
    }

    #[test]
    fn test_evaluate_allows_descending_speeds() {
        let c = curve(&[(20, 80.0), (40, 40.0)]);
        assert_eq!(c.evaluate(30), 60.0);
    }

    #[test]
    fn test_rejects_empty_curve() {
        assert!(matches!(FanCurve::new(Vec::new()), Err(Error::InvalidCurve(_))));
    }

    #[test]
    fn test_rejects_unordered_points() {
        let points = [CurvePoint::new(40, 10.0), CurvePoint::new(30, 5.0)];
        assert!(matches!(FanCurve::new(points), Err(Error::InvalidCurve(_))));

        let duplicate = [CurvePoint::new(30, 5.0), CurvePoint::new(30, 10.0)];
        assert!(matches!(FanCurve::new(duplicate), Err(Error::InvalidCurve(_))));
    }

    #[test]
    fn test_parse_curve_text() {
        let c: FanCurve = "30,5; 40,10 ;50,20.5;".parse().unwrap();
        assert_eq!(c, curve(&[(30, 5.0), (40, 10.0), (50, 20.5)]));
        assert_eq!(c.max_temperature(), 50);
        assert_eq!(c.to_string(), "30,5;40,10;50,20.5");
    }

    #[test]
    fn test_parse_curve_text_errors() {
        assert!("".parse::<FanCurve>().is_err());
        assert!("30".parse::<FanCurve>().is_err());
        assert!("300,5".parse::<FanCurve>().is_err());
        assert!("30,fast".parse::<FanCurve>().is_err());
        assert!("50,5;40,10".parse::<FanCurve>().is_err());
    }

    #[test]
    fn test_clamp_degenerate_values() {
        assert_eq!(clamp(f32::NEG_INFINITY, 0.0, 1.0), 0.0);
        assert_eq!(clamp(f32::INFINITY, 0.0, 1.0), 1.0);
        assert_eq!(clamp(f32::NAN, 0.0, 1.0), 1.0);
        assert_eq!(clamp(-3.0, 0.0, 1.0), 0.0);
        assert_eq!(clamp(0.25, 0.0, 1.0), 0.25);
    }
}
