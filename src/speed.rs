use crate::history::{Sample, TimedHistory};
use serde::Serialize;
use std::fmt;

const DT_EPSILON: f64 = 1e-6;

pub fn mps_to_kmh(v: f64) -> f64 {
    v * 3.6
}

/// Unit a raw speed comes out in, decided by which history was measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpeedUnit {
    #[serde(rename = "m/s")]
    MetersPerSecond,
    #[serde(rename = "px/s")]
    PixelsPerSecond,
}

impl SpeedUnit {
    pub fn is_world_space(&self) -> bool {
        matches!(self, SpeedUnit::MetersPerSecond)
    }
}

/// A speed with its unit attached
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeedEstimate {
    pub value: f64,
    pub unit: SpeedUnit,
}

impl SpeedEstimate {
    pub fn zero(unit: SpeedUnit) -> Self {
        Self { value: 0.0, unit }
    }

    /// Value and unit label for display: km/h for world space, px/s otherwise
    pub fn display_value(&self) -> (f64, &'static str) {
        match self.unit {
            SpeedUnit::MetersPerSecond => (mps_to_kmh(self.value), "km/h"),
            SpeedUnit::PixelsPerSecond => (self.value, "px/s"),
        }
    }
}

impl fmt::Display for SpeedEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (value, unit) = self.display_value();
        write!(f, "{value:.1} {unit}")
    }
}

/// Speed over the newest stretch of a history, in history units per second.
///
/// Scans back from the newest sample and stops at the first one more than
/// `window_seconds` older; the last sample inside the window is the
/// reference. Spans shorter than `min_elapsed_seconds` give 0.
pub fn compute<'a, I>(samples: I, window_seconds: f64, min_elapsed_seconds: f64) -> f64
where
    I: DoubleEndedIterator<Item = &'a Sample> + ExactSizeIterator,
{
    if samples.len() < 2 {
        return 0.0;
    }
    let mut newest_first = samples.rev();
    let Some(now) = newest_first.next().copied() else {
        return 0.0;
    };

    let mut reference = now;
    for sample in newest_first {
        if now.t - sample.t > window_seconds {
            break;
        }
        reference = *sample;
    }

    let dt = (now.t - reference.t).max(DT_EPSILON);
    if dt < min_elapsed_seconds {
        return 0.0;
    }
    now.point.distance(&reference.point) / dt
}

/// Time-window settings applied to every track of a stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedEstimator {
    pub window_seconds: f64,
    pub min_elapsed_seconds: f64,
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self {
            window_seconds: 1.0,
            min_elapsed_seconds: 0.2,
        }
    }
}

impl SpeedEstimator {
    pub fn new(window_seconds: f64, min_elapsed_seconds: f64) -> Self {
        Self {
            window_seconds,
            min_elapsed_seconds,
        }
    }

    pub fn estimate(&self, history: &TimedHistory, unit: SpeedUnit) -> SpeedEstimate {
        SpeedEstimate {
            value: compute(history.iter(), self.window_seconds, self.min_elapsed_seconds),
            unit,
        }
    }
}
