//! Cyclic bandwidth set-point patterns and the slope gate.
//!
//! A pattern is a list of bandwidth set-points in Mbps spread evenly
//! over one cycle. `slice_index` maps elapsed time into the pattern with
//! wrap-around, so a 24-slice pattern over a 24 h cycle plays one value
//! per hour and repeats.

use rand::Rng;
use std::time::Duration;
use thiserror::Error;

/// Default 24-slice diurnal pattern (Mbps): low overnight, ramping
/// through the morning, peaking in the evening.
pub const DEFAULT_DIURNAL_PATTERN: [f64; 24] = [
    11.0, 8.1, 5.6, 3.6, 2.7, 1.9, // 00:00-06:00
    3.0, 5.0, 7.1, 11.1, 11.2, 11.9, // 06:00-12:00
    12.3, 13.0, 13.1, 12.9, 12.7, 12.4, // 12:00-18:00
    12.2, 12.0, 13.0, 14.0, 15.0, 14.0, // 18:00-24:00
];

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("traffic pattern is empty")]
    Empty,

    #[error("traffic pattern cycle must be positive")]
    ZeroCycle,

    #[error("set-point {index} is {value}, expected a finite non-negative number")]
    InvalidSetpoint { index: usize, value: f64 },

    #[error("invalid pattern JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("pattern JSON must be an array of numbers")]
    NotAnArray,
}

/// A cyclic bandwidth pattern: one set-point per equal-length slice.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficPattern {
    setpoints: Vec<f64>,
    cycle: Duration,
}

impl TrafficPattern {
    /// Build a pattern, validating every set-point up front.
    pub fn new(setpoints: Vec<f64>, cycle: Duration) -> Result<Self, PatternError> {
        if setpoints.is_empty() {
            return Err(PatternError::Empty);
        }
        if cycle.is_zero() {
            return Err(PatternError::ZeroCycle);
        }
        for (index, &value) in setpoints.iter().enumerate() {
            if !value.is_finite() || value < 0.0 {
                return Err(PatternError::InvalidSetpoint { index, value });
            }
        }
        Ok(Self { setpoints, cycle })
    }

    /// The default diurnal pattern over the given cycle.
    pub fn diurnal(cycle: Duration) -> Result<Self, PatternError> {
        Self::new(DEFAULT_DIURNAL_PATTERN.to_vec(), cycle)
    }

    /// Parse a JSON numeric array, e.g. `"[11.0, 8.1, 5.6]"`.
    pub fn from_json(raw: &str, cycle: Duration) -> Result<Self, PatternError> {
        let values: serde_json::Value = serde_json::from_str(raw)?;
        let array = values.as_array().ok_or(PatternError::NotAnArray)?;
        let setpoints = array
            .iter()
            .map(|v| v.as_f64().ok_or(PatternError::NotAnArray))
            .collect::<Result<Vec<f64>, _>>()?;
        Self::new(setpoints, cycle)
    }

    /// Multiply every set-point by `factor`.
    pub fn scale(mut self, factor: f64) -> Self {
        for value in &mut self.setpoints {
            *value *= factor;
        }
        self
    }

    pub fn len(&self) -> usize {
        self.setpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        false // new() rejects empty patterns
    }

    pub fn cycle(&self) -> Duration {
        self.cycle
    }

    /// Duration of one slice.
    pub fn slice_duration(&self) -> Duration {
        self.cycle / self.setpoints.len() as u32
    }

    /// Slice active after `elapsed`, wrapping at the cycle boundary.
    pub fn slice_index(&self, elapsed: Duration) -> usize {
        let slice_secs = self.slice_duration().as_secs_f64();
        (elapsed.as_secs_f64() / slice_secs) as usize % self.setpoints.len()
    }

    /// Set-point of one slice in Mbps.
    pub fn setpoint(&self, slice: usize) -> f64 {
        self.setpoints[slice % self.setpoints.len()]
    }

    /// Difference between a slice's set-point and its predecessor's,
    /// wrapping so slice 0 compares against the last slice.
    pub fn slope(&self, slice: usize) -> f64 {
        let len = self.setpoints.len();
        let slice = slice % len;
        let prev = (slice + len - 1) % len;
        self.setpoints[slice] - self.setpoints[prev]
    }
}

/// Gates stress starts on the traffic trend.
///
/// Open only while bandwidth is rising; a flat or falling slice closes
/// the gate. A closing gate blocks new starts but never cancels a
/// stress already running.
#[derive(Debug, Clone)]
pub struct SlopeGate {
    pattern: TrafficPattern,
}

impl SlopeGate {
    pub fn new(pattern: TrafficPattern) -> Self {
        Self { pattern }
    }

    /// Whether the slice active after `elapsed` has a rising set-point.
    pub fn is_open(&self, elapsed: Duration) -> bool {
        self.is_open_at(self.pattern.slice_index(elapsed))
    }

    /// Gate state for an explicit slice index.
    pub fn is_open_at(&self, slice: usize) -> bool {
        self.pattern.slope(slice) > 0.0
    }
}

/// Split an aggregate set-point across `k` entities.
///
/// Draws `k - 1` uniform cut points on `[0, total]` and uses the sorted
/// gaps as shares (a uniform random partition of the total). The last
/// share is recomputed as the remainder so the sum is exact.
pub fn split_bandwidth<R: Rng>(total: f64, k: usize, rng: &mut R) -> Vec<f64> {
    if k == 0 {
        return Vec::new();
    }
    if k == 1 {
        return vec![total];
    }

    let mut cuts: Vec<f64> = (0..k - 1).map(|_| rng.gen_range(0.0..=total)).collect();
    cuts.sort_by(|a, b| a.partial_cmp(b).expect("cut points are finite"));

    let mut shares = Vec::with_capacity(k);
    let mut prev = 0.0;
    for cut in &cuts {
        shares.push(cut - prev);
        prev = *cut;
    }
    // Remainder, not total - prev accumulated error.
    shares.push(total - shares.iter().sum::<f64>());
    shares
}
