//! # Polling settings
//!
//! ## Responsibility
//! The plain-data half of a polling configuration: interval bounds, activity
//! thresholds, the shrink/grow step policy and the result stream capacity.
//! Loadable from TOML; durations are written in milliseconds.
//!
//! ```toml
//! interval_start_ms = 2000
//! interval_min_ms = 1000
//! interval_max_ms = 10000
//! activity_threshold = 5.0
//! quiet_threshold = 0.0
//!
//! [step]
//! kind = "factor"
//! factor = 2.0
//! ```
//!
//! ## Guarantees
//! - [`PollSettings::validate`] rejects every combination that could let the
//!   adaptive interval leave `[interval_min, interval_max]` or fail to converge.
//! - [`StepPolicy::shrink`] / [`StepPolicy::grow`] never panic, for any input.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PollError, Result};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_INTERVAL_START_MS: u64 = 5_000;
pub const DEFAULT_INTERVAL_MIN_MS: u64 = 1_000;
pub const DEFAULT_INTERVAL_MAX_MS: u64 = 30_000;
pub const DEFAULT_ACTIVITY_THRESHOLD: f64 = 5.0;
pub const DEFAULT_QUIET_THRESHOLD: f64 = 0.0;
pub const DEFAULT_STEP_FACTOR: f64 = 2.0;
/// Number of unread results a subscriber may fall behind before skipping.
pub const DEFAULT_STREAM_CAPACITY: usize = 64;
/// Smallest move a factor step makes, so factors close to 1.0 still converge.
pub const MIN_STEP: Duration = Duration::from_millis(1);

// ---------------------------------------------------------------------------
// StepPolicy
// ---------------------------------------------------------------------------

/// How the interval moves after an active or quiet tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPolicy {
    /// Divide on activity, multiply when quiet.
    Factor { factor: f64 },
    /// Subtract on activity, add when quiet.
    Fixed { step_ms: u64 },
}

impl Default for StepPolicy {
    fn default() -> Self {
        StepPolicy::Factor {
            factor: DEFAULT_STEP_FACTOR,
        }
    }
}

impl StepPolicy {
    /// Next shorter interval. Unclamped; callers apply the lower bound.
    ///
    /// Moves by at least [`MIN_STEP`] unless already at zero.
    pub fn shrink(&self, current: Duration) -> Duration {
        match *self {
            StepPolicy::Factor { factor } => {
                scale(current, 1.0 / factor).min(current.saturating_sub(MIN_STEP))
            }
            StepPolicy::Fixed { step_ms } => {
                current.saturating_sub(Duration::from_millis(step_ms))
            }
        }
    }

    /// Next longer interval. Unclamped; callers apply the upper bound.
    ///
    /// Moves by at least [`MIN_STEP`] unless already at `Duration::MAX`.
    pub fn grow(&self, current: Duration) -> Duration {
        match *self {
            StepPolicy::Factor { factor } => {
                scale(current, factor).max(current.saturating_add(MIN_STEP))
            }
            StepPolicy::Fixed { step_ms } => {
                current.saturating_add(Duration::from_millis(step_ms))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            StepPolicy::Factor { factor } if !factor.is_finite() || factor <= 1.0 => {
                Err(PollError::InvalidStep(format!(
                    "factor must be finite and greater than 1.0, got {factor}"
                )))
            }
            StepPolicy::Fixed { step_ms: 0 } => {
                Err(PollError::InvalidStep("step_ms must be greater than zero".into()))
            }
            _ => Ok(()),
        }
    }
}

fn scale(d: Duration, by: f64) -> Duration {
    Duration::try_from_secs_f64(d.as_secs_f64() * by).unwrap_or(Duration::MAX)
}

// ---------------------------------------------------------------------------
// PollSettings
// ---------------------------------------------------------------------------

/// Interval bounds and thresholds for one polling stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_start_ms: u64,
    pub interval_min_ms: u64,
    pub interval_max_ms: u64,
    /// Scores at or above this speed polling up.
    pub activity_threshold: f64,
    /// Scores at or below this slow polling down.
    pub quiet_threshold: f64,
    pub step: StepPolicy,
    pub stream_capacity: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_start_ms: DEFAULT_INTERVAL_START_MS,
            interval_min_ms: DEFAULT_INTERVAL_MIN_MS,
            interval_max_ms: DEFAULT_INTERVAL_MAX_MS,
            activity_threshold: DEFAULT_ACTIVITY_THRESHOLD,
            quiet_threshold: DEFAULT_QUIET_THRESHOLD,
            step: StepPolicy::default(),
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }
}

impl PollSettings {
    /// Parse settings from a TOML document. Absent keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PollError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn interval_start(&self) -> Duration {
        Duration::from_millis(self.interval_start_ms)
    }

    pub fn interval_min(&self) -> Duration {
        Duration::from_millis(self.interval_min_ms)
    }

    pub fn interval_max(&self) -> Duration {
        Duration::from_millis(self.interval_max_ms)
    }

    /// Check every invariant the scheduler relies on.
    ///
    /// # Errors
    /// Returns the first violated rule as a configuration [`PollError`].
    pub fn validate(&self) -> Result<()> {
        let (start, min, max) = (self.interval_start(), self.interval_min(), self.interval_max());
        if min.is_zero() {
            return Err(PollError::ZeroInterval);
        }
        if min > max {
            return Err(PollError::InvertedBounds { min, max });
        }
        if start < min || start > max {
            return Err(PollError::StartOutOfBounds { start, min, max });
        }
        for (name, value) in [
            ("activity_threshold", self.activity_threshold),
            ("quiet_threshold", self.quiet_threshold),
        ] {
            if !value.is_finite() {
                return Err(PollError::NonFiniteThreshold { name, value });
            }
        }
        if self.quiet_threshold > self.activity_threshold {
            return Err(PollError::InvertedThresholds {
                quiet: self.quiet_threshold,
                activity: self.activity_threshold,
            });
        }
        self.step.validate()?;
        if self.stream_capacity == 0 {
            return Err(PollError::ZeroCapacity);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
