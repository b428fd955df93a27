//! Crate-level error type.
//!
//! Configuration problems are returned from setup calls (`validate`,
//! `create_polling`, `from_file`). Per-tick fetch failures are wrapped in
//! [`PollError::Fetch`] and published on the failure side channel; they never
//! propagate out of the polling loop.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by a caller-supplied request operation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PollError>;

#[derive(Debug, Error)]
pub enum PollError {
    /// `interval_min` is larger than `interval_max`.
    #[error("interval_min ({min:?}) exceeds interval_max ({max:?})")]
    InvertedBounds { min: Duration, max: Duration },

    /// `interval_start` lies outside `[interval_min, interval_max]`.
    #[error("interval_start ({start:?}) is outside [{min:?}, {max:?}]")]
    StartOutOfBounds {
        start: Duration,
        min: Duration,
        max: Duration,
    },

    #[error("interval_min must be greater than zero")]
    ZeroInterval,

    #[error("{name} must be a finite number, got {value}")]
    NonFiniteThreshold { name: &'static str, value: f64 },

    /// Quiet band sits above the activity band, so a score could mean both.
    #[error("quiet_threshold ({quiet}) exceeds activity_threshold ({activity})")]
    InvertedThresholds { quiet: f64, activity: f64 },

    #[error("invalid step policy: {0}")]
    InvalidStep(String),

    #[error("stream_capacity must be at least 1")]
    ZeroCapacity,

    #[error("a change detector is required")]
    MissingDetector,

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The request operation failed for one tick.
    #[error("request for tick {tick} failed: {source}")]
    Fetch {
        tick: u64,
        #[source]
        source: BoxError,
    },

    /// A second request was issued while one was still outstanding.
    #[error("a request is already in flight (generation {generation})")]
    Busy { generation: u64 },

    #[error("polling instance has been stopped")]
    Stopped,

    #[error("no tokio runtime is available to drive polling")]
    NoRuntime,
}

impl PollError {
    /// `true` for errors that can only come from an invalid configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PollError::InvertedBounds { .. }
                | PollError::StartOutOfBounds { .. }
                | PollError::ZeroInterval
                | PollError::NonFiniteThreshold { .. }
                | PollError::InvertedThresholds { .. }
                | PollError::InvalidStep(_)
                | PollError::ZeroCapacity
                | PollError::MissingDetector
                | PollError::ConfigIo { .. }
                | PollError::ConfigParse(_)
        )
    }
}
