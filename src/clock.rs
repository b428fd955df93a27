//! Timer abstraction used by the scheduler to arm the next tick.
//!
//! Production code uses [`TokioClock`]. Tests either run under tokio's paused
//! clock or inject their own [`Clock`] to observe every armed interval.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};

/// Source of the delay between ticks.
pub trait Clock: Send + Sync + 'static {
    /// Resolve after `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// [`Clock`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// Wraps another clock and records every requested delay, in order.
///
/// Handy for asserting the exact interval sequence an instance armed.
#[derive(Clone, Default)]
pub struct RecordingClock<C = TokioClock> {
    inner: C,
    armed: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingClock<TokioClock> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Clock> RecordingClock<C> {
    pub fn wrap(inner: C) -> Self {
        Self {
            inner,
            armed: Arc::default(),
        }
    }

    /// Every delay requested so far.
    pub fn armed(&self) -> Vec<Duration> {
        self.armed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl<C: Clock> Clock for RecordingClock<C> {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.armed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(duration);
        self.inner.sleep(duration)
    }
}
