//! # Stage: Request Lifecycle Guard
//!
//! ## Responsibility
//! Runs the request operation for exactly one tick, tagged with the owning
//! instance's generation, and reports the outcome only if that generation is
//! still current when the operation settles.
//!
//! ## Guarantees
//! - Single-flight: [`RequestGuard::issue`] refuses to start while a previous
//!   issue on the same guard has not settled.
//! - Staleness: an outcome whose generation was invalidated while in flight
//!   comes back as [`Outcome::Stale`] and carries no value.
//! - Atomic commit: [`RequestGuard::commit`], [`RequestGuard::invalidate`] and
//!   [`RequestGuard::invalidate_if`] serialize on one lock, so once `invalidate` returns no commit for an older
//!   generation can run.
//!
//! ## NOT Responsible For
//! - Retries or backoff (the scheduler decides when the next tick happens)
//! - Aborting the underlying operation (cancellation is advisory)

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{BoxError, PollError, Result};

/// Settled result of one issued request.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Failure(BoxError),
    /// The generation moved on while the request was outstanding.
    Stale,
}

impl<T> Outcome<T> {
    pub fn is_stale(&self) -> bool {
        matches!(self, Outcome::Stale)
    }
}

/// Generation counter plus single-flight flag for one polling instance.
#[derive(Debug, Default)]
pub struct RequestGuard {
    generation: AtomicU64,
    in_flight: AtomicBool,
    commit: Mutex<()>,
}

/// Clears the in-flight flag when the issue settles or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RequestGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Move to a new generation and return it. Outstanding requests from the
    /// previous generation will settle as [`Outcome::Stale`].
    pub fn invalidate(&self) -> u64 {
        let _commit = self.commit.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Run `f` under the commit lock and move to a new generation if it
    /// returns `true`. Returns the new generation, if any.
    ///
    /// No commit can observe the effects of `f` before the generation moves.
    pub fn invalidate_if(&self, f: impl FnOnce() -> bool) -> Option<u64> {
        let _commit = self.commit.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f().then(|| self.generation.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Invoke `op` once on behalf of `generation`.
    ///
    /// # Errors
    /// [`PollError::Busy`] if a previous issue has not settled yet. `op` is
    /// not invoked in that case.
    pub async fn issue<T, F, Fut>(&self, generation: u64, op: F) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PollError::Busy { generation });
        }
        let token = InFlight(&self.in_flight);
        let settled = op().await;
        drop(token);

        if !self.is_current(generation) {
            return Ok(Outcome::Stale);
        }
        Ok(match settled {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::Failure(err),
        })
    }

    /// Run `f` only if `generation` is still current, holding the commit lock
    /// so an [`invalidate`](Self::invalidate) cannot interleave.
    pub fn commit<R>(&self, generation: u64, f: impl FnOnce() -> R) -> Option<R> {
        let _commit = self.commit.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.is_current(generation) {
            Some(f())
        } else {
            None
        }
    }
}
