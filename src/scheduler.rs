//! # Stage: Adaptive Interval Scheduler
//!
//! ## Responsibility
//! Drives one polling stream per [`PollingInstance`]: arms the timer, issues the
//! request through the [`RequestGuard`], scores the delta with the caller's
//! change detector, adapts the interval within its bounds and publishes each
//! successful result.
//!
//! ## Guarantees
//! - Single-flight: ticks are strictly sequential; the next timer is armed only
//!   after the current request settles.
//! - Bounded: the interval never leaves `[interval_min, interval_max]`.
//! - Stop is final: after [`PollingInstance::stop`] returns, no value or
//!   failure is published, even if a request was in flight.
//! - Failure isolation: a failed tick is reported on the failure channel, keeps
//!   the interval and last result untouched, and the loop carries on.
//!
//! ## NOT Responsible For
//! - Merging results into caller state (subscribers own that)
//! - Request timeouts (wrap them inside the request operation)
//! - Backoff on repeated errors (only activity moves the interval)

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::PollingConfig;
use crate::error::{PollError, Result};
use crate::guard::{Outcome, RequestGuard};
use crate::settings::PollSettings;

/// Consecutive fetch failures after which logging escalates from `warn` to `error`.
pub const ESCALATE_AFTER_FAILURES: u32 = 5;

/// Capacity of the per-instance failure channel.
const FAILURE_CHANNEL_CAP: usize = 16;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`PollingInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PollState {
    /// Created, no tick armed yet.
    Idle = 0,
    /// Timer armed, no request outstanding.
    Scheduled = 1,
    /// Request outstanding.
    InFlight = 2,
    /// Terminal.
    Stopped = 3,
}

impl PollState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PollState::Idle,
            1 => PollState::Scheduled,
            2 => PollState::InFlight,
            _ => PollState::Stopped,
        }
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PollState::Idle      => "idle",
            PollState::Scheduled => "scheduled",
            PollState::InFlight  => "in_flight",
            PollState::Stopped   => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Which band an activity score fell into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityBand {
    /// At or above `activity_threshold`: shrink.
    Active,
    /// At or below `quiet_threshold`: grow.
    Quiet,
    /// Between the thresholds (or NaN): hold.
    Steady,
}

/// Counters for one instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub ticks: u64,
    pub successes: u64,
    pub failures: u64,
    /// Responses dropped because the instance was stopped while they were in flight.
    pub stale_discards: u64,
    pub consecutive_failures: u32,
}

/// One failed tick, delivered on the failure side channel.
#[derive(Debug, Clone)]
pub struct TickFailure {
    pub generation: u64,
    pub tick: u64,
    /// Failures in a row, including this one.
    pub consecutive: u32,
    pub error: Arc<PollError>,
}

/// Compute the interval that follows a successful tick scored `score`.
///
/// The result always lies within the settings' bounds.
pub fn next_interval(
    settings: &PollSettings,
    current: Duration,
    score: f64,
) -> (Duration, ActivityBand) {
    let (min, max) = (settings.interval_min(), settings.interval_max());
    let (candidate, band) = if score >= settings.activity_threshold {
        (settings.step.shrink(current).max(min), ActivityBand::Active)
    } else if score <= settings.quiet_threshold {
        (settings.step.grow(current).min(max), ActivityBand::Quiet)
    } else {
        (current, ActivityBand::Steady)
    };
    (candidate.clamp(min, max), band)
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State mutated only under the guard's commit, read by accessors.
struct Published<T> {
    latest: Option<Arc<T>>,
    interval: Duration,
    stats: PollStats,
    results: Option<broadcast::Sender<Arc<T>>>,
    failures: Option<broadcast::Sender<TickFailure>>,
}

struct Shared<T> {
    guard: RequestGuard,
    state: AtomicU8,
    stop_signal: Notify,
    published: Mutex<Published<T>>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Published<T>> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> PollState {
        PollState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition to `next` unless already stopped.
    fn enter(&self, next: PollState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur != PollState::Stopped as u8).then_some(next as u8)
            })
            .is_ok()
    }

    fn publish_success(&self, value: Arc<T>, interval: Duration) {
        let mut p = self.lock();
        p.latest = Some(Arc::clone(&value));
        p.interval = interval;
        p.stats.successes += 1;
        p.stats.consecutive_failures = 0;
        if let Some(tx) = &p.results {
            // No subscribers is fine.
            let _ = tx.send(value);
        }
    }

    fn publish_failure(&self, generation: u64, tick: u64, error: PollError) -> u32 {
        let mut p = self.lock();
        p.stats.failures += 1;
        p.stats.consecutive_failures = p.stats.consecutive_failures.saturating_add(1);
        let consecutive = p.stats.consecutive_failures;
        if let Some(tx) = &p.failures {
            let _ = tx.send(TickFailure {
                generation,
                tick,
                consecutive,
                error: Arc::new(error),
            });
        }
        consecutive
    }
}

// ---------------------------------------------------------------------------
// PollingService
// ---------------------------------------------------------------------------

/// Factory for [`PollingInstance`]s sharing one [`Clock`].
///
/// Instances created by the same service are fully independent.
#[derive(Clone)]
pub struct PollingService {
    clock: Arc<dyn Clock>,
}

impl Default for PollingService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PollingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingService").finish_non_exhaustive()
    }
}

impl PollingService {
    pub fn new() -> Self {
        Self::with_clock(TokioClock)
    }

    /// Use `clock` to arm every tick of every instance this service creates.
    pub fn with_clock(clock: impl Clock) -> Self {
        Self {
            clock: Arc::new(clock),
        }
    }

    /// Validate `config` and return an [`Idle`](PollState::Idle) instance.
    ///
    /// # Errors
    /// Any configuration error from [`PollSettings::validate`].
    pub fn prepare<T>(&self, config: PollingConfig<T>) -> Result<PollingInstance<T>>
    where
        T: Send + Sync + 'static,
    {
        config.validate()?;
        let settings = config.settings();
        let (results, _) = broadcast::channel(settings.stream_capacity);
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAP);
        let shared = Arc::new(Shared {
            guard: RequestGuard::new(),
            state: AtomicU8::new(PollState::Idle as u8),
            stop_signal: Notify::new(),
            published: Mutex::new(Published {
                latest: None,
                interval: settings.interval_start(),
                stats: PollStats::default(),
                results: Some(results),
                failures: Some(failures),
            }),
        });
        Ok(PollingInstance {
            shared,
            config,
            clock: Arc::clone(&self.clock),
            task: Mutex::new(None),
        })
    }

    /// Validate `config`, create an instance and start it immediately.
    ///
    /// # Errors
    /// Configuration errors, or [`PollError::NoRuntime`] outside a tokio runtime.
    pub fn create_polling<T>(&self, config: PollingConfig<T>) -> Result<PollingInstance<T>>
    where
        T: Send + Sync + 'static,
    {
        let instance = self.prepare(config)?;
        instance.start()?;
        Ok(instance)
    }
}

// ---------------------------------------------------------------------------
// PollingInstance
// ---------------------------------------------------------------------------

/// Handle to one polling stream. Owned by exactly one caller.
///
/// Dropping the handle stops the stream.
pub struct PollingInstance<T> {
    shared: Arc<Shared<T>>,
    config: PollingConfig<T>,
    clock: Arc<dyn Clock>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> fmt::Debug for PollingInstance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingInstance")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("current_interval", &self.current_interval())
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> PollingInstance<T> {
    /// Arm the first tick. A no-op if already running.
    ///
    /// # Errors
    /// [`PollError::Stopped`] once stopped; [`PollError::NoRuntime`] when
    /// called outside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PollError::NoRuntime)?;
        match self.shared.state.compare_exchange(
            PollState::Idle as u8,
            PollState::Scheduled as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(cur) if cur == PollState::Stopped as u8 => return Err(PollError::Stopped),
            Err(_) => return Ok(()),
        }

        let ticker = Ticker {
            shared: Arc::clone(&self.shared),
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            generation: self.shared.guard.generation(),
        };
        let handle = runtime.spawn(ticker.run());
        *self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        Ok(())
    }
}

impl<T> PollingInstance<T> {
    /// Stop polling. Idempotent.
    ///
    /// Clears the armed timer and moves to a new generation so a request that
    /// is still outstanding is discarded when it settles. Result streams end
    /// once their buffered values are drained.
    pub fn stop(&self) {
        // State and generation move together under the commit lock.
        let mut prev = PollState::Stopped as u8;
        let Some(generation) = self.shared.guard.invalidate_if(|| {
            prev = self.shared.state.swap(PollState::Stopped as u8, Ordering::AcqRel);
            prev != PollState::Stopped as u8
        }) else {
            return;
        };
        {
            let mut p = self.shared.lock();
            p.results = None;
            p.failures = None;
        }
        self.shared.stop_signal.notify_one();
        info!(generation, from = %PollState::from_u8(prev), "polling stopped");
    }

    /// Wait for the polling task to exit.
    ///
    /// After [`stop`](Self::stop) this resolves once any in-flight request has
    /// settled and been discarded. Returns immediately if never started.
    pub async fn join(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "polling task ended abnormally");
            }
        }
    }

    /// Subscribe to published results.
    ///
    /// The stream first yields the most recent result (if any), then every
    /// later one in publish order.
    pub fn subscribe(&self) -> ResultStream<T> {
        let p = self.shared.lock();
        let rx = match &p.results {
            Some(tx) => tx.subscribe(),
            None => closed_receiver(),
        };
        ResultStream {
            primed: p.latest.clone(),
            rx,
        }
    }

    /// Subscribe to per-tick failures.
    pub fn failures(&self) -> broadcast::Receiver<TickFailure> {
        match &self.shared.lock().failures {
            Some(tx) => tx.subscribe(),
            None => closed_receiver(),
        }
    }

    pub fn state(&self) -> PollState {
        self.shared.state()
    }

    pub fn current_interval(&self) -> Duration {
        self.shared.lock().interval
    }

    pub fn generation(&self) -> u64 {
        self.shared.guard.generation()
    }

    pub fn last_result(&self) -> Option<Arc<T>> {
        self.shared.lock().latest.clone()
    }

    pub fn stats(&self) -> PollStats {
        self.shared.lock().stats
    }

    pub fn settings(&self) -> &PollSettings {
        self.config.settings()
    }
}

impl<T> Drop for PollingInstance<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn closed_receiver<V: Clone>() -> broadcast::Receiver<V> {
    let (_, rx) = broadcast::channel(1);
    rx
}

// ---------------------------------------------------------------------------
// ResultStream
// ---------------------------------------------------------------------------

/// Publish-latest subscription to an instance's results.
pub struct ResultStream<T> {
    primed: Option<Arc<T>>,
    rx: broadcast::Receiver<Arc<T>>,
}

impl<T> fmt::Debug for ResultStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("primed", &self.primed.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> ResultStream<T> {
    /// Next result, or `None` once the instance is stopped and drained.
    pub async fn next(&mut self) -> Option<Arc<T>> {
        if let Some(v) = self.primed.take() {
            return Some(v);
        }
        loop {
            match self.rx.recv().await {
                Ok(v) => return Some(v),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "result subscriber lagged, skipping oldest results");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next).
    pub fn try_next(&mut self) -> Option<Arc<T>> {
        if let Some(v) = self.primed.take() {
            return Some(v);
        }
        loop {
            match self.rx.try_recv() {
                Ok(v) => return Some(v),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "result subscriber lagged, skipping oldest results");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Arc<T>> + Send + Unpin {
        let live = BroadcastStream::new(self.rx).filter_map(|item| match item {
            Ok(v) => Some(v),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "result subscriber lagged, skipping oldest results");
                None
            }
        });
        tokio_stream::iter(self.primed).chain(live)
    }
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

struct Ticker<T> {
    shared: Arc<Shared<T>>,
    config: PollingConfig<T>,
    clock: Arc<dyn Clock>,
    generation: u64,
}

impl<T: Send + Sync + 'static> Ticker<T> {
    async fn run(self) {
        let Ticker {
            shared,
            config,
            clock,
            generation,
        } = self;
        info!(
            generation,
            interval_ms = ms(shared.lock().interval),
            "polling started"
        );

        let mut tick: u64 = 0;
        loop {
            let interval = shared.lock().interval;
            if !shared.enter(PollState::Scheduled) {
                break;
            }
            tokio::select! {
                biased;
                _ = shared.stop_signal.notified() => break,
                _ = clock.sleep(interval) => {}
            }
            if !shared.guard.is_current(generation) || !shared.enter(PollState::InFlight) {
                break;
            }

            tick += 1;
            shared.lock().stats.ticks += 1;
            debug!(generation, tick, interval_ms = ms(interval), "tick");

            let outcome = match shared.guard.issue(generation, || config.request()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, generation, tick, "request guard rejected tick");
                    continue;
                }
            };

            match outcome {
                Outcome::Stale => {
                    shared.lock().stats.stale_discards += 1;
                    debug!(generation, tick, "discarding stale response");
                    break;
                }
                Outcome::Success(value) => {
                    let previous = shared.lock().latest.clone();
                    let score = config.detect_changes(previous.as_deref(), &value);
                    let (next, band) = next_interval(config.settings(), interval, score);
                    let value = Arc::new(value);
                    let committed = shared
                        .guard
                        .commit(generation, || shared.publish_success(value, next));
                    if committed.is_none() {
                        shared.lock().stats.stale_discards += 1;
                        debug!(generation, tick, "discarding stale response");
                        break;
                    }
                    if next != interval {
                        debug!(
                            generation,
                            tick,
                            score,
                            band = ?band,
                            from_ms = ms(interval),
                            to_ms = ms(next),
                            "interval adjusted"
                        );
                    }
                }
                Outcome::Failure(source) => {
                    let err = PollError::Fetch { tick, source };
                    let message = err.to_string();
                    let Some(consecutive) = shared
                        .guard
                        .commit(generation, || shared.publish_failure(generation, tick, err))
                    else {
                        shared.lock().stats.stale_discards += 1;
                        debug!(generation, tick, "discarding stale failure");
                        break;
                    };
                    if consecutive >= ESCALATE_AFTER_FAILURES {
                        error!(
                            error = %message,
                            generation,
                            consecutive,
                            "poll failed repeatedly, will retry next tick"
                        );
                    } else {
                        warn!(error = %message, generation, "poll failed, will retry next tick");
                    }
                }
            }
        }
        debug!(generation, ticks = tick, "polling loop exited");
    }
}

fn ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RecordingClock;
    use crate::error::BoxError;
    use crate::settings::StepPolicy;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicU64;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn scenario_settings() -> PollSettings {
        PollSettings {
            interval_start_ms: 2_000,
            interval_min_ms: 1_000,
            interval_max_ms: 10_000,
            activity_threshold: 5.0,
            quiet_threshold: 0.0,
            step: StepPolicy::Factor { factor: 2.0 },
            stream_capacity: 16,
        }
    }

    /// Request that returns 1, 2, 3, ... after `latency`.
    fn counting_config(
        settings: PollSettings,
        latency: Duration,
        detect: impl Fn(Option<&u64>, &u64) -> f64 + Send + Sync + 'static,
    ) -> PollingConfig<u64> {
        let calls = Arc::new(AtomicU64::new(0));
        PollingConfig::new(
            settings,
            move || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    tokio::time::sleep(latency).await;
                    Ok::<u64, BoxError>(n)
                }
            },
            detect,
        )
    }

    // ===== next_interval =====

    #[test]
    fn active_score_shrinks() {
        let (next, band) = next_interval(&scenario_settings(), secs(2), 7.0);
        assert_eq!(next, secs(1));
        assert_eq!(band, ActivityBand::Active);
    }

    #[test]
    fn quiet_score_grows() {
        let (next, band) = next_interval(&scenario_settings(), secs(2), 0.0);
        assert_eq!(next, secs(4));
        assert_eq!(band, ActivityBand::Quiet);
    }

    #[test]
    fn steady_score_holds() {
        let (next, band) = next_interval(&scenario_settings(), secs(2), 3.0);
        assert_eq!(next, secs(2));
        assert_eq!(band, ActivityBand::Steady);
    }

    #[test]
    fn nan_score_holds() {
        let (next, band) = next_interval(&scenario_settings(), secs(4), f64::NAN);
        assert_eq!(next, secs(4));
        assert_eq!(band, ActivityBand::Steady);
    }

    #[test]
    fn threshold_boundaries_are_inclusive() {
        let s = scenario_settings();
        assert_eq!(next_interval(&s, secs(4), 5.0).1, ActivityBand::Active);
        assert_eq!(next_interval(&s, secs(4), 0.0).1, ActivityBand::Quiet);
    }

    #[test]
    fn grow_clamps_at_max() {
        let (next, _) = next_interval(&scenario_settings(), secs(8), -1.0);
        assert_eq!(next, secs(10));
    }

    #[test]
    fn shrink_clamps_at_min() {
        let s = PollSettings {
            step: StepPolicy::Fixed { step_ms: 5_000 },
            ..scenario_settings()
        };
        let (next, _) = next_interval(&s, secs(3), 100.0);
        assert_eq!(next, secs(1));
    }

    proptest! {
        #[test]
        fn interval_stays_bounded(
            min in 1u64..5_000,
            span in 0u64..60_000,
            factor in 1.01f64..16.0,
            scores in proptest::collection::vec(-1e9f64..1e9, 1..64),
        ) {
            let s = PollSettings {
                interval_start_ms: min,
                interval_min_ms: min,
                interval_max_ms: min + span,
                step: StepPolicy::Factor { factor },
                ..scenario_settings()
            };
            let mut current = s.interval_start();
            for score in scores {
                current = next_interval(&s, current, score).0;
                prop_assert!(current >= s.interval_min());
                prop_assert!(current <= s.interval_max());
            }
        }

        #[test]
        fn fixed_step_converges_to_max_when_quiet(
            min in 1u64..5_000,
            span in 0u64..60_000,
            step_ms in 1u64..10_000,
        ) {
            let s = PollSettings {
                interval_start_ms: min,
                interval_min_ms: min,
                interval_max_ms: min + span,
                step: StepPolicy::Fixed { step_ms },
                ..scenario_settings()
            };
            let mut current = s.interval_start();
            let bound = span / step_ms + 1;
            for _ in 0..bound {
                current = next_interval(&s, current, s.quiet_threshold).0;
            }
            prop_assert_eq!(current, s.interval_max());
        }
    }

    // ===== lifecycle =====

    #[test]
    fn start_outside_runtime_is_no_runtime() {
        let service = PollingService::new();
        let instance = service
            .prepare(counting_config(scenario_settings(), Duration::ZERO, |_, _| 0.0))
            .unwrap();
        assert_eq!(instance.state(), PollState::Idle);
        assert!(matches!(instance.start(), Err(PollError::NoRuntime)));
        assert_eq!(instance.state(), PollState::Idle);
    }

    #[test]
    fn create_polling_rejects_bad_config_before_any_tick() {
        let settings = PollSettings {
            interval_start_ms: 20_000,
            ..scenario_settings()
        };
        let err = PollingService::new()
            .create_polling(counting_config(settings, Duration::ZERO, |_, _| 0.0))
            .unwrap_err();
        assert!(matches!(err, PollError::StartOutOfBounds { .. }), "{err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_noop_and_stop_twice_is_noop() {
        let instance = PollingService::new()
            .create_polling(counting_config(scenario_settings(), Duration::ZERO, |_, _| 0.0))
            .unwrap();
        assert_eq!(instance.state(), PollState::Scheduled);
        instance.start().unwrap();
        let generation = instance.generation();

        instance.stop();
        instance.stop();
        assert_eq!(instance.state(), PollState::Stopped);
        assert_eq!(instance.generation(), generation + 1);
        assert!(matches!(instance.start(), Err(PollError::Stopped)));
        instance.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_scheduled_clears_timer() {
        let clock = RecordingClock::new();
        let service = PollingService::with_clock(clock.clone());
        let instance = service
            .create_polling(counting_config(scenario_settings(), Duration::ZERO, |_, _| 0.0))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(instance.state(), PollState::Scheduled);

        instance.stop();
        instance.join().await;
        assert_eq!(instance.stats().ticks, 0);
        assert_eq!(clock.armed(), vec![secs(2)]);
        assert!(instance.last_result().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_scores_against_none() {
        let saw_none = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&saw_none);
        let instance = PollingService::new()
            .create_polling(counting_config(
                scenario_settings(),
                Duration::ZERO,
                move |prev, _| {
                    if prev.is_none() {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                    1.0
                },
            ))
            .unwrap();
        let mut results = instance.subscribe();
        assert_eq!(*results.next().await.unwrap(), 1);
        assert_eq!(*results.next().await.unwrap(), 2);
        assert_eq!(saw_none.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_subscriber_receives_latest_then_live() {
        let instance = PollingService::new()
            .create_polling(counting_config(scenario_settings(), Duration::ZERO, |_, _| 1.0))
            .unwrap();
        let mut early = instance.subscribe();
        assert_eq!(*early.next().await.unwrap(), 1);
        assert_eq!(*early.next().await.unwrap(), 2);

        let mut late = instance.subscribe();
        assert_eq!(late.try_next().as_deref(), Some(&2));
        assert!(late.try_next().is_none());
        assert_eq!(*late.next().await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_ends_after_stop() {
        let instance = PollingService::new()
            .create_polling(counting_config(scenario_settings(), Duration::ZERO, |_, _| 1.0))
            .unwrap();
        let mut results = instance.subscribe();
        assert_eq!(*results.next().await.unwrap(), 1);
        instance.stop();
        assert!(results.next().await.is_none());

        // A subscriber arriving after stop still sees the latest value, then the end.
        let mut after = instance.subscribe();
        assert_eq!(after.next().await.as_deref(), Some(&1));
        assert!(after.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_instance_stops_stream() {
        let instance = PollingService::new()
            .create_polling(counting_config(scenario_settings(), Duration::ZERO, |_, _| 1.0))
            .unwrap();
        let mut results = instance.subscribe();
        assert_eq!(*results.next().await.unwrap(), 1);
        drop(instance);
        assert!(results.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn into_stream_yields_in_order() {
        let instance = PollingService::new()
            .create_polling(counting_config(scenario_settings(), Duration::ZERO, |_, _| 1.0))
            .unwrap();
        let stream = instance.subscribe().into_stream();
        let got: Vec<u64> = stream.take(4).map(|v| *v).collect().await;
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_reported_with_consecutive_count() {
        let config = PollingConfig::new(
            scenario_settings(),
            || async { Err::<u64, BoxError>("backend unavailable".into()) },
            |_, _| 0.0,
        );
        let instance = PollingService::new().create_polling(config).unwrap();
        let mut failures = instance.failures();

        for expected in 1..=ESCALATE_AFTER_FAILURES + 1 {
            let f = failures.recv().await.unwrap();
            assert_eq!(f.consecutive, expected);
            assert_eq!(f.tick, u64::from(expected));
            assert!(matches!(*f.error, PollError::Fetch { .. }));
        }
        assert_ne!(instance.state(), PollState::Stopped);
        assert_eq!(instance.current_interval(), secs(2));
        assert!(instance.last_result().is_none());
        assert_eq!(instance.stats().successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_failures() {
        let calls = Arc::new(AtomicU64::new(0));
        let config = PollingConfig::new(
            scenario_settings(),
            move || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n <= 2 {
                        Err::<u64, BoxError>("down".into())
                    } else {
                        Ok(n)
                    }
                }
            },
            |_, _| 1.0,
        );
        let instance = PollingService::new().create_polling(config).unwrap();
        let mut results = instance.subscribe();
        assert_eq!(*results.next().await.unwrap(), 3);
        let stats = instance.stats();
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.consecutive_failures, 0);
    }
}
