//! Caller-supplied configuration for one polling stream.
//!
//! A [`PollingConfig`] bundles the plain [`PollSettings`] with the two
//! behaviours the engine invokes on every tick: the opaque `request`
//! operation and the `detect_changes` scoring function. It is immutable once
//! handed to [`PollingService`](crate::scheduler::PollingService).

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};

use crate::error::{BoxError, PollError, Result};
use crate::settings::{PollSettings, StepPolicy};

/// Type-erased request operation.
pub type RequestFn<T> =
    Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<T, BoxError>> + Send + Sync>;

/// Type-erased change detector: `(previous, next) -> activity score`.
pub type DetectFn<T> = Arc<dyn Fn(Option<&T>, &T) -> f64 + Send + Sync>;

fn erase_request<T, F, Fut, E>(request: F) -> RequestFn<T>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
{
    Arc::new(move || request().map(|r| r.map_err(Into::into)).boxed())
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Configuration for one [`PollingInstance`](crate::scheduler::PollingInstance).
pub struct PollingConfig<T> {
    settings: PollSettings,
    request: RequestFn<T>,
    detect: DetectFn<T>,
}

impl<T: Send + 'static> PollingConfig<T> {
    /// Assemble a config directly. Validation happens in
    /// [`validate`](Self::validate) and again at `create_polling` time.
    pub fn new<F, Fut, E, D>(settings: PollSettings, request: F, detect_changes: D) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
        D: Fn(Option<&T>, &T) -> f64 + Send + Sync + 'static,
    {
        Self {
            settings,
            request: erase_request(request),
            detect: Arc::new(detect_changes),
        }
    }

    /// Start building a config around `request`.
    pub fn builder<F, Fut, E>(request: F) -> PollingConfigBuilder<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        PollingConfigBuilder {
            settings: PollSettings::default(),
            request: erase_request(request),
            detect: None,
        }
    }
}

impl<T> PollingConfig<T> {
    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// See [`PollSettings::validate`].
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()
    }

    pub(crate) fn request(&self) -> BoxFuture<'static, std::result::Result<T, BoxError>> {
        (self.request)()
    }

    pub(crate) fn detect_changes(&self, previous: Option<&T>, next: &T) -> f64 {
        (self.detect)(previous, next)
    }
}

impl<T> Clone for PollingConfig<T> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            request: Arc::clone(&self.request),
            detect: Arc::clone(&self.detect),
        }
    }
}

impl<T> fmt::Debug for PollingConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingConfig")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Builder for [`PollingConfig`].
///
/// # Example
/// ```rust,ignore
/// let config = PollingConfig::builder(move || client.fetch_rows())
///     .interval_start(Duration::from_secs(2))
///     .interval_min(Duration::from_secs(1))
///     .interval_max(Duration::from_secs(10))
///     .detect_changes(|prev, next| detect::changed_count(prev, next) as f64)
///     .build()?;
/// ```
pub struct PollingConfigBuilder<T> {
    settings: PollSettings,
    request: RequestFn<T>,
    detect: Option<DetectFn<T>>,
}

impl<T> PollingConfigBuilder<T> {
    /// Replace all plain settings at once (e.g. loaded from a file).
    pub fn settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn interval_start(mut self, interval: Duration) -> Self {
        self.settings.interval_start_ms = millis(interval);
        self
    }

    pub fn interval_min(mut self, interval: Duration) -> Self {
        self.settings.interval_min_ms = millis(interval);
        self
    }

    pub fn interval_max(mut self, interval: Duration) -> Self {
        self.settings.interval_max_ms = millis(interval);
        self
    }

    pub fn activity_threshold(mut self, threshold: f64) -> Self {
        self.settings.activity_threshold = threshold;
        self
    }

    pub fn quiet_threshold(mut self, threshold: f64) -> Self {
        self.settings.quiet_threshold = threshold;
        self
    }

    pub fn step(mut self, step: StepPolicy) -> Self {
        self.settings.step = step;
        self
    }

    pub fn stream_capacity(mut self, capacity: usize) -> Self {
        self.settings.stream_capacity = capacity;
        self
    }

    /// Attach the change detector. **Required.**
    pub fn detect_changes<D>(mut self, detect: D) -> Self
    where
        D: Fn(Option<&T>, &T) -> f64 + Send + Sync + 'static,
    {
        self.detect = Some(Arc::new(detect));
        self
    }

    /// Consume the builder.
    ///
    /// # Errors
    /// [`PollError::MissingDetector`] when no detector was attached, or the
    /// first settings rule that fails validation.
    pub fn build(self) -> Result<PollingConfig<T>> {
        let detect = self.detect.ok_or(PollError::MissingDetector)?;
        self.settings.validate()?;
        Ok(PollingConfig {
            settings: self.settings,
            request: self.request,
            detect,
        })
    }
}
