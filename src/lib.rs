//! # adaptive-poller
//!
//! Adaptive polling engine for live operational tables (sample tracking
//! across pre-analytical workflow stages) that must stay close to real time
//! without a push channel.
//!
//! A [`PollingService`] creates independent [`PollingInstance`]s. Each one
//! re-runs a caller-supplied request on a timer, scores the change between
//! consecutive results with a caller-supplied detector, speeds up while data
//! is moving and slows down while it is quiet, and publishes every successful
//! result to its subscribers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = PollingConfig::builder(move || client.fetch_rows())
//!     .interval_start(Duration::from_secs(2))
//!     .interval_min(Duration::from_secs(1))
//!     .interval_max(Duration::from_secs(10))
//!     .detect_changes(|prev, next| detect::changed_count(prev.map(Vec::as_slice), next) as f64)
//!     .build()?;
//! let instance = PollingService::new().create_polling(config)?;
//! let mut rows = instance.subscribe();
//! while let Some(table) = rows.next().await {
//!     merge_into_view(&table);
//! }
//! ```
//!
//! ## Modules
//! - [`settings`]: interval bounds, thresholds, step policy; TOML loading
//! - [`config`]: `PollingConfig<T>` and its builder
//! - [`clock`]: injectable timer
//! - [`guard`]: single-flight and staleness filtering for one request
//! - [`scheduler`]: the adaptive polling loop and its handle
//! - [`detect`]: ready-made change detectors
//! - [`tabs`]: one live instance per selected tab
//! - [`table_client`]: JSON table fetcher used by the CLI

pub mod cli;
pub mod clock;
pub mod config;
pub mod detect;
pub mod error;
pub mod guard;
pub mod scheduler;
pub mod settings;
pub mod table_client;
pub mod tabs;

pub use clock::{Clock, RecordingClock, TokioClock};
pub use config::{PollingConfig, PollingConfigBuilder};
pub use error::{BoxError, PollError, Result};
pub use guard::{Outcome, RequestGuard};
pub use scheduler::{
    next_interval, ActivityBand, PollState, PollStats, PollingInstance, PollingService,
    ResultStream, TickFailure,
};
pub use settings::{PollSettings, StepPolicy};
pub use tabs::TabPoller;
