use std::path::PathBuf;

use clap::Parser;

use crate::error::Result;
use crate::settings::PollSettings;

#[derive(Parser, Debug)]
#[command(name = "adaptive-poller")]
#[command(version)]
#[command(about = "Live-poll a JSON table endpoint with an adaptive refresh interval")]
pub struct Args {
    /// URL returning a JSON array of rows (or {"rows": [...]})
    pub url: String,

    /// Row field used to match rows between ticks
    #[arg(long, default_value = "id")]
    pub key: String,

    /// TOML file with polling settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Initial interval in milliseconds
    #[arg(long)]
    pub start_ms: Option<u64>,

    /// Lower interval bound in milliseconds
    #[arg(long)]
    pub min_ms: Option<u64>,

    /// Upper interval bound in milliseconds
    #[arg(long)]
    pub max_ms: Option<u64>,

    /// Changed-row count at or above which polling speeds up
    #[arg(long)]
    pub activity: Option<f64>,

    /// Changed-row count at or below which polling slows down
    #[arg(long)]
    pub quiet: Option<f64>,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value = "10000")]
    pub timeout_ms: u64,

    /// Stop after this many published results
    #[arg(long)]
    pub max_ticks: Option<u64>,
}

impl Args {
    /// Settings from `--config` (or defaults) with command-line overrides applied.
    pub fn settings(&self) -> Result<PollSettings> {
        let mut settings = match &self.config {
            Some(path) => PollSettings::from_file(path)?,
            None => PollSettings::default(),
        };
        if let Some(v) = self.start_ms {
            settings.interval_start_ms = v;
        }
        if let Some(v) = self.min_ms {
            settings.interval_min_ms = v;
        }
        if let Some(v) = self.max_ms {
            settings.interval_max_ms = v;
        }
        if let Some(v) = self.activity {
            settings.activity_threshold = v;
        }
        if let Some(v) = self.quiet {
            settings.quiet_threshold = v;
        }
        Ok(settings)
    }
}
