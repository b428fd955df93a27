use std::sync::Arc;
use std::time::Duration;

use adaptive_poller::cli::Args;
use adaptive_poller::detect::changed_rows;
use adaptive_poller::table_client::{row_key, TableClient};
use adaptive_poller::{PollingConfig, PollingService};
use clap::Parser;
use colored::*;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// One line per published table.
fn summary_line(published: u64, rows: usize, changed: usize, interval: Duration) -> String {
    let changed_label = if changed == 0 {
        "no changes".dimmed().to_string()
    } else {
        format!("{changed} changed").green().bold().to_string()
    };
    format!(
        "[{published:>4}] {rows} rows, {changed_label}, next poll in {} ms",
        interval.as_millis()
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = args.settings()?;

    let client = Arc::new(
        TableClient::builder(&args.url)
            .request_timeout(Duration::from_millis(args.timeout_ms))
            .build(),
    );
    let key = args.key.clone();
    let config = PollingConfig::builder(move || {
        let client = Arc::clone(&client);
        async move { client.fetch_rows().await }
    })
    .settings(settings)
    .detect_changes(move |prev: Option<&Vec<Value>>, next: &Vec<Value>| {
        changed_rows(prev.map(Vec::as_slice), next.as_slice(), |r| row_key(r, &key)) as f64
    })
    .build()?;

    println!("{} {} (key: {})", "Polling".bold(), args.url.cyan(), args.key);

    let instance = PollingService::new().create_polling(config)?;
    let mut results = instance.subscribe();
    let mut failures = instance.failures();
    let mut published: u64 = 0;
    let mut previous: Option<Arc<Vec<Value>>> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Stopping...".yellow());
                break;
            }
            next = results.next() => {
                let Some(rows) = next else { break };
                published += 1;
                let changed = changed_rows(
                    previous.as_deref().map(Vec::as_slice),
                    rows.as_slice(),
                    |r| row_key(r, &args.key),
                );
                println!(
                    "{}",
                    summary_line(published, rows.len(), changed, instance.current_interval())
                );
                previous = Some(rows);
                if args.max_ticks.is_some_and(|max| published >= max) {
                    break;
                }
            }
            failure = failures.recv() => match failure {
                Ok(f) => eprintln!(
                    "{} tick {} failed ({} in a row): {}",
                    "!".red().bold(),
                    f.tick,
                    f.consecutive,
                    f.error
                ),
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("{} {skipped} failure reports skipped", "!".red().bold());
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    instance.stop();
    instance.join().await;

    let stats = instance.stats();
    println!(
        "{} {} ticks, {} published, {} failed",
        "Done:".bold(),
        stats.ticks,
        stats.successes,
        stats.failures
    );
    Ok(())
}
