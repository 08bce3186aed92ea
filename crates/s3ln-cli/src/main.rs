//! 🚀 s3ln — the front door. Parses flags, loads config, sets up logging, and lets the
//! library do the heavy lifting. Like a manager. 🦆
//!
//! Records go to stdout (or a file). Logs, the spinner and the summary go to stderr.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use s3ln::sinks::OutputFormat;
use s3ln::ConfigOverrides;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// 🪣 Stream every object matching a glob out of an S3 bucket, line by line.
#[derive(Debug, Parser)]
#[command(name = "s3ln", version, about)]
struct Cli {
    /// TOML config file. Optional; env vars (S3LN_*) and flags work without one.
    #[arg(short, long, env = "S3LN_CONFIG")]
    config: Option<PathBuf>,

    /// Bucket to read from.
    #[arg(short, long)]
    bucket: Option<String>,

    /// Key or glob, e.g. 'logs/2024/**/*.gz'.
    #[arg(short, long)]
    pattern: Option<String>,

    /// Objects processed at once. Zero or less runs one at a time.
    #[arg(long, allow_negative_numbers = true)]
    concurrency: Option<i64>,

    /// Output format: lines or ndjson.
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Print the matching keys and stop.
    #[arg(long)]
    list_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 stderr, so stdout stays clean for the records
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let the_cli = Cli::parse();

    if let Err(err) = run(the_cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("dispatch failure")
                || cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
                || cause_str.contains("timed out")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like the object store isn't reachable. \
                 Double-check storage.region and storage.endpoint, and that your credentials \
                 can see the bucket. For a local MinIO, try `docker ps` to see if it's even up."
            );
        }

        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    // 🔒 a config path that doesn't exist is a typo, not a request for defaults
    if let Some(path) = &cli.config {
        let the_file_exists = path.try_exists().with_context(|| {
            format!("💀 Couldn't check whether the config file exists: '{}'", path.display())
        })?;
        anyhow::ensure!(
            the_file_exists,
            "💀 Config file '{}' does not exist. Check the path, or use an absolute one.",
            path.display()
        );
    }

    let the_overrides = ConfigOverrides {
        bucket: cli.bucket,
        pattern: cli.pattern,
        concurrency: cli.concurrency,
        format: cli.format,
    };
    let the_config = s3ln::load_config(cli.config.as_deref(), &the_overrides)
        .context("💀 Couldn't load the configuration. Bucket and pattern are required, via file, env or flags.")?;

    if cli.list_only {
        for key in s3ln::list(the_config).await? {
            println!("{key}");
        }
        return Ok(());
    }

    let the_cancel = CancellationToken::new();
    let the_trigger = the_cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 ctrl-c received, stopping the batch");
            the_trigger.cancel();
        }
    });

    let the_started = Instant::now();
    let the_report = s3ln::run(the_config, the_cancel).await?;
    eprintln!("{}", s3ln::progress::render_summary(&the_report, the_started.elapsed()));

    if !the_report.is_clean() {
        warn!(
            "⚠️ {} of {} object(s) failed; see the errors above",
            the_report.objects_failed, the_report.objects_total
        );
    }
    Ok(())
}
