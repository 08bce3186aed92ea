//! 🪣 s3ln — glob a bucket, decode what you find, stream it line by line.
//!
//! 🧠 Knowledge graph, leaves first:
//! - `pattern`: literal vs glob, listing prefix, matching
//! - `decoder`: passthrough / gzip / tar by file name, with the mislabeled-gzip fallback
//! - `scanner`: lines out of bytes, with a hard per-line ceiling
//! - `backends`: the object-store capability (S3 for real, RAM for tests)
//! - `lister`: paged listing + matching
//! - `streamer`: one object → lazy lines
//! - `fanout`: many objects → one channel, under a concurrency cap
//! - `sinks` / `workers` / `progress`: where the records land and how it looks meanwhile
//! - `app_config` / `supervisors`: config in, one wired-up batch out

use anyhow::Result;
use tokio_util::sync::CancellationToken;

pub mod app_config;
pub mod backends;
pub mod common;
pub mod decoder;
pub mod error;
pub mod fanout;
pub mod lister;
pub mod pattern;
pub mod progress;
pub mod scanner;
pub mod sinks;
pub mod streamer;
pub mod supervisors;
mod workers;

pub use app_config::{AppConfig, ConfigOverrides, load_config};
pub use common::{BatchReport, DecodedRecord};
pub use error::{CancelReason, IngestError};
pub use fanout::FanOutCoordinator;
pub use supervisors::Supervisor;

/// 🚀 One batch, start to finish, against real S3.
pub async fn run(app_config: AppConfig, cancel: CancellationToken) -> Result<BatchReport> {
    Supervisor::new(app_config).await?.run(cancel).await
}

/// 📡 Just list the matching keys, against real S3.
pub async fn list(app_config: AppConfig) -> Result<Vec<String>> {
    Supervisor::new(app_config).await?.list().await
}
