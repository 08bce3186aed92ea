//! 🔧 App Configuration — the sacred env-to-TOML-to-flags-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment. Layers, lowest to highest:
//!   1. `S3LN_*` environment variables, nested with `__` (`S3LN_INGEST__BUCKET=logs`)
//!   2. the TOML file, if one was given
//!   3. command-line overrides
//!
//! Then a little validation, because a zero-byte line ceiling is nobody's friend.

use std::path::Path;

use anyhow::{Context, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::backends::S3ClientConfig;
use crate::fanout::{DEFAULT_INITIAL_BUFFER_SIZE, DEFAULT_MAX_BUFFER_SIZE};
use crate::sinks::{OutputFormat, SinkConfig};

/// 📦 One struct to rule them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🪣 How to reach the bucket.
    #[serde(default)]
    pub storage: S3ClientConfig,
    /// 🎯 What to read.
    pub ingest: IngestConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub sink_config: SinkConfig,
}

/// 🎯 The bucket and the pattern. The only two things nobody can default for you.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub bucket: String,
    pub pattern: String,
}

/// 🧵 Knobs for the fan-out and the output channel.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Objects in flight at once. Zero or negative runs sequentially.
    pub concurrency: i64,
    /// Starting size of each object's line buffer, in bytes.
    pub initial_buffer_size: usize,
    /// Hard ceiling for a single line, in bytes.
    pub max_buffer_size: usize,
    /// Records buffered between the fan-out and the sink before producers wait.
    #[serde(alias = "channel_size")]
    pub queue_capacity: usize,
    /// ⏰ Give up on the whole batch after this many seconds.
    pub timeout_secs: Option<u64>,
    /// 📊 Draw the spinner on stderr.
    pub progress: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            initial_buffer_size: DEFAULT_INITIAL_BUFFER_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            queue_capacity: 1024,
            timeout_secs: None,
            progress: true,
        }
    }
}

/// 🎛️ Whatever the command line wants to say over the file and the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bucket: Option<String>,
    pub pattern: Option<String>,
    pub concurrency: Option<i64>,
    pub format: Option<OutputFormat>,
}

impl AppConfig {
    /// ✅ Sanity-check and normalize. Called by `load_config`.
    pub fn validate(mut self) -> anyhow::Result<Self> {
        if self.ingest.bucket.trim().is_empty() {
            bail!("💀 ingest.bucket is empty. We need a bucket to read from. Any bucket. Please.");
        }
        if self.ingest.pattern.trim().is_empty() {
            bail!("💀 ingest.pattern is empty. Try something like '*.log' or 'logs/**/*.gz'.");
        }
        if self.runtime.max_buffer_size == 0 {
            bail!("💀 runtime.max_buffer_size is 0. Not even an empty line fits in zero bytes. Well, it does. Nothing else does.");
        }
        if self.runtime.initial_buffer_size > self.runtime.max_buffer_size {
            warn!(
                "⚠️ runtime.initial_buffer_size ({}) is bigger than runtime.max_buffer_size ({}), clamping",
                self.runtime.initial_buffer_size, self.runtime.max_buffer_size
            );
            self.runtime.initial_buffer_size = self.runtime.max_buffer_size;
        }
        // 🧠 a zero-capacity channel would be a rendezvous channel; keep at least one slot
        self.runtime.queue_capacity = self.runtime.queue_capacity.max(1);
        Ok(self)
    }
}

/// 🚀 Load the config from env vars, an optional TOML file, and CLI overrides.
///
/// - `config_file_name` None → env vars (+ overrides) only. No file, no assumptions.
/// - `config_file_name` Some → env vars, then the file on top, then overrides on top of that.
pub fn load_config(
    config_file_name: Option<&Path>,
    overrides: &ConfigOverrides,
) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let mut config = Figment::new().merge(Env::prefixed("S3LN_").split("__"));

    if let Some(file_name) = config_file_name {
        config = config.merge(Toml::file(file_name));
    }

    if let Some(bucket) = &overrides.bucket {
        config = config.merge(Serialized::default("ingest.bucket", bucket));
    }
    if let Some(pattern) = &overrides.pattern {
        config = config.merge(Serialized::default("ingest.pattern", pattern));
    }
    if let Some(concurrency) = overrides.concurrency {
        config = config.merge(Serialized::default("runtime.concurrency", concurrency));
    }

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}', environment variables (S3LN_*) and flags.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (S3LN_*) and flags. \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    let mut app_config: AppConfig = config.extract().context(context_msg)?;
    if let Some(format) = overrides.format {
        app_config.sink_config.set_format(format);
    }
    app_config.validate()
}
