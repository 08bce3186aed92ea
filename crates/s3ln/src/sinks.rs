//! 🕳️ Sinks — where decoded records end up once they leave the fan-out.
//!
//! 🚰 The coordinator pours records into a channel. The sink worker drains the channel
//! into one of these. Stdout for pipes, a file for keeping, RAM for tests.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::DecodedRecord;

pub mod file_sink;
pub mod in_mem_sink;
pub mod stdout_sink;

pub use file_sink::{FileSink, FileSinkConfig};
pub use in_mem_sink::InMemorySink;
pub use stdout_sink::{StdoutSink, StdoutSinkConfig};

/// 🎨 How a record is written out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Just the line text.
    #[default]
    Lines,
    /// The whole record (bucket, key, line, captured_at) as one JSON object.
    Ndjson,
}

impl OutputFormat {
    /// 📄 Render one record as a single output line, without the trailing newline.
    pub fn render(&self, record: &DecodedRecord) -> Result<String> {
        match self {
            OutputFormat::Lines => Ok(record.line.clone()),
            OutputFormat::Ndjson => Ok(serde_json::to_string(record)?),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lines" | "text" => Ok(OutputFormat::Lines),
            "ndjson" | "json" => Ok(OutputFormat::Ndjson),
            other => bail!("💀 unknown output format '{other}'. Try 'lines' or 'ndjson'."),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Lines => write!(f, "lines"),
            OutputFormat::Ndjson => write!(f, "ndjson"),
        }
    }
}

/// 🔧 Which sink to build. Externally tagged, so TOML reads `[sink_config.File]`.
#[derive(Debug, Clone, Deserialize)]
pub enum SinkConfig {
    Stdout(StdoutSinkConfig),
    File(FileSinkConfig),
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::Stdout(StdoutSinkConfig::default())
    }
}

impl SinkConfig {
    pub fn format(&self) -> OutputFormat {
        match self {
            SinkConfig::Stdout(config) => config.format,
            SinkConfig::File(config) => config.format,
        }
    }

    /// 🎛️ Override the output format, whichever sink it is.
    pub fn set_format(&mut self, format: OutputFormat) {
        match self {
            SinkConfig::Stdout(config) => config.format = format,
            SinkConfig::File(config) => config.format = format,
        }
    }
}

/// 🕳️ Consumes records one at a time.
///
/// # Contract
/// - `receive` writes or stashes the record. Errors end the sink worker.
/// - `close` flushes whatever is buffered. MUST be called; async drop is not a thing.
#[async_trait]
pub trait Sink: fmt::Debug + Send {
    /// 📥 Take one record. Returns how many bytes it cost, for the progress display.
    async fn receive(&mut self, record: DecodedRecord) -> Result<u64>;
    /// 🗑️ Flush and release.
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 Enum dispatch over the concrete sinks, so the worker never needs a trait object.
#[derive(Debug)]
pub enum SinkBackend {
    Stdout(StdoutSink),
    File(FileSink),
    InMemory(InMemorySink),
}

impl SinkBackend {
    /// 🏗️ Build the sink the config asks for.
    pub async fn from_config(config: &SinkConfig) -> Result<Self> {
        match config {
            SinkConfig::Stdout(config) => Ok(SinkBackend::Stdout(StdoutSink::new(config.clone()))),
            SinkConfig::File(config) => Ok(SinkBackend::File(FileSink::new(config.clone()).await?)),
        }
    }
}

#[async_trait]
impl Sink for SinkBackend {
    async fn receive(&mut self, record: DecodedRecord) -> Result<u64> {
        match self {
            SinkBackend::Stdout(sink) => sink.receive(record).await,
            SinkBackend::File(sink) => sink.receive(record).await,
            SinkBackend::InMemory(sink) => sink.receive(record).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SinkBackend::Stdout(sink) => sink.close().await,
            SinkBackend::File(sink) => sink.close().await,
            SinkBackend::InMemory(sink) => sink.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_formats_parse_from_the_command_line() {
        assert_eq!("lines".parse::<OutputFormat>().unwrap(), OutputFormat::Lines);
        assert_eq!("NDJSON".parse::<OutputFormat>().unwrap(), OutputFormat::Ndjson);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Ndjson);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn the_one_where_ndjson_carries_the_whole_record() {
        let the_record = DecodedRecord::new("b", "k.log", "hi".to_string());

        assert_eq!(OutputFormat::Lines.render(&the_record).unwrap(), "hi");
        let the_json = OutputFormat::Ndjson.render(&the_record).unwrap();
        assert!(!the_json.contains('\n'));
        let the_value: serde_json::Value = serde_json::from_str(&the_json).unwrap();
        assert_eq!(the_value["key"], "k.log");
    }

    #[test]
    fn the_one_where_the_format_override_finds_the_right_sink() {
        let mut the_config = SinkConfig::File(FileSinkConfig {
            file_name: "out.ndjson".to_string(),
            format: OutputFormat::Lines,
        });
        the_config.set_format(OutputFormat::Ndjson);
        assert_eq!(the_config.format(), OutputFormat::Ndjson);
        assert_eq!(SinkConfig::default().format(), OutputFormat::Lines);
    }
}
