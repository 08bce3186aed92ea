//! 📺 StdoutSink — records to standard output, for piping into grep, jq, or regret.
//!
//! Logs go to stderr, so stdout carries nothing but records.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};

use crate::common::DecodedRecord;
use crate::sinks::{OutputFormat, Sink};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StdoutSinkConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

pub struct StdoutSink {
    out: BufWriter<Stdout>,
    format: OutputFormat,
}

impl std::fmt::Debug for StdoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdoutSink")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl StdoutSink {
    pub fn new(config: StdoutSinkConfig) -> Self {
        Self {
            out: BufWriter::new(tokio::io::stdout()),
            format: config.format,
        }
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn receive(&mut self, record: DecodedRecord) -> Result<u64> {
        let mut the_line = self.format.render(&record)?;
        the_line.push('\n');
        // 💀 usually a closed pipe: `s3ln ... | head` is done listening
        self.out
            .write_all(the_line.as_bytes())
            .await
            .context("💀 failed writing to stdout. Did the other end of the pipe hang up?")?;
        Ok(the_line.len() as u64)
    }

    async fn close(&mut self) -> Result<()> {
        self.out.flush().await.context("💀 failed flushing stdout")
    }
}
