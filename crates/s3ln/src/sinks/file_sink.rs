//! 📂 FileSink — records to a file, through a BufWriter, one line each.
//!
//! ⚠️ `File::create` truncates. No warning. No backup. Just gone.
//! He who runs this without checking the output path, re-ingests in shame.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::trace;

use crate::common::DecodedRecord;
use crate::sinks::{OutputFormat, Sink};

/// 🔧 Where to write and how. Lives next to the sink that uses it.
#[derive(Debug, Deserialize, Clone)]
pub struct FileSinkConfig {
    pub file_name: String,
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Debug)]
pub struct FileSink {
    file_buf: BufWriter<File>,
    config: FileSinkConfig,
}

impl FileSink {
    /// 🚀 Create (or obliterate and recreate) the output file.
    pub async fn new(config: FileSinkConfig) -> Result<Self> {
        let the_file = File::create(&config.file_name).await.with_context(|| {
            format!(
                "💀 The sink file '{}' could not be conjured into existence. \
                 Does the parent directory exist? Do we have permission to write there?",
                config.file_name
            )
        })?;
        Ok(Self {
            file_buf: BufWriter::new(the_file),
            config,
        })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn receive(&mut self, record: DecodedRecord) -> Result<u64> {
        let mut the_line = self.config.format.render(&record)?;
        the_line.push('\n');
        self.file_buf
            .write_all(the_line.as_bytes())
            .await
            .with_context(|| format!("💀 failed writing to '{}'. Disk full? Disk gone?", self.config.file_name))?;
        Ok(the_line.len() as u64)
    }

    async fn close(&mut self) -> Result<()> {
        trace!("🎬 final flush of '{}'", self.config.file_name);
        // 🧠 no async Drop, so the flush has to be explicit
        self.file_buf.flush().await.with_context(|| {
            format!(
                "💀 Error flushing '{}'. The bytes were in the buffer, they could see the disk, \
                 and then the flush failed.",
                self.config.file_name
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_every_record_gets_its_own_line() {
        let the_dir = tempfile::tempdir().expect("💀 no temp dir. The filesystem is having a day.");
        let the_path = the_dir.path().join("out.txt");

        let mut the_sink = FileSink::new(FileSinkConfig {
            file_name: the_path.to_string_lossy().into_owned(),
            format: OutputFormat::Lines,
        })
        .await
        .unwrap();

        let mut the_bytes = 0;
        for line in ["first", "", "third"] {
            the_bytes += the_sink
                .receive(DecodedRecord::new("b", "k", line.to_string()))
                .await
                .unwrap();
        }
        the_sink.close().await.unwrap();

        let the_contents = tokio::fs::read_to_string(&the_path).await.unwrap();
        assert_eq!(the_contents, "first\n\nthird\n");
        assert_eq!(the_bytes, the_contents.len() as u64);
    }

    #[tokio::test]
    async fn the_one_where_the_directory_does_not_exist() {
        let the_dir = tempfile::tempdir().unwrap();
        let the_path = the_dir.path().join("nope").join("out.txt");

        let the_result = FileSink::new(FileSinkConfig {
            file_name: the_path.to_string_lossy().into_owned(),
            format: OutputFormat::Ndjson,
        })
        .await;
        assert!(the_result.is_err());
    }
}
