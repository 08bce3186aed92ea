//! 🎬 *[a channel fills with records. somewhere, a sink waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 🗑️ The SinkWorker drains the output channel into a sink, one record at a time, until
//! every producer has hung up. Then it closes the sink and goes home.
//!
//! 🦆 (the duck has no comment at this time)

use anyhow::{Context, Result};
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::debug;

use super::Worker;
use crate::common::DecodedRecord;
use crate::progress::ProgressMetrics;
use crate::sinks::{Sink, SinkBackend};

#[derive(Debug)]
pub(crate) struct SinkWorker {
    rx: Receiver<DecodedRecord>,
    sink: SinkBackend,
    progress: ProgressMetrics,
}

impl SinkWorker {
    pub(crate) fn new(rx: Receiver<DecodedRecord>, sink: SinkBackend, progress: ProgressMetrics) -> Self {
        Self { rx, sink, progress }
    }
}

impl Worker for SinkWorker {
    fn start(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("📥 SinkWorker started draining channel...");
            loop {
                match self.rx.recv().await {
                    Ok(record) => {
                        let the_bytes = match self.sink.receive(record).await {
                            Ok(bytes) => bytes,
                            Err(err) => {
                                // 🚪 hang up on the producers so they stop instead of wedging on a full channel
                                self.rx.close();
                                self.progress.finish();
                                return Err(err).context("SinkWorker failed to receive record");
                            }
                        };
                        self.progress.update(the_bytes, 1);
                    }
                    Err(_) => {
                        // Channel is empty and closed
                        debug!(
                            "🏁 SinkWorker: Channel closed after {} line(s). Shutting down.",
                            self.progress.total_lines()
                        );
                        self.progress.finish();
                        self.sink.close().await.context("SinkWorker failed to close sink")?;
                        return Ok(());
                    }
                }
            }
        })
    }
}
