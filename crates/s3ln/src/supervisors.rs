//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where log files hide in buckets..."
//! 🎬 "One supervisor dared to read them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor wires one invocation together: list the keys, start the sink
//! worker, fan out over the keys, hang up the channel, wait for the sink to finish.
//!
//! 🔒 Workers stay private. The supervisor is the only one who talks to them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::{ObjectStore, S3ObjectStore};
use crate::common::BatchReport;
use crate::fanout::{FanOutCoordinator, FatalErrorPolicy, never_fatal};
use crate::lister;
use crate::progress::ProgressMetrics;
use crate::sinks::SinkBackend;
use crate::workers::{SinkWorker, Worker};

/// 📦 Hovers over one batch, asking "is it done yet?" every few milliseconds.
pub struct Supervisor<S: ObjectStore + ?Sized = dyn ObjectStore> {
    app_config: AppConfig,
    store: Arc<S>,
    is_fatal: FatalErrorPolicy,
}

impl<S: ObjectStore + ?Sized> std::fmt::Debug for Supervisor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("app_config", &self.app_config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// 🚀 A supervisor backed by a real S3 client built from `app_config.storage`.
    pub async fn new(app_config: AppConfig) -> Result<Self> {
        let the_store = S3ObjectStore::new(&app_config.storage)
            .await
            .context("💀 Could not build the S3 client. Check the [storage] section.")?;
        let the_store: Arc<dyn ObjectStore> = Arc::new(the_store);
        Ok(Self::with_store(app_config, the_store))
    }
}

impl<S: ObjectStore + ?Sized + 'static> Supervisor<S> {
    /// 🔧 A supervisor over any object store. Tests bring an in-memory one.
    pub fn with_store(app_config: AppConfig, store: Arc<S>) -> Self {
        Self {
            app_config,
            store,
            is_fatal: never_fatal(),
        }
    }

    /// 🧪 Which per-key errors should end the batch. Default: none.
    pub fn with_fatal_policy(mut self, is_fatal: FatalErrorPolicy) -> Self {
        self.is_fatal = is_fatal;
        self
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.app_config
    }

    /// 📡 Just the listing: every key matching the configured pattern.
    pub async fn list(&self) -> Result<Vec<String>> {
        let the_ingest = &self.app_config.ingest;
        lister::list_files(self.store.as_ref(), &the_ingest.bucket, &the_ingest.pattern)
            .await
            .context("💀 Listing the bucket failed, so there is nothing to read.")
    }

    /// 🧵 The whole batch, into the sink the config asks for.
    pub async fn run(&self, cancel: CancellationToken) -> Result<BatchReport> {
        let the_keys = self.list().await?;
        let the_sink = SinkBackend::from_config(&self.app_config.sink_config).await?;
        self.run_keys_into(the_keys, the_sink, cancel).await
    }

    /// 🧵 Stream the given keys into the given sink.
    pub async fn run_keys_into(
        &self,
        keys: Vec<String>,
        sink: SinkBackend,
        cancel: CancellationToken,
    ) -> Result<BatchReport> {
        let the_ingest = &self.app_config.ingest;
        let the_runtime = &self.app_config.runtime;
        let the_started = Instant::now();

        info!(
            "🚀 reading {} object(s) from s3://{} matching {:?}",
            keys.len(),
            the_ingest.bucket,
            the_ingest.pattern
        );

        let (the_tx, the_rx) = async_channel::bounded(the_runtime.queue_capacity.max(1));
        let the_progress = ProgressMetrics::new(
            format!("s3://{}/{}", the_ingest.bucket, the_ingest.pattern),
            keys.len(),
            the_runtime.progress,
        );
        let the_sink_worker = SinkWorker::new(the_rx, sink, the_progress).start();

        let the_policy = self.is_fatal.clone();
        let the_coordinator = FanOutCoordinator::new(self.store.clone())
            .with_concurrency(the_runtime.concurrency)
            .with_buffer_sizes(the_runtime.initial_buffer_size, the_runtime.max_buffer_size)
            .with_deadline(the_runtime.timeout_secs.map(Duration::from_secs))
            .with_fatal_policy(move |err| the_policy(err));

        // 📤 the sender moves in; once every task lets go of it, the sink worker sees the channel close
        let the_batch = the_coordinator
            .run(&the_ingest.bucket, keys, the_tx, cancel)
            .await;

        let the_sink_result = the_sink_worker
            .await
            .context("💀 The sink worker panicked. The records it was holding are gone.")?;

        let the_report = the_batch.context("💀 The batch did not finish")?;
        the_sink_result.context("💀 The sink gave up before the batch finished")?;

        info!(
            "🏁 done in {:.1}s: {} of {} object(s) succeeded, {} line(s)",
            the_started.elapsed().as_secs_f64(),
            the_report.objects_succeeded,
            the_report.objects_total,
            the_report.lines_emitted
        );
        Ok(the_report)
    }
}
