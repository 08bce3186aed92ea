//! 🧵 FanOutCoordinator — many objects, a few at a time, one output channel.
//!
//! 🎬 COLD OPEN — INT. THREAD POOL — NIGHT
//!
//! Four thousand keys arrived at once. The old way was one task per key and a prayer for
//! the connection pool. The new way has a bouncer: a semaphore with `concurrency` permits.
//! No permit, no fetch. The permit leaves with the task, whatever the task's fate was.
//!
//! 🧠 Knowledge graph:
//! - A dispatcher task walks the keys in order, acquiring a permit before spawning each
//!   per-key task. It stops early if the batch is stopping.
//! - Each per-key task drives a [`LineStream`](crate::streamer::LineStream), wraps every line
//!   into a [`DecodedRecord`], and pushes it into the caller's channel. A bounded channel
//!   means a slow consumer slows the producers. That's the backpressure.
//! - Terminal states come back on an unbounded outcome channel. The coordinator counts
//!   them until every key has reported, or until cancellation/deadline, or until the fatal
//!   policy says stop.
//! - Leaving `run()` by any path trips the internal stop token, so stragglers bail at the
//!   next line or send and drop their permits and bodies on the way out.
//!
//! ⚠️ The default policy treats nothing as fatal. Bad objects are logged and counted.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_channel::Sender;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::backends::ObjectStore;
use crate::common::{BatchReport, DecodedRecord};
use crate::error::{CancelReason, IngestError};
use crate::streamer;

/// 🧪 Decides whether one key's failure should end the whole batch.
pub type FatalErrorPolicy = Arc<dyn Fn(&IngestError) -> bool + Send + Sync>;

/// 🕊️ The default: nothing is fatal, the batch always limps to the finish line.
pub fn never_fatal() -> FatalErrorPolicy {
    Arc::new(|_| false)
}

pub const DEFAULT_INITIAL_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// 🧵 Runs the line streamer over many keys under a concurrency cap.
pub struct FanOutCoordinator<S: ObjectStore + ?Sized> {
    store: Arc<S>,
    concurrency: usize,
    initial_buffer_size: usize,
    max_buffer_size: usize,
    deadline: Option<Duration>,
    is_fatal: FatalErrorPolicy,
}

impl<S: ObjectStore + ?Sized> fmt::Debug for FanOutCoordinator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutCoordinator")
            .field("store", &self.store)
            .field("concurrency", &self.concurrency)
            .field("initial_buffer_size", &self.initial_buffer_size)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStore + ?Sized + 'static> FanOutCoordinator<S> {
    /// 🚀 Sequential, default buffers, no deadline, nothing fatal.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            concurrency: 1,
            initial_buffer_size: DEFAULT_INITIAL_BUFFER_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            deadline: None,
            is_fatal: never_fatal(),
        }
    }

    /// 🔢 Objects in flight at once. Zero or negative means one.
    pub fn with_concurrency(mut self, concurrency: i64) -> Self {
        self.concurrency = effective_concurrency(concurrency);
        self
    }

    /// 📏 Scanner buffer sizes. The initial size never exceeds the ceiling.
    pub fn with_buffer_sizes(mut self, initial_buffer_size: usize, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self.initial_buffer_size = initial_buffer_size.min(max_buffer_size);
        self
    }

    /// ⏰ Give up on the batch after this long.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// 🧪 Swap in a different opinion on which errors are fatal.
    pub fn with_fatal_policy<F>(mut self, is_fatal: F) -> Self
    where
        F: Fn(&IngestError) -> bool + Send + Sync + 'static,
    {
        self.is_fatal = Arc::new(is_fatal);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 🚀 Stream every key in `keys` into `sink`.
    ///
    /// Returns the tally once every key has reached a terminal state. Returns early with
    /// `Cancelled` when `cancel` fires or the deadline passes, and with the offending
    /// error when the fatal policy says so. Per-key errors are otherwise logged and
    /// counted in the report.
    pub async fn run(
        &self,
        bucket: &str,
        keys: Vec<String>,
        sink: Sender<DecodedRecord>,
        cancel: CancellationToken,
    ) -> Result<BatchReport, IngestError> {
        let mut the_report = BatchReport::new(keys.len());
        if keys.is_empty() {
            debug!("🧵 no keys to process for bucket {:?}, nothing to do", bucket);
            return Ok(the_report);
        }

        debug!(
            "🧵 fanning out {} key(s) from bucket {:?} with concurrency {}",
            keys.len(),
            bucket,
            self.concurrency
        );

        // 🛑 everything we spawn listens to this one. Leaving this function trips it.
        let the_stop = cancel.child_token();
        let _the_stop_guard = the_stop.clone().drop_guard();

        let (the_outcome_tx, the_outcome_rx) = async_channel::unbounded::<KeyOutcome>();
        let the_dispatcher = Dispatcher {
            store: self.store.clone(),
            bucket: Arc::from(bucket),
            gate: Arc::new(Semaphore::new(self.concurrency)),
            initial_buffer_size: self.initial_buffer_size,
            max_buffer_size: self.max_buffer_size,
            sink,
            outcomes: the_outcome_tx,
            stop: the_stop.clone(),
        };
        tokio::spawn(the_dispatcher.dispatch(keys));

        let the_timer = sleep_until_deadline(self.deadline.map(|d| Instant::now() + d));
        tokio::pin!(the_timer);

        let mut the_reported = 0usize;
        while the_reported < the_report.objects_total {
            let the_outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("🛑 batch cancelled with {} of {} key(s) finished", the_reported, the_report.objects_total);
                    return Err(IngestError::Cancelled(CancelReason::Cancelled));
                }
                _ = &mut the_timer => {
                    warn!("⏰ batch deadline exceeded with {} of {} key(s) finished", the_reported, the_report.objects_total);
                    return Err(IngestError::Cancelled(CancelReason::DeadlineExceeded));
                }
                the_outcome = the_outcome_rx.recv() => the_outcome,
            };

            let Ok(the_outcome) = the_outcome else {
                // 💀 every sender is gone but not every key reported. A task panicked.
                let the_missing = the_report.objects_total - the_reported;
                error!(
                    "💀 {} key(s) never reported an outcome; counting them as failed",
                    the_missing
                );
                the_report.objects_failed += the_missing;
                break;
            };

            the_reported += 1;
            the_report.lines_emitted += the_outcome.lines;

            match the_outcome.result {
                Ok(()) => the_report.objects_succeeded += 1,
                Err(err) => {
                    the_report.objects_failed += 1;
                    error!("💀 failed processing key {:?}: {}", the_outcome.key, error_chain(&err));
                    if (self.is_fatal)(&err) {
                        error!("🛑 error on key {:?} is fatal, aborting the batch", the_outcome.key);
                        return Err(err);
                    }
                }
            }
        }

        debug!(
            "🏁 batch done: {} succeeded, {} failed, {} line(s)",
            the_report.objects_succeeded, the_report.objects_failed, the_report.lines_emitted
        );
        Ok(the_report)
    }
}

/// 🔢 Requested concurrency to permit count. Anything below one is one.
pub fn effective_concurrency(requested: i64) -> usize {
    usize::try_from(requested)
        .unwrap_or(0)
        .clamp(1, Semaphore::MAX_PERMITS)
}

/// 📬 What one key's task reports when it's done.
#[derive(Debug)]
struct KeyOutcome {
    key: String,
    lines: u64,
    result: Result<(), IngestError>,
}

/// 🚪 Hands out permits and spawns per-key tasks.
struct Dispatcher<S: ObjectStore + ?Sized> {
    store: Arc<S>,
    bucket: Arc<str>,
    gate: Arc<Semaphore>,
    initial_buffer_size: usize,
    max_buffer_size: usize,
    sink: Sender<DecodedRecord>,
    outcomes: Sender<KeyOutcome>,
    stop: CancellationToken,
}

impl<S: ObjectStore + ?Sized + 'static> Dispatcher<S> {
    async fn dispatch(self, keys: Vec<String>) {
        for key in keys {
            let the_permit = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                the_permit = self.gate.clone().acquire_owned() => match the_permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            tokio::spawn(process_key(
                the_permit,
                self.store.clone(),
                self.bucket.clone(),
                key,
                self.initial_buffer_size,
                self.max_buffer_size,
                self.sink.clone(),
                self.outcomes.clone(),
                self.stop.clone(),
            ));
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_key<S: ObjectStore + ?Sized>(
    _permit: OwnedSemaphorePermit,
    store: Arc<S>,
    bucket: Arc<str>,
    key: String,
    initial_buffer_size: usize,
    max_buffer_size: usize,
    sink: Sender<DecodedRecord>,
    outcomes: Sender<KeyOutcome>,
    stop: CancellationToken,
) {
    let mut the_lines = streamer::stream(
        store,
        bucket.as_ref(),
        key.as_str(),
        initial_buffer_size,
        max_buffer_size,
    );

    let mut the_forwarded = 0u64;
    let the_result =
        forward_lines(&mut the_lines, &bucket, &key, &sink, &stop, &mut the_forwarded).await;
    let the_outcome = KeyOutcome {
        key,
        lines: the_forwarded,
        result: the_result,
    };
    // 🔒 close the object before reporting, so "reported" implies "released"
    drop(the_lines);

    // the coordinator may have left already; nobody to tell
    let _ = outcomes.send(the_outcome).await;
}

async fn forward_lines<S: ObjectStore + ?Sized>(
    lines: &mut streamer::LineStream<S>,
    bucket: &str,
    key: &str,
    sink: &Sender<DecodedRecord>,
    stop: &CancellationToken,
    forwarded: &mut u64,
) -> Result<(), IngestError> {
    let the_stopped = || IngestError::Cancelled(CancelReason::Cancelled);

    loop {
        let the_item = tokio::select! {
            biased;
            _ = stop.cancelled() => return Err(the_stopped()),
            the_item = lines.next_line() => the_item,
        };

        let the_line = match the_item {
            None => return Ok(()),
            Some(Err(err)) => return Err(err),
            Some(Ok(line)) => line,
        };

        let the_record = DecodedRecord::new(bucket, key, the_line);
        tokio::select! {
            biased;
            _ = stop.cancelled() => return Err(the_stopped()),
            the_sent = sink.send(the_record) => {
                if the_sent.is_err() {
                    return Err(IngestError::SinkClosed {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    });
                }
                *forwarded += 1;
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// 🔗 "outer: cause: root cause", the way a human would want to read it in a log.
fn error_chain(err: &IngestError) -> String {
    let mut the_message = err.to_string();
    let mut the_source = std::error::Error::source(err);
    while let Some(cause) = the_source {
        the_message.push_str(": ");
        the_message.push_str(&cause.to_string());
        the_source = cause.source();
    }
    the_message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryObjectStore;
    use std::collections::HashMap;

    fn the_store_with(keys: &[(&str, &str)]) -> Arc<InMemoryObjectStore> {
        let the_store = Arc::new(InMemoryObjectStore::new());
        for (key, body) in keys {
            the_store.insert("bucket", key, *body);
        }
        the_store
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn drain(rx: &async_channel::Receiver<DecodedRecord>) -> Vec<DecodedRecord> {
        let mut the_records = Vec::new();
        while let Ok(record) = rx.try_recv() {
            the_records.push(record);
        }
        the_records
    }

    /// ⏳ Stragglers release their bodies on their own schedule. Give them a moment.
    async fn wait_for_bodies_released(store: &InMemoryObjectStore) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.open_bodies() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("💀 bodies were still open five seconds after the batch ended");
    }

    #[test]
    fn the_one_where_zero_and_negative_mean_one() {
        assert_eq!(effective_concurrency(0), 1);
        assert_eq!(effective_concurrency(-7), 1);
        assert_eq!(effective_concurrency(1), 1);
        assert_eq!(effective_concurrency(16), 16);
    }

    #[tokio::test]
    async fn the_one_where_concurrency_zero_still_gets_everything_done_once() {
        let the_store = the_store_with(&[("a.log", "a1\na2\n"), ("b.log", "b1\n"), ("c.log", "c1\nc2\nc3")]);
        let the_coordinator = FanOutCoordinator::new(the_store.clone()).with_concurrency(0);
        assert_eq!(the_coordinator.concurrency(), 1);

        let (the_tx, the_rx) = async_channel::unbounded();
        let the_report = the_coordinator
            .run("bucket", keys(&["a.log", "b.log", "c.log"]), the_tx, CancellationToken::new())
            .await
            .expect("💀 a clean batch should not fail");

        assert_eq!(the_report.objects_total, 3);
        assert_eq!(the_report.objects_succeeded, 3);
        assert_eq!(the_report.lines_emitted, 6);
        assert_eq!(the_store.bodies_opened(), 3);
        assert_eq!(the_store.peak_open_bodies(), 1);

        let mut the_per_key: HashMap<String, Vec<String>> = HashMap::new();
        for record in drain(&the_rx) {
            assert_eq!(record.bucket, "bucket");
            the_per_key.entry(record.key).or_default().push(record.line);
        }
        // 🎯 within one key, source order survives the fan-out
        assert_eq!(the_per_key["a.log"], vec!["a1", "a2"]);
        assert_eq!(the_per_key["b.log"], vec!["b1"]);
        assert_eq!(the_per_key["c.log"], vec!["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn the_one_where_one_bad_key_does_not_spoil_the_batch() {
        let the_store = the_store_with(&[("a.log", "a1\na2\n"), ("b.log", "nope"), ("c.log", "c1\n")]);
        the_store.fail_fetch("b.log");

        let (the_tx, the_rx) = async_channel::unbounded();
        let the_report = FanOutCoordinator::new(the_store.clone())
            .with_concurrency(3)
            .run("bucket", keys(&["a.log", "b.log", "c.log"]), the_tx, CancellationToken::new())
            .await
            .expect("💀 a non-fatal fetch error took down the whole batch");

        assert_eq!(the_report.objects_succeeded, 2);
        assert_eq!(the_report.objects_failed, 1);
        assert!(!the_report.is_clean());

        let mut the_lines: Vec<String> = drain(&the_rx).into_iter().map(|r| r.line).collect();
        the_lines.sort();
        assert_eq!(the_lines, vec!["a1", "a2", "c1"]);
        wait_for_bodies_released(&the_store).await;
    }

    #[tokio::test]
    async fn the_one_where_the_fatal_policy_pulls_the_plug() {
        let the_store = the_store_with(&[("a.log", "a1\n"), ("b.log", "b1\n")]);
        the_store.fail_fetch("b.log");

        let (the_tx, _the_rx) = async_channel::unbounded();
        let the_error = FanOutCoordinator::new(the_store.clone())
            .with_concurrency(2)
            .with_fatal_policy(|err| matches!(err, IngestError::Fetch { .. }))
            .run("bucket", keys(&["a.log", "b.log"]), the_tx, CancellationToken::new())
            .await
            .expect_err("💀 a fatal error was politely ignored");

        assert!(matches!(the_error, IngestError::Fetch { .. }));
        assert_eq!(the_error.key(), Some("b.log"));
        wait_for_bodies_released(&the_store).await;
    }

    #[tokio::test]
    async fn the_one_where_too_long_lines_fail_just_their_key() {
        let the_chonk = "x".repeat(200);
        let the_store = the_store_with(&[("ok.log", "fine\n"), ("chonk.log", the_chonk.as_str())]);

        let (the_tx, the_rx) = async_channel::unbounded();
        let the_report = FanOutCoordinator::new(the_store.clone())
            .with_concurrency(2)
            .with_buffer_sizes(16, 64)
            .run("bucket", keys(&["ok.log", "chonk.log"]), the_tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(the_report.objects_succeeded, 1);
        assert_eq!(the_report.objects_failed, 1);
        assert_eq!(drain(&the_rx).len(), 1);
    }

    #[tokio::test]
    async fn the_one_where_the_bouncer_counts_heads() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        let the_body: String = (0..50).map(|n| format!("line {n}\n")).collect();
        let the_keys: Vec<String> = (0..20).map(|n| format!("obj-{n:02}.txt")).collect();
        for key in &the_keys {
            the_store.insert("bucket", key, the_body.as_str());
        }

        // 🐢 a tiny channel and a sleepy consumer keep tasks in flight long enough to overlap
        let (the_tx, the_rx) = async_channel::bounded(2);
        let the_consumer = tokio::spawn(async move {
            let mut the_count = 0u64;
            while the_rx.recv().await.is_ok() {
                the_count += 1;
                if the_count % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            the_count
        });

        let the_report = FanOutCoordinator::new(the_store.clone())
            .with_concurrency(3)
            .run("bucket", the_keys, the_tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(the_report.objects_succeeded, 20);
        assert_eq!(the_report.lines_emitted, 20 * 50);
        assert_eq!(the_consumer.await.unwrap(), 20 * 50);
        assert!(
            the_store.peak_open_bodies() <= 3,
            "peak open bodies {} exceeded the cap of 3",
            the_store.peak_open_bodies()
        );
        assert_eq!(the_store.bodies_opened(), 20);
        assert_eq!(the_store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn the_one_where_cancellation_gets_a_prompt_answer() {
        let the_store = the_store_with(&[("a.log", "1\n2\n3\n4\n"), ("b.log", "1\n2\n3\n")]);
        // 🚧 nobody reads this channel, so every task wedges on its second send
        let (the_tx, _the_rx) = async_channel::bounded(1);
        let the_cancel = CancellationToken::new();

        let the_trigger = the_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            the_trigger.cancel();
        });

        let the_result = tokio::time::timeout(
            Duration::from_secs(5),
            FanOutCoordinator::new(the_store.clone())
                .with_concurrency(2)
                .run("bucket", keys(&["a.log", "b.log"]), the_tx, the_cancel),
        )
        .await
        .expect("💀 the coordinator ignored cancellation");

        assert!(matches!(
            the_result,
            Err(IngestError::Cancelled(CancelReason::Cancelled))
        ));
        wait_for_bodies_released(&the_store).await;
    }

    #[tokio::test]
    async fn the_one_where_the_deadline_is_a_deadline() {
        let the_store = the_store_with(&[("a.log", "1\n2\n3\n")]);
        let (the_tx, _the_rx) = async_channel::bounded(1);

        let the_result = FanOutCoordinator::new(the_store.clone())
            .with_deadline(Some(Duration::from_millis(50)))
            .run("bucket", keys(&["a.log"]), the_tx, CancellationToken::new())
            .await;

        assert!(matches!(
            the_result,
            Err(IngestError::Cancelled(CancelReason::DeadlineExceeded))
        ));
        wait_for_bodies_released(&the_store).await;
    }

    #[tokio::test]
    async fn the_one_where_the_consumer_hangs_up() {
        let the_store = the_store_with(&[("a.log", "1\n"), ("empty.log", "")]);
        let (the_tx, the_rx) = async_channel::unbounded();
        drop(the_rx);

        let the_report = FanOutCoordinator::new(the_store.clone())
            .with_concurrency(2)
            .run("bucket", keys(&["a.log", "empty.log"]), the_tx, CancellationToken::new())
            .await
            .unwrap();

        // 🚪 the empty object never needed the sink, so it still counts as a success
        assert_eq!(the_report.objects_succeeded, 1);
        assert_eq!(the_report.objects_failed, 1);
        assert_eq!(the_report.lines_emitted, 0);
    }

    #[tokio::test]
    async fn the_one_where_no_keys_means_no_work() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        let (the_tx, _the_rx) = async_channel::unbounded();
        let the_report = FanOutCoordinator::new(the_store.clone())
            .run("bucket", Vec::new(), the_tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(the_report, BatchReport::default());
        assert_eq!(the_store.bodies_opened(), 0);
    }
}
