//! 🌊 LineStreamer — one object in, lines out, lazily.
//!
//! Nothing happens until the first `next_line()`: that's when the object is fetched,
//! decoded, and handed to the scanner. After that it's one line per call, in source
//! order, until the object runs dry or something breaks. An error ends the stream;
//! there is exactly one of them at most, and it is always the last thing you see.
//!
//! 🔒 Resource discipline is ownership: the fetched body lives inside the decoded stream,
//! which lives inside the scanner, which lives inside this struct. Dropping the stream at
//! any point — finished, failed, or abandoned halfway — closes everything.

use std::sync::Arc;

use futures::Stream;
use tracing::{debug, error, info};

use crate::backends::ObjectStore;
use crate::decoder::{self, CorruptStream, DecodedStream};
use crate::error::IngestError;
use crate::scanner::{LineScanner, ScanError};

enum StreamState {
    /// 💤 not fetched yet
    Pending,
    Scanning(LineScanner<DecodedStream>),
    /// 🏁 exhausted or failed
    Done,
}

/// 🌊 A lazy, single-pass, non-restartable sequence of lines from one object.
pub struct LineStream<S: ObjectStore + ?Sized> {
    store: Arc<S>,
    bucket: String,
    key: String,
    initial_buffer_size: usize,
    max_buffer_size: usize,
    state: StreamState,
    lines_emitted: u64,
}

impl<S: ObjectStore + ?Sized> std::fmt::Debug for LineStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let the_state = match self.state {
            StreamState::Pending => "Pending",
            StreamState::Scanning(_) => "Scanning",
            StreamState::Done => "Done",
        };
        f.debug_struct("LineStream")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("state", &the_state)
            .field("lines_emitted", &self.lines_emitted)
            .finish()
    }
}

/// 🚀 Start streaming `bucket/key`. Nothing is fetched until the first line is asked for.
pub fn stream<S: ObjectStore + ?Sized>(
    store: Arc<S>,
    bucket: impl Into<String>,
    key: impl Into<String>,
    initial_buffer_size: usize,
    max_buffer_size: usize,
) -> LineStream<S> {
    LineStream {
        store,
        bucket: bucket.into(),
        key: key.into(),
        initial_buffer_size,
        max_buffer_size,
        state: StreamState::Pending,
        lines_emitted: 0,
    }
}

impl<S: ObjectStore + ?Sized> LineStream<S> {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 📊 Lines handed out so far.
    pub fn lines_emitted(&self) -> u64 {
        self.lines_emitted
    }

    /// 📄 The next line, an error, or `None` when the object is done.
    ///
    /// After `None` or an error, every later call returns `None`.
    pub async fn next_line(&mut self) -> Option<Result<String, IngestError>> {
        if matches!(self.state, StreamState::Pending) {
            // 🔒 owned copies only: a `&self` held across the fetch would make this future !Send
            let the_opening = open(
                self.store.clone(),
                self.bucket.clone(),
                self.key.clone(),
                self.initial_buffer_size,
                self.max_buffer_size,
            );
            match the_opening.await {
                Ok(scanner) => self.state = StreamState::Scanning(scanner),
                Err(err) => {
                    self.state = StreamState::Done;
                    return Some(Err(err));
                }
            }
        }

        let StreamState::Scanning(scanner) = &mut self.state else {
            return None;
        };

        match scanner.next_line().await {
            Ok(Some(line)) => {
                self.lines_emitted += 1;
                Some(Ok(line))
            }
            Ok(None) => {
                // 🔒 drop the scanner (and with it the body) right now, not whenever we're dropped
                self.state = StreamState::Done;
                info!(
                    "✅ Completed processing s3://{}/{} ({} lines)",
                    self.bucket, self.key, self.lines_emitted
                );
                None
            }
            Err(err) => {
                self.state = StreamState::Done;
                Some(Err(self.classify(err)))
            }
        }
    }

    /// 🔄 Turn this into a `futures::Stream`, for the combinator-inclined.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, IngestError>> + Send
    where
        S: 'static,
    {
        futures::stream::unfold(self, |mut the_stream| async move {
            the_stream
                .next_line()
                .await
                .map(|the_item| (the_item, the_stream))
        })
    }

    fn classify(&self, err: ScanError) -> IngestError {
        match err {
            ScanError::TooLong { limit } => {
                error!(
                    "📏 encountered a line that was too long to read in file s3://{}/{}, exceeds > {} bytes",
                    self.bucket, self.key, limit
                );
                IngestError::LineTooLong {
                    bucket: self.bucket.clone(),
                    key: self.key.clone(),
                    max_buffer_size: limit,
                }
            }
            ScanError::Io(source) => classify_io(&self.bucket, &self.key, source),
        }
    }
}

/// 🪣 Fetch, decode, and hand the bytes to a fresh scanner.
async fn open<S: ObjectStore + ?Sized>(
    store: Arc<S>,
    bucket: String,
    key: String,
    initial_buffer_size: usize,
    max_buffer_size: usize,
) -> Result<LineScanner<DecodedStream>, IngestError> {
    info!("🌊 Started processing file s3://{}/{}", bucket, key);

    let the_fetched = store.get_object(&bucket, &key).await;
    let the_object = match the_fetched {
        Ok(object) => object,
        Err(source) => {
            return Err(IngestError::Fetch {
                bucket,
                key,
                source: source.into(),
            });
        }
    };

    if let Some(content_type) = the_object.content_type.as_deref() {
        debug!(
            "🧾 s3://{}/{} declares content-type {:?} (binary: {})",
            bucket,
            key,
            content_type,
            decoder::is_binary_content_type(content_type)
        );
    }

    // 📡 buffering a gzip body reads the wire; a failure there is the transport, not the codec
    let the_decoded = decoder::decode(&key, the_object.body)
        .await
        .map_err(|source| classify_io(&bucket, &key, source))?;

    Ok(LineScanner::new(
        the_decoded,
        initial_buffer_size,
        max_buffer_size,
    ))
}

/// Corrupt compressed data is a decode error. Any other read failure is a scan error.
fn classify_io(bucket: &str, key: &str, source: std::io::Error) -> IngestError {
    if CorruptStream::is_corrupt(&source) {
        IngestError::Decode {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        }
    } else {
        IngestError::Scan {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryObjectStore;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use futures::StreamExt;
    use std::io::Write;

    async fn drain<S: ObjectStore + ?Sized>(
        mut stream: LineStream<S>,
    ) -> (Vec<String>, Option<IngestError>) {
        let mut the_lines = Vec::new();
        while let Some(item) = stream.next_line().await {
            match item {
                Ok(line) => the_lines.push(line),
                Err(err) => {
                    assert!(stream.next_line().await.is_none(), "an error must be the last item");
                    return (the_lines, Some(err));
                }
            }
        }
        (the_lines, None)
    }

    fn gzip(payload: &[u8]) -> Vec<u8> {
        let mut the_encoder = GzEncoder::new(Vec::new(), Compression::fast());
        the_encoder.write_all(payload).unwrap();
        the_encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn the_one_where_a_single_line_file_yields_a_single_line() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        the_store.insert("bucket", "single-line-file.txt", "single line");

        let the_stream = stream(the_store.clone(), "bucket", "single-line-file.txt", 64, 1024);
        let (the_lines, the_error) = drain(the_stream).await;

        assert_eq!(the_lines, vec!["single line"]);
        assert!(the_error.is_none());
        assert_eq!(the_store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn the_one_where_nothing_happens_until_someone_asks() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        the_store.insert("bucket", "lazy.txt", "zzz");

        let the_stream = stream(the_store.clone(), "bucket", "lazy.txt", 64, 1024);
        assert_eq!(the_store.bodies_opened(), 0);
        drop(the_stream);
        assert_eq!(the_store.bodies_opened(), 0);
    }

    #[tokio::test]
    async fn the_one_where_gzip_and_mislabeled_gzip_read_the_same() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        let the_text = b"alpha\nbeta\ngamma\n";
        the_store.insert("bucket", "real.log.gz", gzip(the_text));
        the_store.insert("bucket", "inflated.log.gz", the_text.to_vec());

        for key in ["real.log.gz", "inflated.log.gz"] {
            let (the_lines, the_error) =
                drain(stream(the_store.clone(), "bucket", key, 16, 1024)).await;
            assert!(the_error.is_none(), "{key} should stream cleanly");
            assert_eq!(the_lines, vec!["alpha", "beta", "gamma"]);
        }
        assert_eq!(the_store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn the_one_where_a_fetch_failure_is_the_only_item() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        the_store.insert("bucket", "cursed.txt", "never seen");
        the_store.fail_fetch("cursed.txt");

        let (the_lines, the_error) =
            drain(stream(the_store.clone(), "bucket", "cursed.txt", 64, 1024)).await;

        assert!(the_lines.is_empty());
        assert!(matches!(the_error, Some(IngestError::Fetch { .. })));
    }

    #[tokio::test]
    async fn the_one_where_a_chonky_line_is_called_out_by_name() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        let the_payload = format!("fine\n{}\nunreachable\n", "x".repeat(100));
        the_store.insert("bucket", "chonky.txt", the_payload);

        let (the_lines, the_error) =
            drain(stream(the_store.clone(), "bucket", "chonky.txt", 8, 64)).await;

        assert_eq!(the_lines, vec!["fine"]);
        let the_error = the_error.expect("💀 a 100-byte line slipped under a 64-byte ceiling");
        assert!(the_error.is_line_too_long());
        assert_eq!(the_error.key(), Some("chonky.txt"));
        assert_eq!(the_store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn the_one_where_corrupt_gzip_is_a_decode_error_not_a_scan_error() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        let mut the_mangled = gzip(b"this text will be thoroughly destroyed by the test");
        let the_end = the_mangled.len() - 8;
        for byte in &mut the_mangled[10..the_end] {
            *byte = 0xff;
        }
        the_store.insert("bucket", "broken.gz", the_mangled);

        let (_, the_error) = drain(stream(the_store.clone(), "bucket", "broken.gz", 64, 1024)).await;
        assert!(matches!(the_error, Some(IngestError::Decode { .. })));
    }

    #[tokio::test]
    async fn the_one_where_the_connection_drops_mid_read() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        the_store.insert("bucket", "flaky.txt", "first\nsecond\nthird\n");
        the_store.fail_body_after("flaky.txt", 10);

        let (the_lines, the_error) =
            drain(stream(the_store.clone(), "bucket", "flaky.txt", 64, 1024)).await;

        assert_eq!(the_lines, vec!["first"]);
        let the_error = the_error.expect("💀 the reset connection went unnoticed");
        assert!(
            matches!(the_error, IngestError::Scan { .. }),
            "expected a scan error, got {the_error:?}"
        );
        assert_eq!(the_error.key(), Some("flaky.txt"));
        assert_eq!(the_store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn the_one_where_a_dropped_gzip_download_is_not_blamed_on_gzip() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        the_store.insert_with_content_type(
            "bucket",
            "flaky.log.gz",
            gzip(b"one\ntwo\nthree\n"),
            Some("application/gzip"),
        );
        the_store.fail_body_after("flaky.log.gz", 5);

        let (the_lines, the_error) =
            drain(stream(the_store.clone(), "bucket", "flaky.log.gz", 64, 1024)).await;

        assert!(the_lines.is_empty());
        let the_error = the_error.expect("💀 a half-downloaded gzip body streamed cleanly");
        assert!(
            matches!(the_error, IngestError::Scan { .. }),
            "a transport failure is not a decode failure, got {the_error:?}"
        );
        assert_eq!(the_store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn the_one_where_walking_away_early_still_closes_the_body() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        the_store.insert("bucket", "long.txt", "1\n2\n3\n4\n5\n");

        let mut the_stream = stream(the_store.clone(), "bucket", "long.txt", 64, 1024);
        assert_eq!(the_stream.next_line().await.unwrap().unwrap(), "1");
        assert_eq!(the_store.open_bodies(), 1);

        drop(the_stream);
        assert_eq!(the_store.open_bodies(), 0);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn the_one_where_a_stream_hops_onto_another_task() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        the_store.insert("bucket", "hop.txt", "here\nthere\n");
        let the_dyn_store: Arc<dyn ObjectStore> = the_store.clone();

        let mut the_stream = stream(the_dyn_store, "bucket", "hop.txt", 64, 1024);
        assert_send(&the_stream.next_line());

        let (the_lines, the_error) = tokio::spawn(drain(the_stream))
            .await
            .expect("💀 the spawned stream panicked");
        assert_eq!(the_lines, vec!["here", "there"]);
        assert!(the_error.is_none());
        assert_eq!(the_store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn the_one_where_it_also_speaks_futures_stream() {
        let the_store = Arc::new(InMemoryObjectStore::new());
        the_store.insert("bucket", "s.txt", "a\nb\n");

        let the_lines: Vec<String> = stream(the_store, "bucket", "s.txt", 64, 1024)
            .into_stream()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(the_lines, vec!["a", "b"]);
    }
}
