//! 🫁 Content decoding — turning whatever S3 handed us into bytes worth scanning.
//!
//! 🎬 COLD OPEN — INT. DATA LAKE — 2:14 AM
//!
//! The object was named `app.log.gz`. The content-type said `text/plain`. The bytes
//! said `2024-01-01 INFO started`. Three witnesses, three stories. We believe the name,
//! we double-check the bytes, and we ignore the content-type entirely.
//!
//! 🧠 Knowledge graph:
//! - Strategy is picked from the lower-cased extension ONLY: `.gz`/`.gzip` → gzip,
//!   `.tar` → tar, anything else → passthrough.
//! - Gzip buffers the whole body, then sniffs the magic bytes. No gzip header means some
//!   transport already inflated it for us (hello, `Content-Encoding: gzip`), so the
//!   buffered bytes are served as plain content. A real header followed by garbage is a
//!   decode error, surfaced on read and tagged with [`CorruptStream`].
//! - Tar hands the archive bytes through untouched. Entries are not enumerated.
//! - `is_binary_content_type()` is informational. It never picks a strategy.

use std::io::{self, Cursor, Read};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use flate2::read::MultiGzDecoder;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tracing::debug;

use crate::backends::ObjectBody;

// 🫁 ID1, ID2, CM=deflate — the only gzip flavor that has ever existed in the wild
const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// 🎭 How an object's bytes get turned into scannable bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    Passthrough,
    Gzip,
    Tar,
}

impl DecodeStrategy {
    /// 🏷️ Pick a strategy from the object name. Case-insensitive on the extension.
    pub fn for_object(name: &str) -> Self {
        let the_extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match the_extension.as_deref() {
            Some("gz") | Some("gzip") => DecodeStrategy::Gzip,
            Some("tar") => DecodeStrategy::Tar,
            _ => DecodeStrategy::Passthrough,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeStrategy::Passthrough => "passthrough",
            DecodeStrategy::Gzip => "gzip",
            DecodeStrategy::Tar => "tar",
        }
    }
}

/// 🧾 True for media types that are known binary payloads.
///
/// Parameters (`; charset=...`) are ignored and the comparison is case-insensitive.
/// Unparseable input is "not binary". This never influences decoding.
pub fn is_binary_content_type(content_type: &str) -> bool {
    let the_media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    matches!(
        the_media_type.as_str(),
        "application/octet-stream" | "application/gzip" | "application/x-tar" | "application/tar+gzip"
    )
}

/// 💀 Marker wrapped around read errors coming out of the gzip decoder.
///
/// The scanner only sees `io::Error`; this lets the streamer tell "the gzip stream is
/// corrupt" apart from "the network fell over" after the fact.
#[derive(Debug, thiserror::Error)]
#[error("corrupt compressed stream: {source}")]
pub struct CorruptStream {
    #[source]
    source: io::Error,
}

impl CorruptStream {
    /// 🔍 Was this io::Error raised by a corrupt compressed stream?
    pub fn is_corrupt(err: &io::Error) -> bool {
        err.get_ref()
            .is_some_and(|inner| inner.is::<CorruptStream>())
    }
}

/// 📦 A decoded byte stream, ready for the line scanner.
///
/// Dropping it drops the underlying object body, which releases the connection.
pub enum DecodedStream {
    /// Raw object body, bytes as they come off the wire (plain objects and tar archives).
    Passthrough(ObjectBody),
    /// A buffered body served as-is (the mislabeled gzip fallback).
    Buffered(Cursor<Vec<u8>>),
    /// A buffered gzip body inflated on read. Multi-member streams are concatenated.
    Gzip(MultiGzDecoder<Cursor<Vec<u8>>>),
}

impl std::fmt::Debug for DecodedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 trait objects don't Debug, and nobody wants to read a deflate window anyway
        let the_kind = match self {
            DecodedStream::Passthrough(_) => "Passthrough",
            DecodedStream::Buffered(_) => "Buffered",
            DecodedStream::Gzip(_) => "Gzip",
        };
        f.debug_tuple("DecodedStream").field(&the_kind).finish()
    }
}

impl AsyncRead for DecodedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DecodedStream::Passthrough(body) => Pin::new(body).poll_read(cx, buf),
            DecodedStream::Buffered(cursor) => Pin::new(cursor).poll_read(cx, buf),
            DecodedStream::Gzip(decoder) => {
                // 🧠 everything is already in memory, so inflating never waits on I/O.
                // It's CPU work dressed up as a read. Always Ready.
                let the_slots = buf.initialize_unfilled();
                match decoder.read(the_slots) {
                    Ok(n) => {
                        buf.advance(n);
                        Poll::Ready(Ok(()))
                    }
                    Err(source) => Poll::Ready(Err(io::Error::new(
                        source.kind(),
                        CorruptStream { source },
                    ))),
                }
            }
        }
    }
}

/// 🚀 Decode an object body according to its name.
///
/// Only the gzip path can fail here, and only while buffering the body, so an error from
/// this function is always the body's own read failure. Corruption past a valid header
/// shows up later, when the stream is read, tagged with [`CorruptStream`].
pub async fn decode(name: &str, body: ObjectBody) -> io::Result<DecodedStream> {
    let the_strategy = DecodeStrategy::for_object(name);
    debug!("🫁 decoding {} with the {} strategy", name, the_strategy.as_str());

    match the_strategy {
        DecodeStrategy::Passthrough | DecodeStrategy::Tar => Ok(DecodedStream::Passthrough(body)),
        DecodeStrategy::Gzip => decode_gzip(name, body).await,
    }
}

async fn decode_gzip(name: &str, mut body: ObjectBody) -> io::Result<DecodedStream> {
    // 📦 read the whole thing — sniffing a header on a live socket is a trust exercise we skip
    let mut the_bytes = Vec::new();
    body.read_to_end(&mut the_bytes).await?;
    drop(body);

    if has_gzip_magic(&the_bytes) {
        return Ok(DecodedStream::Gzip(MultiGzDecoder::new(Cursor::new(the_bytes))));
    }

    // 🔄 named like gzip, shaped like plain text. Some transport inflated it already.
    debug!(
        "🫁 {} has no gzip header ({} bytes), serving it as already-decompressed content",
        name,
        the_bytes.len()
    );
    Ok(DecodedStream::Buffered(Cursor::new(the_bytes)))
}

/// True when the available prefix agrees with the gzip magic. Empty input has no header.
fn has_gzip_magic(bytes: &[u8]) -> bool {
    let the_len = bytes.len().min(GZIP_MAGIC.len());
    the_len > 0 && bytes[..the_len] == GZIP_MAGIC[..the_len]
}
