//! 💀 Errors — the taxonomy of everything that can go sideways between a bucket and a line.
//!
//! 🧠 Knowledge graph:
//! - `IngestError`: the library-facing error. Every variant names the bucket and key
//!   (or pattern) it happened to, because "error: error" is not a bug report.
//! - Per-key variants (`Fetch`, `Decode`, `LineTooLong`, `Scan`, `SinkClosed`) are scoped
//!   to one object. The coordinator logs them and asks the fatal policy what to do.
//! - Batch-level variants (`Listing`, `Cancelled`) end the whole invocation.
//! - SDK and backend failures arrive as `anyhow::Error` and get boxed into `BoxError`
//!   so they can sit behind `#[source]` like proper citizens.
//!
//! 🦆 The duck has been informed of all possible failure modes. The duck is unbothered.

use std::fmt;
use std::io;

/// 📦 A boxed, thread-safe error. anyhow::Error converts into this for free.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 🛑 Why a batch stopped before every key reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Someone pressed the big red button (ctrl-c, a parent task, a test).
    Cancelled,
    /// The batch deadline came and went.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "cancelled"),
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// 💀 Everything that can go wrong while listing, fetching, decoding and scanning objects.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 📡 Paging the bucket failed. Nothing accumulated so far survives.
    #[error("error listing files from s3 bucket '{bucket}' with pattern '{pattern}'")]
    Listing {
        bucket: String,
        pattern: String,
        #[source]
        source: BoxError,
    },

    /// 🪣 Could not get the object's bytes.
    #[error("failed to fetch s3://{bucket}/{key}")]
    Fetch {
        bucket: String,
        key: String,
        #[source]
        source: BoxError,
    },

    /// 🫁 Compressed content that is corrupt (and not the mislabeled-gzip case).
    #[error("failed to decode s3://{bucket}/{key}")]
    Decode {
        bucket: String,
        key: String,
        #[source]
        source: io::Error,
    },

    /// 📏 One line outgrew the configured ceiling before a newline showed up.
    #[error(
        "encountered a line that was too long to read in s3://{bucket}/{key}, exceeds > {max_buffer_size} bytes"
    )]
    LineTooLong {
        bucket: String,
        key: String,
        max_buffer_size: usize,
    },

    /// 🐛 Any other tokenization failure, usually the stream dying mid-read.
    #[error("failed to scan s3://{bucket}/{key}")]
    Scan {
        bucket: String,
        key: String,
        #[source]
        source: io::Error,
    },

    /// 🚪 The consumer hung up on the output channel while we were still talking.
    #[error("output sink closed while emitting lines from s3://{bucket}/{key}")]
    SinkClosed { bucket: String, key: String },

    /// 🛑 The batch stopped early.
    #[error("batch {0}")]
    Cancelled(CancelReason),
}

impl IngestError {
    /// 📏 True for the distinguished too-long error, so callers can single it out.
    pub fn is_line_too_long(&self) -> bool {
        matches!(self, IngestError::LineTooLong { .. })
    }

    /// 🛑 True when the batch was stopped from the outside.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, IngestError::Cancelled(_))
    }

    /// 🗝️ The object key this error is scoped to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            IngestError::Fetch { key, .. }
            | IngestError::Decode { key, .. }
            | IngestError::LineTooLong { key, .. }
            | IngestError::Scan { key, .. }
            | IngestError::SinkClosed { key, .. } => Some(key),
            IngestError::Listing { .. } | IngestError::Cancelled(_) => None,
        }
    }
}
