//! 📦 Common data structures — the things that actually travel through the pipeline.
//!
//! 🧠 Knowledge graph:
//! - `DecodedRecord`: one line, plus where it came from and when we saw it. Created by
//!   the per-key task, consumed exactly once by whoever reads the output channel.
//! - `BatchReport`: the tally at the end of a run. Per-key failures are counted here
//!   instead of blowing up the batch.
//!
//! Lines from one object keep their order. Lines from different objects interleave
//! however the scheduler feels that day.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 📄 One line of decoded text and its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedRecord {
    pub bucket: String,
    pub key: String,
    pub line: String,
    /// ⏰ when the line was captured, not when the object was written
    pub captured_at: DateTime<Utc>,
}

impl DecodedRecord {
    /// 🏗️ Stamp a line with its origin and the current time.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, line: String) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            line,
            captured_at: Utc::now(),
        }
    }
}

/// 📊 How a batch went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Keys handed to the coordinator.
    pub objects_total: usize,
    /// Keys that were streamed to the end without an error.
    pub objects_succeeded: usize,
    /// Keys that stopped on an error (or never reported back).
    pub objects_failed: usize,
    /// Lines forwarded to the sink, across every key, including partial keys.
    pub lines_emitted: u64,
}

impl BatchReport {
    pub(crate) fn new(objects_total: usize) -> Self {
        Self {
            objects_total,
            ..Default::default()
        }
    }

    /// ✅ True when no key failed.
    pub fn is_clean(&self) -> bool {
        self.objects_failed == 0
    }
}
