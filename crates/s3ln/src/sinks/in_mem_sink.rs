//! 📦 InMemorySink — a sink that never forgets.
//!
//! Records pile up behind an `Arc<Mutex<Vec<...>>>` so tests can hand the sink off to a
//! worker and still peek at what arrived afterwards. Clone it, keep the clone, assert.
//!
//! ⚠️ For tests. If you're deploying this to prod, please also deploy a therapist.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::common::DecodedRecord;
use crate::sinks::Sink;

#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    received: Arc<Mutex<Vec<DecodedRecord>>>,
    closed: Arc<Mutex<bool>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📋 Everything received so far, in arrival order.
    pub async fn records(&self) -> Vec<DecodedRecord> {
        self.received.lock().await.clone()
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.lock().await
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn receive(&mut self, record: DecodedRecord) -> Result<u64> {
        let the_cost = record.line.len() as u64 + 1;
        self.received.lock().await.push(record);
        Ok(the_cost)
    }

    async fn close(&mut self) -> Result<()> {
        // 🗑️ nothing to flush, we live in RAM
        *self.closed.lock().await = true;
        Ok(())
    }
}
