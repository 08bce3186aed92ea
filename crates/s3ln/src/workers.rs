//! 🧵 Workers: the ones who actually do the work while the Supervisor takes the credit.
//!
//! ⚠️ "If you're reading this, the code review went poorly."

use anyhow::Result;
use tokio::task::JoinHandle;

mod sink_worker;
pub(crate) use sink_worker::SinkWorker;

/// 🏗️ A background worker. `start` hands back the JoinHandle because we trust, but verify.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}
