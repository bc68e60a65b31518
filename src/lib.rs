//! # barq: Store-Backed Background Job Processing
//!
//! **Queue-per-priority job engine with supervised, isolated execution**
//!
//! barq moves work out of request paths and into background workers that
//! share nothing but a store:
//!
//! - **Pluggable store**: queues, statuses, counters and worker
//!   registrations all live behind one [`QueueStore`] trait; the bundled
//!   [`MemoryStore`](store::memory::MemoryStore) covers tests and
//!   single-process setups
//! - **Isolated execution**: every job runs in its own supervised task,
//!   so a panicking performer becomes a failure record instead of a dead
//!   worker
//! - **Ordered lifecycle listeners**: eight hook points fire
//!   synchronously and in registration order, with a skip signal for
//!   dropping jobs before they run
//! - **Opt-in status tracking**: monitored jobs expose
//!   waiting/running/failed/completed with bounded retention
//! - **Pluggable failure sink**: permanent failures are durable records,
//!   swappable at runtime
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use barq::prelude::*;
//!
//! struct SendEmail {
//!     to: String,
//! }
//!
//! #[async_trait]
//! impl Performer for SendEmail {
//!     async fn perform(&mut self, _ctx: &JobContext) -> Result<(), PerformError> {
//!         println!("mailing {}", self.to);
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo() -> barq::Result<()> {
//! let engine = Engine::new(Arc::new(MemoryStore::new()));
//! engine.registry().register(
//!     "SendEmail",
//!     Arc::new(|payload: &JobPayload| {
//!         let to = payload.args.first()
//!             .and_then(|v| v.as_str())
//!             .ok_or("missing recipient")?
//!             .to_string();
//!         Ok(Box::new(SendEmail { to }) as Box<dyn Performer>)
//!     }),
//! )?;
//!
//! engine.enqueue("email", "SendEmail", vec!["a@b.c".into()]).await?;
//!
//! let worker = Worker::new(engine.clone(), vec!["email".to_string()]);
//! let signals = worker.signal_handle();
//! let running = tokio::spawn(worker.work());
//!
//! tokio::time::sleep(Duration::from_secs(1)).await;
//! signals.shutdown();
//! running.await.expect("worker task")?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod events;
pub mod failure;
pub mod job;
pub mod registry;
pub mod status;
pub mod store;
pub mod types;
pub mod worker;

pub use engine::{Engine, EngineConfig};
pub use error::{Error, PerformError, Result};
pub use events::{
    EventBus, HookArgs, HookEvent, HookFlow, HookFut, InstanceSlot, Listener, ListenerId,
};
pub use failure::{FailureBackend, FailureRecord, LogFailureBackend, StoreFailureBackend};
pub use job::{Job, JobOutcome};
pub use registry::{JobContext, Performer, PerformerFactory, PerformerRegistry};
pub use status::StatusTracker;
pub use store::{memory::MemoryStore, QueueStore};
pub use types::{JobPayload, JobStatus, StatusEntry, WorkerId};
pub use worker::{prune_dead_workers, SignalHandle, Worker, WorkerConfig, WorkerSignal, WorkingOn};

/// Everything a producer or worker process typically imports
pub mod prelude {
    pub use crate::{
        Engine, Error, HookEvent, HookFlow, Job, JobContext, JobOutcome, JobPayload, JobStatus,
        MemoryStore, PerformError, Performer, QueueStore, Worker, WorkerConfig,
    };

    pub use async_trait::async_trait;
}
