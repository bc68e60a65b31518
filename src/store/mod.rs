pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Logical key layout on the shared store
pub mod keys {
    use crate::types::WorkerId;

    /// Set of known queue names
    pub const QUEUES: &str = "queues";

    /// Set of registered worker identities
    pub const WORKERS: &str = "workers";

    /// List of failure records
    pub const FAILED: &str = "failed";

    /// List holding one queue's pending payloads
    pub fn queue(name: &str) -> String {
        format!("queue:{name}")
    }

    /// Per-job status key
    pub fn status(job_id: &str) -> String {
        format!("job:{job_id}:status")
    }

    /// Global counter key
    pub fn stat(name: &str) -> String {
        format!("stat:{name}")
    }

    /// Per-worker counter key
    pub fn worker_stat(name: &str, worker: &WorkerId) -> String {
        format!("stat:{name}:{worker}")
    }

    /// Current-job marker for one worker
    pub fn worker_job(id: &WorkerId) -> String {
        format!("worker:{id}:job")
    }

    /// Registration timestamp for one worker
    pub fn worker_started(id: &WorkerId) -> String {
        format!("worker:{id}:started")
    }
}

/// Abstract capability required from the shared store.
///
/// The engine only needs list push/pop with a bounded blocking variant,
/// plus plain key, set and counter primitives; connection pooling, auth
/// and clustering belong to the concrete client behind this trait.
/// `push` implementations must also register the queue name in the
/// [`keys::QUEUES`] set.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append a serialized payload to the tail of the named queue
    async fn push(&self, queue: &str, payload: &str) -> Result<()>;

    /// Non-blocking pop from the head of one queue
    async fn pop(&self, queue: &str) -> Result<Option<String>>;

    /// First available payload from any of the given queues.
    ///
    /// A zero timeout performs a single non-blocking pass in listed
    /// order; otherwise the call blocks once across the queue set up to
    /// the timeout. Expiry yields `Ok(None)`, never an error.
    async fn blocking_pop(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>>;

    /// Number of pending payloads in one queue
    async fn size(&self, queue: &str) -> Result<u64>;

    /// All known queue names
    async fn queue_names(&self) -> Result<Vec<String>>;

    /// Drop a queue and its pending payloads
    async fn remove_queue(&self, queue: &str) -> Result<()>;

    /// Read a plain key
    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Write a plain key (last-write-wins)
    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Write a plain key with a bounded lifetime
    async fn write_expiring(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete a plain key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether a plain key currently exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Add a member to a set
    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from a set
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    /// All members of a set
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Increment a counter, returning the new value
    async fn incr(&self, key: &str) -> Result<u64>;

    /// Current counter value (0 when absent)
    async fn counter(&self, key: &str) -> Result<u64>;

    /// Reset a counter
    async fn clear_counter(&self, key: &str) -> Result<()>;

    /// Append to an arbitrary list key (append-only sinks)
    async fn list_append(&self, key: &str, value: &str) -> Result<()>;

    /// Length of an arbitrary list key
    async fn list_len(&self, key: &str) -> Result<u64>;

    /// Snapshot of an arbitrary list key
    async fn list_items(&self, key: &str) -> Result<Vec<String>>;

    /// Drop an arbitrary list key and its contents
    async fn list_clear(&self, key: &str) -> Result<()>;
}
