use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::store::{keys, QueueStore};
use crate::types::{JobStatus, StatusEntry};

/// Persists coarse per-job status on the shared store.
///
/// Tracking is opt-in at enqueue time: only jobs created through
/// [`create`](Self::create) have a status key, and [`set`](Self::set)
/// silently ignores ids that were never created. Terminal entries are
/// written with a retention TTL so the store does not accumulate a key
/// per finished job forever.
pub struct StatusTracker {
    store: Arc<dyn QueueStore>,
    terminal_ttl: Duration,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn QueueStore>, terminal_ttl: Duration) -> Self {
        Self {
            store,
            terminal_ttl,
        }
    }

    /// Start tracking a job as `Waiting`
    pub async fn create(&self, job_id: &str) -> Result<()> {
        let entry = StatusEntry::now(JobStatus::Waiting);
        self.store
            .write(&keys::status(job_id), &serde_json::to_string(&entry)?)
            .await
    }

    /// Move a tracked job to `status`; no-op for untracked ids.
    ///
    /// Non-terminal statuses persist until overwritten; `Failed` and
    /// `Completed` expire after the configured retention TTL.
    pub async fn set(&self, job_id: &str, status: JobStatus) -> Result<()> {
        let key = keys::status(job_id);
        if !self.store.exists(&key).await? {
            return Ok(());
        }
        debug!(job_id, status = status.name(), "status update");
        let entry = StatusEntry::now(status);
        let json = serde_json::to_string(&entry)?;
        if status.is_terminal() {
            self.store
                .write_expiring(&key, &json, self.terminal_ttl)
                .await
        } else {
            self.store.write(&key, &json).await
        }
    }

    /// Whether a status key currently exists for this id
    pub async fn is_tracking(&self, job_id: &str) -> Result<bool> {
        self.store.exists(&keys::status(job_id)).await
    }

    /// Current status of a job; `None` when untracked or expired
    pub async fn get(&self, job_id: &str) -> Result<Option<StatusEntry>> {
        match self.store.read(&keys::status(job_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Drop a job's status key
    pub async fn remove(&self, job_id: &str) -> Result<()> {
        self.store.delete(&keys::status(job_id)).await
    }
}
