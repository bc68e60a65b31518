use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::store::{keys, QueueStore};
use crate::types::{JobPayload, WorkerId};

/// Durable record of one permanent job failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failed_at: DateTime<Utc>,
    pub payload: JobPayload,
    pub queue: String,
    /// Identity of the worker that ran the job, if any
    pub worker: Option<String>,
    /// Error class name
    pub exception: String,
    /// Error message
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

impl FailureRecord {
    pub fn new(
        payload: JobPayload,
        queue: impl Into<String>,
        worker: Option<&WorkerId>,
        err: &Error,
    ) -> Self {
        Self {
            failed_at: Utc::now(),
            payload,
            queue: queue.into(),
            worker: worker.map(|w| w.as_str().to_string()),
            exception: err.kind().to_string(),
            error: err.to_string(),
            backtrace: err.backtrace_info().map(str::to_string),
        }
    }
}

/// Pluggable sink for permanent failures.
///
/// `record` must not propagate its own errors into the job lifecycle: a
/// broken sink is logged, and the job still counts as failed.
#[async_trait]
pub trait FailureBackend: Send + Sync {
    /// Persist one failure; infallible from the caller's view
    async fn record(&self, record: FailureRecord);

    /// Number of recorded failures
    async fn count(&self) -> Result<u64>;

    /// Snapshot of recorded failures, oldest first
    async fn all(&self) -> Result<Vec<FailureRecord>>;

    /// Drop every recorded failure
    async fn clear(&self) -> Result<()>;
}

/// Default backend: appends JSON records to the shared `failed` list
pub struct StoreFailureBackend {
    store: Arc<dyn QueueStore>,
}

impl StoreFailureBackend {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl FailureBackend for StoreFailureBackend {
    async fn record(&self, record: FailureRecord) {
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failure record not serializable");
                return;
            }
        };
        if let Err(e) = self.store.list_append(keys::FAILED, &json).await {
            error!(error = %e, "could not persist failure record");
        }
    }

    async fn count(&self) -> Result<u64> {
        self.store.list_len(keys::FAILED).await
    }

    async fn all(&self) -> Result<Vec<FailureRecord>> {
        let mut records = Vec::new();
        for raw in self.store.list_items(keys::FAILED).await? {
            match serde_json::from_str(&raw) {
                Ok(record) => records.push(record),
                // Skip entries written by other tooling rather than
                // failing the whole listing.
                Err(e) => warn!(error = %e, "skipping unreadable failure record"),
            }
        }
        Ok(records)
    }

    async fn clear(&self) -> Result<()> {
        self.store.list_clear(keys::FAILED).await
    }
}

/// Backend that only emits a structured log line per failure
#[derive(Default)]
pub struct LogFailureBackend;

#[async_trait]
impl FailureBackend for LogFailureBackend {
    async fn record(&self, record: FailureRecord) {
        error!(
            queue = %record.queue,
            type_id = %record.payload.type_id,
            exception = %record.exception,
            error = %record.error,
            "job failed"
        );
    }

    async fn count(&self) -> Result<u64> {
        Ok(0)
    }

    async fn all(&self) -> Result<Vec<FailureRecord>> {
        Ok(Vec::new())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}
