use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::events::{EventBus, HookArgs, HookEvent};
use crate::failure::{FailureBackend, StoreFailureBackend};
use crate::job::Job;
use crate::registry::PerformerRegistry;
use crate::status::StatusTracker;
use crate::store::{keys, QueueStore};
use crate::types::{JobPayload, StatusEntry, WorkerId};

/// Tunables that do not vary per call
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retention for terminal job statuses
    pub status_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            status_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Central handle tying the store, listener bus, performer registry,
/// status tracker and failure backend together.
///
/// One `Arc<Engine>` is shared by producers and workers; everything on
/// it is callable concurrently.
pub struct Engine {
    store: Arc<dyn QueueStore>,
    events: EventBus,
    registry: PerformerRegistry,
    status: StatusTracker,
    failure: RwLock<Arc<dyn FailureBackend>>,
    // Handle to the owning Arc, so reserved jobs can carry the engine
    me: Weak<Engine>,
}

impl Engine {
    pub fn new(store: Arc<dyn QueueStore>) -> Arc<Self> {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn QueueStore>, config: EngineConfig) -> Arc<Self> {
        let failure: Arc<dyn FailureBackend> = Arc::new(StoreFailureBackend::new(store.clone()));
        Arc::new_cyclic(|me| Self {
            status: StatusTracker::new(store.clone(), config.status_ttl),
            store,
            events: EventBus::new(),
            registry: PerformerRegistry::new(),
            failure: RwLock::new(failure),
            me: me.clone(),
        })
    }

    fn handle(&self) -> Result<Arc<Self>> {
        self.me
            .upgrade()
            .ok_or_else(|| crate::error::Error::Internal("engine already dropped".into()))
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &PerformerRegistry {
        &self.registry
    }

    pub fn status_tracker(&self) -> &StatusTracker {
        &self.status
    }

    pub fn failure_backend(&self) -> Arc<dyn FailureBackend> {
        self.failure.read().clone()
    }

    /// Swap the failure sink; in-flight records finish on the old one
    pub fn set_failure_backend(&self, backend: Arc<dyn FailureBackend>) {
        *self.failure.write() = backend;
    }

    /// Enqueue an untracked job. The returned id names the enqueue call
    /// but is not embedded in the payload, so no status is kept.
    pub async fn enqueue(
        &self,
        queue: &str,
        type_id: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let payload = JobPayload::new(type_id, args);
        self.push_payload(queue, &payload).await?;
        Ok(id)
    }

    /// Enqueue a monitored job: the id is embedded in the payload and a
    /// `Waiting` status is written before the push.
    pub async fn enqueue_tracked(
        &self,
        queue: &str,
        type_id: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let payload = JobPayload::new(type_id, args).with_id(&id);
        self.status.create(&id).await?;
        self.push_payload(queue, &payload).await?;
        Ok(id)
    }

    /// Serialize and push a payload, then fire `AfterEnqueue` on the
    /// calling task before returning.
    pub(crate) async fn push_payload(&self, queue: &str, payload: &JobPayload) -> Result<()> {
        self.store.push(queue, &payload.to_json()?).await?;
        info!(queue, type_id = %payload.type_id, "enqueued");
        self.events
            .trigger(
                HookEvent::AfterEnqueue,
                HookArgs::Enqueue {
                    type_id: &payload.type_id,
                    args: &payload.args,
                },
            )
            .await;
        Ok(())
    }

    /// Non-blocking reserve from a single queue
    pub async fn reserve_from(&self, queue: &str) -> Result<Option<Job>> {
        match self.store.pop(queue).await? {
            Some(raw) => Ok(Some(Job::new(
                self.handle()?,
                queue,
                JobPayload::from_json(&raw)?,
            ))),
            None => Ok(None),
        }
    }

    /// Reserve the next job from any of the given queues.
    ///
    /// Zero timeout is a single pass in listed order; otherwise the call
    /// blocks on the store up to the timeout. `None` means nothing
    /// arrived in time.
    pub async fn reserve(&self, queues: &[String], timeout: Duration) -> Result<Option<Job>> {
        match self.store.blocking_pop(queues, timeout).await? {
            Some((queue, raw)) => Ok(Some(Job::new(
                self.handle()?,
                queue,
                JobPayload::from_json(&raw)?,
            ))),
            None => Ok(None),
        }
    }

    /// Pending payload count for one queue
    pub async fn size(&self, queue: &str) -> Result<u64> {
        self.store.size(queue).await
    }

    /// Every queue name the store has seen a push for
    pub async fn queues(&self) -> Result<Vec<String>> {
        self.store.queue_names().await
    }

    /// Drop a queue and everything pending in it
    pub async fn remove_queue(&self, queue: &str) -> Result<()> {
        self.store.remove_queue(queue).await
    }

    /// Current status entry for a tracked job
    pub async fn job_status(&self, job_id: &str) -> Result<Option<StatusEntry>> {
        self.status.get(job_id).await
    }

    /// Global counter value (`processed`, `failed`, ...)
    pub async fn stat(&self, name: &str) -> Result<u64> {
        self.store.counter(&keys::stat(name)).await
    }

    /// Per-worker counter value
    pub async fn worker_stat(&self, name: &str, worker: &WorkerId) -> Result<u64> {
        self.store.counter(&keys::worker_stat(name, worker)).await
    }

    /// Bump a global counter, and the per-worker one when a worker is
    /// involved.
    pub(crate) async fn incr_stat(&self, name: &str, worker: Option<&WorkerId>) -> Result<()> {
        self.store.incr(&keys::stat(name)).await?;
        if let Some(worker) = worker {
            self.store.incr(&keys::worker_stat(name, worker)).await?;
        }
        Ok(())
    }

    /// Reset a global counter
    pub async fn clear_stat(&self, name: &str) -> Result<()> {
        self.store.clear_counter(&keys::stat(name)).await
    }

    /// Identities currently registered in the worker set
    pub async fn worker_ids(&self) -> Result<Vec<WorkerId>> {
        Ok(self
            .store
            .set_members(keys::WORKERS)
            .await?
            .into_iter()
            .map(WorkerId::from)
            .collect())
    }

    /// Drop all listeners and performer registrations (test isolation)
    pub fn reset(&self) {
        self.events.clear();
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::JobStatus;

    fn engine() -> Arc<Engine> {
        Engine::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn enqueue_makes_payload_visible() {
        let engine = engine();
        engine
            .enqueue("jobs", "Email", vec!["a@b.c".into()])
            .await
            .unwrap();

        assert_eq!(engine.size("jobs").await.unwrap(), 1);
        assert_eq!(engine.queues().await.unwrap(), vec!["jobs"]);

        let job = engine.reserve_from("jobs").await.unwrap().unwrap();
        assert_eq!(job.payload().type_id, "Email");
        assert_eq!(job.job_id(), None);
    }

    #[tokio::test]
    async fn tracked_enqueue_embeds_id_and_status() {
        let engine = engine();
        let id = engine
            .enqueue_tracked("jobs", "Email", vec![])
            .await
            .unwrap();

        let entry = engine.job_status(&id).await.unwrap().unwrap();
        assert_eq!(entry.status, JobStatus::Waiting);

        let job = engine.reserve_from("jobs").await.unwrap().unwrap();
        assert_eq!(job.job_id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn untracked_enqueue_keeps_no_status() {
        let engine = engine();
        let id = engine.enqueue("jobs", "Email", vec![]).await.unwrap();
        assert!(engine.job_status(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn after_enqueue_fires_synchronously() {
        let engine = engine();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        engine.events().listen_fn(HookEvent::AfterEnqueue, move |args| {
            if let HookArgs::Enqueue { type_id, .. } = args {
                seen_in.lock().push(type_id.to_string());
            }
            crate::events::HookFlow::Continue
        });

        engine.enqueue("jobs", "Email", vec![]).await.unwrap();
        assert_eq!(*seen.lock(), vec!["Email"]);
    }

    #[tokio::test]
    async fn reserve_scans_queues_in_listed_order() {
        let engine = engine();
        engine.enqueue("low", "Low", vec![]).await.unwrap();
        engine.enqueue("high", "High", vec![]).await.unwrap();

        let queues = vec!["high".to_string(), "low".to_string()];
        let job = engine
            .reserve(&queues, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.queue(), "high");
        assert_eq!(job.payload().type_id, "High");
    }

    #[tokio::test]
    async fn counters_roundtrip() {
        let engine = engine();
        let worker = WorkerId::from("host:1:jobs");
        engine.incr_stat("processed", Some(&worker)).await.unwrap();
        engine.incr_stat("processed", None).await.unwrap();

        assert_eq!(engine.stat("processed").await.unwrap(), 2);
        assert_eq!(engine.worker_stat("processed", &worker).await.unwrap(), 1);

        engine.clear_stat("processed").await.unwrap();
        assert_eq!(engine.stat("processed").await.unwrap(), 0);
    }
}
