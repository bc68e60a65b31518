use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::{Error, PerformError, Result};
use crate::events::{HookArgs, HookEvent};
use crate::failure::FailureRecord;
use crate::job::{Job, JobOutcome};
use crate::store::keys;
use crate::types::{JobPayload, WorkerId};

/// Worker loop tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep between empty polls when `block_timeout` is zero
    pub interval: Duration,
    /// Store-side wait per reserve; zero switches the loop to polling
    pub block_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            block_timeout: Duration::from_secs(5),
        }
    }
}

/// Out-of-band instructions for a running worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    /// Finish the job in flight, then deregister and stop
    Shutdown,
    /// Abort the job in flight, then deregister and stop
    ShutdownNow,
    /// Abort the job in flight but keep consuming the queues
    AbortJob,
}

/// Cloneable handle for signaling a worker from other tasks
#[derive(Clone)]
pub struct SignalHandle {
    tx: mpsc::UnboundedSender<WorkerSignal>,
}

impl SignalHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(WorkerSignal::Shutdown);
    }

    pub fn shutdown_now(&self) {
        let _ = self.tx.send(WorkerSignal::ShutdownNow);
    }

    pub fn abort_job(&self) {
        let _ = self.tx.send(WorkerSignal::AbortJob);
    }
}

/// Marker persisted while a worker runs a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingOn {
    pub queue: String,
    pub payload: JobPayload,
    pub run_at: DateTime<Utc>,
}

enum LoopFlow {
    Continue,
    Stop,
}

/// Supervises job execution for a fixed queue list.
///
/// Each job runs in its own spawned task so a panic or an abort signal
/// never takes the supervising loop down with it. Identity, the
/// current-job marker and the processed/failed counters all live on the
/// shared store, so any process can observe (and prune) this worker.
pub struct Worker {
    engine: Arc<Engine>,
    id: WorkerId,
    queues: Vec<String>,
    config: WorkerConfig,
    signal_tx: mpsc::UnboundedSender<WorkerSignal>,
    signal_rx: Option<mpsc::UnboundedReceiver<WorkerSignal>>,
}

impl Worker {
    pub fn new(engine: Arc<Engine>, queues: Vec<String>) -> Self {
        Self::with_config(engine, queues, WorkerConfig::default())
    }

    pub fn with_config(engine: Arc<Engine>, queues: Vec<String>, config: WorkerConfig) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let id = WorkerId::local(&queues);
        Self {
            engine,
            id,
            queues,
            config,
            signal_tx,
            signal_rx: Some(signal_rx),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn signal_handle(&self) -> SignalHandle {
        SignalHandle {
            tx: self.signal_tx.clone(),
        }
    }

    /// What a registered worker is running right now, if anything
    pub async fn working_on(engine: &Engine, id: &WorkerId) -> Result<Option<WorkingOn>> {
        match engine.store().read(&keys::worker_job(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Registration time of a worker, if it is registered
    pub async fn started_at(engine: &Engine, id: &WorkerId) -> Result<Option<DateTime<Utc>>> {
        match engine.store().read(&keys::worker_started(id)).await? {
            Some(raw) => Ok(DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|t| t.with_timezone(&Utc))),
            None => Ok(None),
        }
    }

    /// Whether a registered worker has no job in flight
    pub async fn is_idle(engine: &Engine, id: &WorkerId) -> Result<bool> {
        Ok(Self::working_on(engine, id).await?.is_none())
    }

    /// Queues this worker will scan on the next pass.
    ///
    /// A literal `*` entry widens the list to every queue the store
    /// knows about, sorted, re-resolved on each reservation so queues
    /// created after startup are picked up.
    async fn watched_queues(&self) -> Result<Vec<String>> {
        if !self.queues.iter().any(|q| q == "*") {
            return Ok(self.queues.clone());
        }
        let mut all = self.engine.queues().await?;
        all.sort();
        Ok(all)
    }

    /// Run until signaled to stop.
    ///
    /// Registers the identity, prunes workers that died on this host,
    /// then consumes the queues. Always deregisters on the way out,
    /// whatever ended the loop.
    pub async fn work(mut self) -> Result<()> {
        let mut signal_rx = self
            .signal_rx
            .take()
            .ok_or_else(|| Error::Internal("worker already started".into()))?;

        prune_dead_workers(&self.engine).await?;
        self.register().await?;
        info!(worker = %self.id, queues = ?self.queues, "worker started");

        let mut first_job = true;
        let outcome = loop {
            let watched = match self.watched_queues().await {
                Ok(watched) => watched,
                Err(e) => {
                    error!(worker = %self.id, error = %e, "queue resolution failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            if watched.is_empty() {
                // Wildcard with no queues registered yet
                match self.idle(&mut signal_rx).await {
                    LoopFlow::Continue => continue,
                    LoopFlow::Stop => break Ok(()),
                }
            }

            let reserved = tokio::select! {
                signal = signal_rx.recv() => {
                    match signal {
                        Some(WorkerSignal::Shutdown) | Some(WorkerSignal::ShutdownNow) | None => {
                            info!(worker = %self.id, "shutdown requested");
                            break Ok(());
                        }
                        // Nothing in flight to abort
                        Some(WorkerSignal::AbortJob) => continue,
                    }
                }
                reserved = self.engine.reserve(&watched, self.config.block_timeout) => reserved,
            };

            let job = match reserved {
                Ok(Some(job)) => job,
                Ok(None) => {
                    if self.config.block_timeout.is_zero() {
                        match self.idle(&mut signal_rx).await {
                            LoopFlow::Continue => {}
                            LoopFlow::Stop => break Ok(()),
                        }
                    }
                    continue;
                }
                Err(e) => {
                    error!(worker = %self.id, error = %e, "reserve failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if first_job {
                self.engine
                    .events()
                    .trigger(HookEvent::BeforeFirstFork, HookArgs::Empty)
                    .await;
                first_job = false;
            }

            match self.process(job, &mut signal_rx).await {
                Ok(LoopFlow::Continue) => {}
                Ok(LoopFlow::Stop) => break Ok(()),
                Err(e) => {
                    error!(worker = %self.id, error = %e, "job supervision failed");
                }
            }
        };

        self.unregister().await?;
        info!(worker = %self.id, "worker stopped");
        outcome
    }

    /// Poll-mode pause that stays responsive to signals
    async fn idle(&self, signal_rx: &mut mpsc::UnboundedReceiver<WorkerSignal>) -> LoopFlow {
        tokio::select! {
            _ = tokio::time::sleep(self.config.interval) => LoopFlow::Continue,
            signal = signal_rx.recv() => match signal {
                Some(WorkerSignal::AbortJob) => LoopFlow::Continue,
                _ => LoopFlow::Stop,
            },
        }
    }

    /// Run one reserved job in an isolated task, supervising it for
    /// signals. The spare clone records the failure when the task is
    /// aborted or panics.
    async fn process(
        &self,
        mut job: Job,
        signal_rx: &mut mpsc::UnboundedReceiver<WorkerSignal>,
    ) -> Result<LoopFlow> {
        job.set_worker(self.id.clone());
        debug!(worker = %self.id, job = %job, "processing");

        self.engine
            .events()
            .trigger(HookEvent::BeforeFork, HookArgs::Job(&job))
            .await;
        self.set_working_on(&job).await?;

        let spare = job.clone();
        let engine = self.engine.clone();
        let mut handle = tokio::spawn(async move {
            engine
                .events()
                .trigger(HookEvent::AfterFork, HookArgs::Job(&job))
                .await;
            job.perform().await
        });

        let mut stopping = false;
        let flow = loop {
            tokio::select! {
                joined = &mut handle => {
                    Self::settle(joined, &spare).await;
                    break if stopping { LoopFlow::Stop } else { LoopFlow::Continue };
                }
                signal = signal_rx.recv() => {
                    match signal {
                        Some(WorkerSignal::Shutdown) => {
                            // Let the job in flight finish first.
                            stopping = true;
                        }
                        Some(WorkerSignal::ShutdownNow) | None => {
                            // Immediate stop: the job in flight is
                            // dropped without a failure record, exactly
                            // as if the process had been killed.
                            handle.abort();
                            let _ = (&mut handle).await;
                            warn!(worker = %self.id, job = %spare, "job aborted by immediate shutdown");
                            self.engine.store().delete(&keys::worker_job(&self.id)).await?;
                            return Ok(LoopFlow::Stop);
                        }
                        Some(WorkerSignal::AbortJob) => {
                            handle.abort();
                            Self::settle((&mut handle).await, &spare).await;
                            break if stopping { LoopFlow::Stop } else { LoopFlow::Continue };
                        }
                    }
                }
            }
        };

        self.done_working().await?;
        Ok(flow)
    }

    /// Fold the child task's exit into the job record. A task that ran
    /// to completion already settled itself inside `perform`; only a
    /// panic or a cancellation still needs the spare clone.
    async fn settle(joined: std::result::Result<JobOutcome, tokio::task::JoinError>, spare: &Job) {
        match joined {
            Ok(outcome) => {
                debug!(job = %spare, ?outcome, "job finished");
            }
            Err(join_err) if join_err.is_panic() => {
                let err = Error::Perform(PerformError::from_panic(join_err.into_panic()));
                spare.fail(&err).await;
            }
            Err(_) => {
                spare.fail(&Error::Aborted).await;
            }
        }
    }

    async fn set_working_on(&self, job: &Job) -> Result<()> {
        let marker = WorkingOn {
            queue: job.queue().to_string(),
            payload: job.payload().clone(),
            run_at: Utc::now(),
        };
        self.engine
            .store()
            .write(&keys::worker_job(&self.id), &serde_json::to_string(&marker)?)
            .await
    }

    async fn done_working(&self) -> Result<()> {
        self.engine.store().delete(&keys::worker_job(&self.id)).await?;
        self.engine.incr_stat("processed", Some(&self.id)).await
    }

    async fn register(&self) -> Result<()> {
        let store = self.engine.store();
        store.set_add(keys::WORKERS, self.id.as_str()).await?;
        store
            .write(&keys::worker_started(&self.id), &Utc::now().to_rfc3339())
            .await
    }

    async fn unregister(&self) -> Result<()> {
        deregister_worker(&self.engine, &self.id).await
    }
}

/// Remove one worker's registration, marker and counters from the store
async fn deregister_worker(engine: &Engine, id: &WorkerId) -> Result<()> {
    let store = engine.store();
    store.set_remove(keys::WORKERS, id.as_str()).await?;
    store.delete(&keys::worker_job(id)).await?;
    store.delete(&keys::worker_started(id)).await?;
    store
        .clear_counter(&keys::worker_stat("processed", id))
        .await?;
    store.clear_counter(&keys::worker_stat("failed", id)).await?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    // No portable liveness probe; err on the side of keeping the
    // registration.
    true
}

/// Deregister workers on this host whose process no longer exists.
///
/// A pruned worker that still had a current-job marker gets a
/// `DirtyExit` failure recorded for that job, since nothing else will
/// ever report it. Returns the number of pruned identities.
pub async fn prune_dead_workers(engine: &Arc<Engine>) -> Result<u64> {
    let local_host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let own_pid = std::process::id();

    let mut pruned = 0;
    for id in engine.worker_ids().await? {
        let Some((host, pid, _)) = id.parse() else {
            warn!(worker = %id, "removing malformed worker registration");
            deregister_worker(engine, &id).await?;
            pruned += 1;
            continue;
        };
        // Only this host's processes can be probed.
        if host != local_host || pid == own_pid || pid_alive(pid) {
            continue;
        }

        if let Some(marker) = Worker::working_on(engine, &id).await? {
            let err = Error::Perform(PerformError::new(
                "DirtyExit",
                format!("worker {id} died while processing"),
            ));
            let record = FailureRecord::new(marker.payload, marker.queue, Some(&id), &err);
            engine.failure_backend().record(record).await;
        }

        warn!(worker = %id, "pruning dead worker");
        deregister_worker(engine, &id).await?;
        pruned += 1;
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{JobContext, Performer, PerformerFactory};
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Performer for Recorder {
        async fn perform(&mut self, ctx: &JobContext) -> std::result::Result<(), PerformError> {
            self.log.lock().push(ctx.queue.clone());
            Ok(())
        }
    }

    fn recorder_factory(log: Arc<Mutex<Vec<String>>>) -> PerformerFactory {
        Arc::new(move |_payload| {
            Ok(Box::new(Recorder { log: log.clone() }) as Box<dyn Performer>)
        })
    }

    fn quick_config() -> WorkerConfig {
        WorkerConfig {
            interval: Duration::from_millis(10),
            block_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn worker_registers_and_deregisters() {
        let engine = Engine::new(Arc::new(MemoryStore::new()));
        let worker = Worker::with_config(engine.clone(), vec!["jobs".into()], quick_config());
        let id = worker.id().clone();
        let signals = worker.signal_handle();

        let handle = tokio::spawn(worker.work());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.worker_ids().await.unwrap().contains(&id));
        assert!(Worker::started_at(&engine, &id).await.unwrap().is_some());

        signals.shutdown();
        handle.await.unwrap().unwrap();
        assert!(engine.worker_ids().await.unwrap().is_empty());
        assert!(Worker::started_at(&engine, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn worker_drains_queue_and_counts() {
        let engine = Engine::new(Arc::new(MemoryStore::new()));
        let log = Arc::new(Mutex::new(Vec::new()));
        engine
            .registry()
            .register("Email", recorder_factory(log.clone()))
            .unwrap();
        engine.enqueue("jobs", "Email", vec![]).await.unwrap();
        engine.enqueue("jobs", "Email", vec![]).await.unwrap();

        let worker = Worker::with_config(engine.clone(), vec!["jobs".into()], quick_config());
        let id = worker.id().clone();
        let signals = worker.signal_handle();
        let handle = tokio::spawn(worker.work());

        tokio::time::sleep(Duration::from_millis(100)).await;
        signals.shutdown();
        handle.await.unwrap().unwrap();

        assert_eq!(log.lock().len(), 2);
        assert_eq!(engine.stat("processed").await.unwrap(), 2);
        assert_eq!(engine.size("jobs").await.unwrap(), 0);
        // Per-worker counters are cleared on deregistration.
        assert_eq!(engine.worker_stat("processed", &id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn panicking_job_is_failed_not_fatal() {
        struct Bomb;

        #[async_trait]
        impl Performer for Bomb {
            async fn perform(
                &mut self,
                _ctx: &JobContext,
            ) -> std::result::Result<(), PerformError> {
                panic!("boom");
            }
        }

        let engine = Engine::new(Arc::new(MemoryStore::new()));
        engine
            .registry()
            .register(
                "Bomb",
                Arc::new(|_: &JobPayload| Ok(Box::new(Bomb) as Box<dyn Performer>)),
            )
            .unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        engine
            .registry()
            .register("Email", recorder_factory(log.clone()))
            .unwrap();

        engine.enqueue("jobs", "Bomb", vec![]).await.unwrap();
        engine.enqueue("jobs", "Email", vec![]).await.unwrap();

        let worker = Worker::with_config(engine.clone(), vec!["jobs".into()], quick_config());
        let signals = worker.signal_handle();
        let handle = tokio::spawn(worker.work());

        tokio::time::sleep(Duration::from_millis(150)).await;
        signals.shutdown();
        handle.await.unwrap().unwrap();

        // The panic became a failure record and the next job still ran.
        let failures = engine.failure_backend().all().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].exception, "Panic");
        assert_eq!(log.lock().len(), 1);
        assert_eq!(engine.stat("failed").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn prune_ignores_live_and_foreign_workers() {
        let engine = Engine::new(Arc::new(MemoryStore::new()));
        let store = engine.store();

        // Foreign host: never probed, never pruned.
        store.set_add(keys::WORKERS, "elsewhere:1:jobs").await.unwrap();
        // This process: alive by definition.
        let own = WorkerId::local(&["jobs".to_string()]);
        store.set_add(keys::WORKERS, own.as_str()).await.unwrap();

        assert_eq!(prune_dead_workers(&engine).await.unwrap(), 0);
        assert_eq!(engine.worker_ids().await.unwrap().len(), 2);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn prune_records_dirty_exit_for_dead_worker() {
        let engine = Engine::new(Arc::new(MemoryStore::new()));
        let store = engine.store();

        let host = hostname::get().unwrap().to_string_lossy().into_owned();
        // PIDs above the default kernel pid_max cannot exist.
        let dead = WorkerId::from(format!("{host}:4194304:jobs"));
        store.set_add(keys::WORKERS, dead.as_str()).await.unwrap();
        let marker = WorkingOn {
            queue: "jobs".to_string(),
            payload: JobPayload::new("Email", vec![]),
            run_at: Utc::now(),
        };
        store
            .write(&keys::worker_job(&dead), &serde_json::to_string(&marker).unwrap())
            .await
            .unwrap();

        assert_eq!(prune_dead_workers(&engine).await.unwrap(), 1);
        assert!(engine.worker_ids().await.unwrap().is_empty());

        let failures = engine.failure_backend().all().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].exception, "DirtyExit");
        assert_eq!(failures[0].queue, "jobs");
    }
}
