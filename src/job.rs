use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::events::{HookArgs, HookEvent, HookFlow, InstanceSlot};
use crate::registry::{JobContext, Performer};
use crate::types::{JobPayload, JobStatus, WorkerId};

/// How one execution of a job ended.
///
/// `Skipped` is its own outcome rather than a flavor of success: the
/// performer never ran, nothing was recorded as failed, and the job is
/// simply gone from the queue. `Failed` carries the error that was
/// already routed through [`Job::fail`].
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The performer ran to completion
    Performed,
    /// A listener or `set_up` skipped the job before the performer ran
    Skipped,
    /// The job failed and was handed to the failure backend
    Failed(Error),
}

impl JobOutcome {
    pub fn is_performed(&self) -> bool {
        matches!(self, Self::Performed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The failure, when there was one
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// A reserved unit of work: payload, source queue, and the engine
/// context needed to run it.
pub struct Job {
    engine: Arc<Engine>,
    queue: String,
    payload: JobPayload,
    worker: Option<WorkerId>,
    /// Cached performer; resolved once, consumed by `perform`
    instance: Option<Box<dyn Performer>>,
}

// The cached instance is execution state, not identity; a clone starts
// with an empty slot and resolves its own.
impl Clone for Job {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            queue: self.queue.clone(),
            payload: self.payload.clone(),
            worker: self.worker.clone(),
            instance: None,
        }
    }
}

impl Job {
    pub(crate) fn new(engine: Arc<Engine>, queue: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            engine,
            queue: queue.into(),
            payload,
            worker: None,
            instance: None,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn payload(&self) -> &JobPayload {
        &self.payload
    }

    /// Tracking id, present only for monitored jobs
    pub fn job_id(&self) -> Option<&str> {
        self.payload.id.as_deref()
    }

    pub fn worker(&self) -> Option<&WorkerId> {
        self.worker.as_ref()
    }

    pub(crate) fn set_worker(&mut self, worker: WorkerId) {
        self.worker = Some(worker);
    }

    /// Context handed to the performer
    pub fn context(&self) -> JobContext {
        JobContext {
            queue: self.queue.clone(),
            args: self.payload.args.clone(),
            job_id: self.payload.id.clone(),
            worker: self.worker.as_ref().map(|w| w.as_str().to_string()),
        }
    }

    async fn resolve_instance(&self) -> Result<Box<dyn Performer>> {
        let slot = InstanceSlot::new();
        self.engine
            .events()
            .trigger(
                HookEvent::CreateInstance,
                HookArgs::Resolve { job: self, slot: &slot },
            )
            .await;
        if let Some(supplied) = slot.take() {
            debug!(type_id = %self.payload.type_id, "instance supplied by listener");
            return Ok(supplied);
        }
        self.engine.registry().resolve(&self.payload)
    }

    /// Resolve (and cache) the performer for this job.
    ///
    /// A `CreateInstance` listener may supply the instance; otherwise
    /// the registry factory builds one. Repeated calls return the same
    /// instance until `perform` consumes it.
    pub async fn get_instance(&mut self) -> Result<&mut dyn Performer> {
        if self.instance.is_none() {
            let resolved = self.resolve_instance().await?;
            self.instance = Some(resolved);
        }
        match self.instance.as_deref_mut() {
            Some(instance) => Ok(instance),
            None => Err(Error::Internal("instance missing after resolution".into())),
        }
    }

    /// Run the job through its full lifecycle.
    ///
    /// Failures never propagate to the caller: they are routed through
    /// [`fail`](Self::fail) and folded into the returned outcome, so a
    /// worker loop cannot be killed by a bad job.
    pub async fn perform(&mut self) -> JobOutcome {
        match self.perform_inner().await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.fail(&err).await;
                JobOutcome::Failed(err)
            }
        }
    }

    async fn perform_inner(&mut self) -> Result<JobOutcome> {
        let mut instance = match self.instance.take() {
            Some(instance) => instance,
            None => self.resolve_instance().await?,
        };
        let ctx = self.context();

        let flow = self
            .engine
            .events()
            .trigger(HookEvent::BeforePerform, HookArgs::Job(self))
            .await;
        if flow == HookFlow::Skip {
            debug!(job = %self, "skipped by listener");
            return Ok(JobOutcome::Skipped);
        }
        if instance.set_up(&ctx).await? == HookFlow::Skip {
            debug!(job = %self, "skipped by set_up");
            return Ok(JobOutcome::Skipped);
        }

        self.set_status(JobStatus::Running).await;

        // tear_down runs even when perform fails; the perform error
        // still wins over a tear_down error.
        let performed = instance.perform(&ctx).await;
        let torn_down = instance.tear_down(&ctx).await;
        performed?;
        torn_down?;

        self.engine
            .events()
            .trigger(HookEvent::AfterPerform, HookArgs::Job(self))
            .await;
        self.set_status(JobStatus::Completed).await;
        Ok(JobOutcome::Performed)
    }

    /// Record this job as permanently failed: terminal status, failure
    /// backend, `OnFailure` listeners, failed counters. Infallible from
    /// the caller's view; sink errors are logged.
    pub async fn fail(&self, err: &Error) {
        warn!(job = %self, error = %err, "job failed");

        // Listeners run first, before any failure state lands
        self.engine
            .events()
            .trigger(
                HookEvent::OnFailure,
                HookArgs::Failure { error: err, job: self },
            )
            .await;

        self.set_status(JobStatus::Failed).await;

        let record = crate::failure::FailureRecord::new(
            self.payload.clone(),
            &self.queue,
            self.worker.as_ref(),
            err,
        );
        self.engine.failure_backend().record(record).await;

        if let Err(e) = self.engine.incr_stat("failed", self.worker.as_ref()).await {
            warn!(error = %e, "failed counter not updated");
        }
    }

    /// Enqueue an equivalent job on the same queue: same type id and
    /// args, fresh id. A monitored job yields a monitored successor
    /// (back at `Waiting` under the new id); an untracked one stays
    /// untracked. Returns the new id.
    pub async fn recreate(&self) -> Result<String> {
        if self.job_id().is_some() {
            self.engine
                .enqueue_tracked(&self.queue, self.payload.type_id.as_str(), self.payload.args.clone())
                .await
        } else {
            self.engine
                .enqueue(&self.queue, self.payload.type_id.as_str(), self.payload.args.clone())
                .await
        }
    }

    async fn set_status(&self, status: JobStatus) {
        if let Some(id) = self.job_id() {
            if let Err(e) = self.engine.status_tracker().set(id, status).await {
                warn!(job_id = id, error = %e, "status not updated");
            }
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = serde_json::to_string(&self.payload.args)
            .unwrap_or_else(|_| "<unprintable>".to_string());
        match self.job_id() {
            Some(id) => write!(
                f,
                "(Job{{{}}} | ID: {} | {} | {})",
                self.queue, id, self.payload.type_id, args
            ),
            None => write!(
                f,
                "(Job{{{}}} | {} | {})",
                self.queue, self.payload.type_id, args
            ),
        }
    }
}
