use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::trace;

use crate::error::Error;
use crate::job::Job;
use crate::registry::Performer;

/// Handle for removing a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static LISTENER_ID: AtomicU64 = AtomicU64::new(1);

fn next_listener_id() -> ListenerId {
    ListenerId(LISTENER_ID.fetch_add(1, Ordering::Relaxed))
}

/// Lifecycle hook points instrumented by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Once per worker, before the first job is isolated
    BeforeFirstFork,
    /// In the supervising worker, before each job is isolated
    BeforeFork,
    /// Inside the isolated execution context, before `perform`
    AfterFork,
    /// Before the performer runs; a listener may skip the job
    BeforePerform,
    /// After the performer ran successfully
    AfterPerform,
    /// When a job is recorded as failed
    OnFailure,
    /// Synchronously after a payload was pushed to the store
    AfterEnqueue,
    /// During instance resolution; a listener may supply the performer
    CreateInstance,
}

impl HookEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeforeFirstFork => "before_first_fork",
            Self::BeforeFork => "before_fork",
            Self::AfterFork => "after_fork",
            Self::BeforePerform => "before_perform",
            Self::AfterPerform => "after_perform",
            Self::OnFailure => "on_failure",
            Self::AfterEnqueue => "after_enqueue",
            Self::CreateInstance => "create_instance",
        }
    }
}

/// Control outcome of a listener.
///
/// `Skip` is the one sanctioned control signal: raised during
/// `BeforePerform` (or a performer's `set_up`) it stops the job without
/// marking it failed. It is a return value, not an unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookFlow {
    #[default]
    Continue,
    Skip,
}

/// Arguments delivered to listeners; the shape depends on the event
#[derive(Clone, Copy)]
pub enum HookArgs<'a> {
    /// `BeforeFirstFork`
    Empty,
    /// `BeforeFork`, `AfterFork`, `BeforePerform`, `AfterPerform`
    Job(&'a Job),
    /// `OnFailure`
    Failure { error: &'a Error, job: &'a Job },
    /// `AfterEnqueue`
    Enqueue {
        type_id: &'a str,
        args: &'a [Value],
    },
    /// `CreateInstance`
    Resolve { job: &'a Job, slot: &'a InstanceSlot },
}

impl<'a> HookArgs<'a> {
    /// The job carried by this event, when there is one
    pub fn job(&self) -> Option<&'a Job> {
        match self {
            Self::Job(job) => Some(job),
            Self::Failure { job, .. } => Some(job),
            Self::Resolve { job, .. } => Some(job),
            _ => None,
        }
    }
}

/// Boxed listener future
pub type HookFut<'a> = Pin<Box<dyn Future<Output = HookFlow> + Send + 'a>>;

/// Listener signature (async)
pub type Listener = Arc<dyn for<'a> Fn(HookArgs<'a>) -> HookFut<'a> + Send + Sync>;

/// Slot a `CreateInstance` listener may fill to supply the resolved
/// performer, overriding the registry lookup (external override/mocking).
#[derive(Default)]
pub struct InstanceSlot {
    supplied: Mutex<Option<Box<dyn Performer>>>,
}

impl InstanceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply the instance to use for this job. A later supply replaces
    /// an earlier one.
    pub fn supply(&self, performer: Box<dyn Performer>) {
        *self.supplied.lock() = Some(performer);
    }

    /// Whether an instance has been supplied
    pub fn is_filled(&self) -> bool {
        self.supplied.lock().is_some()
    }

    pub(crate) fn take(&self) -> Option<Box<dyn Performer>> {
        self.supplied.lock().take()
    }
}

/// Process-scoped registry of lifecycle listeners.
///
/// Dispatch is ordered and synchronous relative to the triggering call:
/// listeners run one at a time, in registration order, on the calling
/// task. Nothing is deferred or parallelized. The listener table is
/// snapshotted before dispatch so no lock is held across `.await`.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<HookEvent, Vec<(ListenerId, Listener)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for one event; insertion order is invocation
    /// order.
    pub fn listen(&self, event: HookEvent, listener: Listener) -> ListenerId {
        let id = next_listener_id();
        self.listeners
            .write()
            .entry(event)
            .or_default()
            .push((id, listener));
        id
    }

    /// Convenience for synchronous listeners
    pub fn listen_fn<F>(&self, event: HookEvent, f: F) -> ListenerId
    where
        F: for<'a> Fn(HookArgs<'a>) -> HookFlow + Send + Sync + 'static,
    {
        self.listen(
            event,
            Arc::new(move |args| {
                let flow = f(args);
                Box::pin(std::future::ready(flow)) as HookFut<'_>
            }),
        )
    }

    /// Remove one listener; other listeners on the same event are
    /// unaffected. Returns whether anything was removed.
    pub fn stop_listening(&self, event: HookEvent, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        if let Some(entries) = listeners.get_mut(&event) {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            return before != entries.len();
        }
        false
    }

    /// Reset the registry (test isolation between runs)
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Number of listeners registered for one event
    pub fn listener_count(&self, event: HookEvent) -> usize {
        self.listeners
            .read()
            .get(&event)
            .map_or(0, |entries| entries.len())
    }

    /// Invoke every listener for `event` in registration order.
    ///
    /// A `Skip` return short-circuits the remaining listeners and is
    /// reported to the caller; only the `BeforePerform` trigger site
    /// gives it meaning.
    pub async fn trigger(&self, event: HookEvent, args: HookArgs<'_>) -> HookFlow {
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.read();
            match listeners.get(&event) {
                Some(entries) => entries.iter().map(|(_, l)| l.clone()).collect(),
                None => return HookFlow::Continue,
            }
        };
        trace!(event = event.name(), listeners = snapshot.len(), "trigger");
        for listener in snapshot {
            if listener(args).await == HookFlow::Skip {
                return HookFlow::Skip;
            }
        }
        HookFlow::Continue
    }
}
