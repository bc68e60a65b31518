use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Error, PerformError, Result};
use crate::events::HookFlow;
use crate::types::JobPayload;

/// Context handed to a performer for one run
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Queue the job was reserved from
    pub queue: String,
    /// Positional arguments from the payload
    pub args: Vec<Value>,
    /// Tracking id, present only for monitored jobs
    pub job_id: Option<String>,
    /// Identity of the worker running the job, if any
    pub worker: Option<String>,
}

/// A unit of work resolvable by type id.
///
/// `set_up` and `tear_down` bracket `perform` on the same instance;
/// `set_up` may return [`HookFlow::Skip`] to drop the job without
/// failure.
#[async_trait]
pub trait Performer: Send + Sync {
    async fn set_up(&mut self, _ctx: &JobContext) -> std::result::Result<HookFlow, PerformError> {
        Ok(HookFlow::Continue)
    }

    async fn perform(&mut self, ctx: &JobContext) -> std::result::Result<(), PerformError>;

    async fn tear_down(&mut self, _ctx: &JobContext) -> std::result::Result<(), PerformError> {
        Ok(())
    }
}

/// Builds a fresh performer per job from the deserialized payload.
///
/// Returning `Err` rejects the payload (bad args, unsupported shape)
/// and surfaces as an invalid-instance failure, not a panic.
pub type PerformerFactory =
    Arc<dyn Fn(&JobPayload) -> std::result::Result<Box<dyn Performer>, String> + Send + Sync>;

/// Type-id to factory mapping consulted during job resolution
#[derive(Default)]
pub struct PerformerRegistry {
    factories: RwLock<HashMap<String, PerformerFactory>>,
}

impl PerformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a type id. A duplicate id is an error;
    /// use [`deregister`](Self::deregister) first to replace one.
    pub fn register(&self, type_id: impl Into<String>, factory: PerformerFactory) -> Result<()> {
        let type_id = type_id.into();
        let mut factories = self.factories.write();
        if factories.contains_key(&type_id) {
            return Err(Error::Internal(format!(
                "performer already registered for '{type_id}'"
            )));
        }
        factories.insert(type_id, factory);
        Ok(())
    }

    /// Remove a registration; returns whether it existed
    pub fn deregister(&self, type_id: &str) -> bool {
        self.factories.write().remove(type_id).is_some()
    }

    pub fn is_registered(&self, type_id: &str) -> bool {
        self.factories.read().contains_key(type_id)
    }

    /// Registered type ids, sorted
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Build a performer for the payload's type id
    pub fn resolve(&self, payload: &JobPayload) -> Result<Box<dyn Performer>> {
        let factory = self
            .factories
            .read()
            .get(&payload.type_id)
            .cloned()
            .ok_or_else(|| Error::TypeNotFound(payload.type_id.clone()))?;
        factory(payload).map_err(|reason| Error::InvalidInstance {
            type_id: payload.type_id.clone(),
            reason,
        })
    }

    /// Drop all registrations
    pub fn clear(&self) {
        self.factories.write().clear();
    }
}
