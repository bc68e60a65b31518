use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Serialized unit of work: a registered type identifier plus the ordered
/// arguments handed to its performer.
///
/// The `id` field is present iff status tracking was requested when the
/// job was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Identifies a registered performer type
    pub type_id: String,

    /// Ordered, opaque arguments
    #[serde(default)]
    pub args: Vec<Value>,

    /// Tracking id, present only for monitored jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl JobPayload {
    /// Create a payload without a tracking id
    pub fn new(type_id: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            type_id: type_id.into(),
            args,
            id: None,
        }
    }

    /// Attach a tracking id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Serialize for the store
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a payload popped from the store
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
