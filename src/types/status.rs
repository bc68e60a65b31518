use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse job lifecycle status
///
/// Absence of a persisted status means "unknown": the job was never
/// tracked, or its terminal entry expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Enqueued, not yet picked up
    Waiting,

    /// Currently being performed by a worker
    Running,

    /// Failed permanently
    Failed,

    /// Performed successfully
    Completed,
}

impl JobStatus {
    /// Terminal statuses are written with a retention TTL
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Completed)
    }

    /// Status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Persisted status value with its update timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: JobStatus,
    pub updated_at: DateTime<Utc>,
}

impl StatusEntry {
    /// Entry stamped with the current time
    pub fn now(status: JobStatus) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
        }
    }
}
