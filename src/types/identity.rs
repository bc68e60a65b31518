use serde::{Deserialize, Serialize};
use std::fmt;

/// Worker identity: `hostname:pid:comma-joined-queue-list`.
///
/// Unique per process; registered in the shared `workers` set and used
/// as the key prefix for per-worker markers and counters. Stored as a
/// plain string value because a worker's lifetime is independent of any
/// single job it runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Identity for the current process watching the given queues
    pub fn local(queues: &[String]) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self(format!("{}:{}:{}", host, std::process::id(), queues.join(",")))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(hostname, pid, queues)`; `None` if malformed
    pub fn parse(&self) -> Option<(&str, u32, Vec<&str>)> {
        let mut parts = self.0.splitn(3, ':');
        let host = parts.next()?;
        let pid = parts.next()?.parse().ok()?;
        let queues = parts.next()?.split(',').filter(|q| !q.is_empty()).collect();
        Some((host, pid, queues))
    }

    /// Hostname segment, when well-formed
    pub fn hostname(&self) -> Option<&str> {
        self.parse().map(|(host, _, _)| host)
    }

    /// PID segment, when well-formed
    pub fn pid(&self) -> Option<u32> {
        self.parse().map(|(_, pid, _)| pid)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
