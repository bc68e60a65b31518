use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Infrastructure and lifecycle errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("no performer registered for type '{0}'")]
    TypeNotFound(String),

    #[error("performer for type '{type_id}' rejected the payload: {reason}")]
    InvalidInstance { type_id: String, reason: String },

    #[error("job execution failed: {0}")]
    Perform(#[from] PerformError),

    #[error("job aborted by worker signal")]
    Aborted,

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short class-style name used in failure records.
    pub fn kind(&self) -> &str {
        match self {
            Self::TypeNotFound(_) => "TypeNotFound",
            Self::InvalidInstance { .. } => "InvalidInstance",
            Self::Perform(e) => &e.class,
            Self::Aborted => "Aborted",
            Self::Store(_) => "StoreError",
            Self::Serialization(_) => "SerializationError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Backtrace captured at the point of failure, when one exists.
    pub fn backtrace_info(&self) -> Option<&str> {
        match self {
            Self::Perform(e) => e.backtrace.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Failure raised by a performer's `set_up`/`perform`/`tear_down`
#[derive(Error, Debug, Clone)]
#[error("{class}: {message}")]
pub struct PerformError {
    /// Error class name (free-form, mirrors an exception class)
    pub class: String,

    /// Human-readable message
    pub message: String,

    /// Optional captured backtrace
    pub backtrace: Option<String>,
}

impl PerformError {
    /// Create a perform error with a class name and message
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            backtrace: None,
        }
    }

    /// Attach a captured backtrace
    pub fn with_backtrace(mut self, backtrace: impl Into<String>) -> Self {
        self.backtrace = Some(backtrace.into());
        self
    }

    /// Build a perform error from a panic payload recovered at the
    /// isolation boundary.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "job panicked".to_string()
        };
        Self::new("Panic", message)
    }
}
