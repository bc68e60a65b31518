pub mod identity;
pub mod payload;
pub mod status;

pub use identity::WorkerId;
pub use payload::JobPayload;
pub use status::{JobStatus, StatusEntry};
