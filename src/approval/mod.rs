//! Human approval of drafted replies.

pub mod model;
pub mod queue;

pub use model::{ActionStatus, PendingAction};
pub use queue::{ApprovalQueue, ApproveOutcome, DenyOutcome};
