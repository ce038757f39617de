pub mod arbiter;
pub mod file_channel;
pub mod poller;
pub mod reviewer;

pub use arbiter::{
    IngestOutcome, PermissionArbiter, PermissionMode, PermissionRequest, PermissionResponse,
    ResponseChannel, ReviewApplication, ReviewTicket,
};
pub use file_channel::PermissionFileChannel;
pub use poller::{spawn_permission_poller, POLL_INTERVAL_MS};
pub use reviewer::{instant_decision, ReviewRequest, ReviewResult, SafetyReviewer};
