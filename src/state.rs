pub mod message;
pub mod reconciler;

#[cfg(test)]
mod tests;

pub use message::{ContentBlock, Message, MessageVariant, Role, SessionInfo, ToolUse};
pub use reconciler::{ReconcilerUpdate, ResponsePhase, StreamReconciler};
