//! Core engine for a desktop chat client that drives an external
//! AI coding-assistant CLI and folds its streamed output into a
//! conversation model.
//!
//! The transport (the CLI process and its channel) and the rendering
//! layer are external collaborators; this crate owns everything in
//! between: wire-event normalization, incremental JSON accumulation,
//! streaming message reconciliation, permission arbitration, the
//! session lifecycle, and local command dispatch.

pub mod commands;
pub mod config;
pub mod logging;
pub mod permission;
pub mod session;
pub mod state;
pub mod test_support;
pub mod transport;
pub mod util;
pub mod wire;
