use std::collections::HashSet;
use std::str::FromStr;

use anyhow::bail;
use serde_json::Value;

use crate::logging;
use crate::wire::event::CanonicalEvent;
use super::reviewer::{ReviewRequest, ReviewResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PermissionMode {
    Auto,
    /// Safety review first; only flagged requests reach the dialog.
    Bot,
    #[default]
    Request,
    Plan,
}

impl FromStr for PermissionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(PermissionMode::Auto),
            "bot" => Ok(PermissionMode::Bot),
            "request" => Ok(PermissionMode::Request),
            "plan" => Ok(PermissionMode::Plan),
            other => bail!("invalid permission mode '{other}' (auto, bot, request, plan)"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PermissionRequest {
    pub request_id: String,
    pub tool_name: String,
    pub tool_input: Option<Value>,
    pub description: String,
}

impl PermissionRequest {
    pub fn from_event(event: &CanonicalEvent) -> Option<Self> {
        match event {
            CanonicalEvent::PermissionRequest {
                request_id,
                tool_name,
                tool_input,
                description,
            } => Some(Self {
                request_id: request_id.clone(),
                tool_name: tool_name.clone(),
                tool_input: tool_input.clone(),
                description: description.clone(),
            }),
            _ => None,
        }
    }

    pub fn to_review_request(&self) -> ReviewRequest {
        ReviewRequest {
            tool_name: self.tool_name.clone(),
            tool_input: self.tool_input.clone().unwrap_or(Value::Null),
            description: if self.description.is_empty() {
                None
            } else {
                Some(self.description.clone())
            },
        }
    }
}

/// Responses go over the process stream when the request carried an id,
/// and over the temp-file handshake when it did not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseChannel {
    Stream,
    File,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PermissionResponse {
    pub request_id: String,
    pub allow: bool,
    pub remember: bool,
    pub tool_input: Value,
    pub message: Option<String>,
}

impl PermissionResponse {
    pub fn channel(&self) -> ResponseChannel {
        if self.request_id.is_empty() {
            ResponseChannel::File
        } else {
            ResponseChannel::Stream
        }
    }

    pub fn control_message(&self) -> Value {
        serde_json::json!({
            "type": "control_response",
            "request_id": self.request_id,
            "allow": self.allow,
            "remember": self.remember,
            "tool_input": self.tool_input,
        })
    }
}

#[derive(Debug, PartialEq)]
pub enum IngestOutcome {
    AutoApproved(PermissionResponse),
    /// Bot mode: run the review, then feed the verdict to
    /// [`PermissionArbiter::apply_review`] with this ticket.
    ReviewPending(ReviewTicket),
    DialogRequired,
    /// A request was already pending; this one was dropped.
    Dropped,
}

/// Captures which request a review was started for, so a verdict landing
/// after the request was superseded can be detected and discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewTicket {
    generation: u64,
}

#[derive(Debug, PartialEq)]
pub enum ReviewApplication {
    AutoApproved(PermissionResponse),
    DialogRequired { reason: String },
    /// The reviewed request is no longer current; nothing changed.
    Stale,
}

/// Tracks the single outstanding permission request and applies
/// mode-dependent resolution.
#[derive(Default)]
pub struct PermissionArbiter {
    mode: PermissionMode,
    pending: Option<PermissionRequest>,
    generation: u64,
    remembered_tools: HashSet<String>,
}

impl PermissionArbiter {
    pub fn new(mode: PermissionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PermissionMode) {
        self.mode = mode;
    }

    pub fn pending(&self) -> Option<&PermissionRequest> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// A request arriving while one is pending is dropped rather than
    /// overwriting the undecided one.
    pub fn ingest(&mut self, request: PermissionRequest) -> IngestOutcome {
        if self.pending.is_some() {
            return IngestOutcome::Dropped;
        }

        if self.remembered_tools.contains(&request.tool_name) {
            logging::emit_permission_decision(&request.tool_name, true, "remembered");
            return IngestOutcome::AutoApproved(approve_response(&request, false));
        }

        match self.mode {
            PermissionMode::Auto => {
                logging::emit_permission_decision(&request.tool_name, true, "auto");
                IngestOutcome::AutoApproved(approve_response(&request, false))
            }
            PermissionMode::Bot => {
                self.generation += 1;
                self.pending = Some(request);
                IngestOutcome::ReviewPending(ReviewTicket {
                    generation: self.generation,
                })
            }
            PermissionMode::Request | PermissionMode::Plan => {
                self.generation += 1;
                self.pending = Some(request);
                IngestOutcome::DialogRequired
            }
        }
    }

    /// The verdict only takes effect when the pending request is still
    /// the one the ticket was issued for.
    pub fn apply_review(&mut self, ticket: &ReviewTicket, result: &ReviewResult) -> ReviewApplication {
        if ticket.generation != self.generation || self.pending.is_none() {
            return ReviewApplication::Stale;
        }

        if result.safe {
            let Some(request) = self.pending.take() else {
                return ReviewApplication::Stale;
            };
            logging::emit_permission_decision(&request.tool_name, true, "review");
            ReviewApplication::AutoApproved(approve_response(&request, false))
        } else {
            ReviewApplication::DialogRequired {
                reason: result.reason.clone(),
            }
        }
    }

    pub fn allow(&mut self, remember: bool) -> Option<PermissionResponse> {
        let request = self.pending.take()?;
        if remember {
            self.remembered_tools.insert(request.tool_name.clone());
        }
        logging::emit_permission_decision(&request.tool_name, true, "manual");
        Some(approve_response(&request, remember))
    }

    pub fn deny(&mut self, message: Option<String>) -> Option<PermissionResponse> {
        let request = self.pending.take()?;
        logging::emit_permission_decision(&request.tool_name, false, "manual");
        Some(PermissionResponse {
            request_id: request.request_id,
            allow: false,
            remember: false,
            tool_input: request.tool_input.unwrap_or_else(|| serde_json::json!({})),
            message,
        })
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.generation += 1;
    }
}

fn approve_response(request: &PermissionRequest, remember: bool) -> PermissionResponse {
    PermissionResponse {
        request_id: request.request_id.clone(),
        allow: true,
        remember,
        tool_input: request
            .tool_input
            .clone()
            .unwrap_or_else(|| serde_json::json!({})),
        message: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(id: &str, tool: &str) -> PermissionRequest {
        PermissionRequest {
            request_id: id.to_string(),
            tool_name: tool.to_string(),
            tool_input: Some(json!({"command": "ls"})),
            description: String::new(),
        }
    }

    #[test]
    fn auto_mode_approves_without_pending_state() {
        let mut arbiter = PermissionArbiter::new(PermissionMode::Auto);
        let outcome = arbiter.ingest(request("r1", "Bash"));
        match outcome {
            IngestOutcome::AutoApproved(response) => {
                assert!(response.allow);
                assert_eq!(response.request_id, "r1");
            }
            other => panic!("expected auto approval, got {other:?}"),
        }
        assert!(!arbiter.is_pending());
    }

    #[test]
    fn request_mode_surfaces_dialog() {
        let mut arbiter = PermissionArbiter::new(PermissionMode::Request);
        assert_eq!(arbiter.ingest(request("r1", "Bash")), IngestOutcome::DialogRequired);
        assert!(arbiter.is_pending());
    }

    #[test]
    fn second_request_while_pending_is_dropped() {
        let mut arbiter = PermissionArbiter::new(PermissionMode::Request);
        arbiter.ingest(request("r1", "Bash"));
        assert_eq!(arbiter.ingest(request("r2", "Write")), IngestOutcome::Dropped);
        assert_eq!(arbiter.pending().unwrap().request_id, "r1");
    }

    #[test]
    fn allow_clears_pending_and_duplicate_is_noop() {
        let mut arbiter = PermissionArbiter::new(PermissionMode::Request);
        arbiter.ingest(request("r1", "Bash"));

        let response = arbiter.allow(false).unwrap();
        assert!(response.allow);
        assert!(!arbiter.is_pending());
        assert!(arbiter.allow(false).is_none());
    }

    #[test]
    fn deny_carries_message() {
        let mut arbiter = PermissionArbiter::new(PermissionMode::Request);
        arbiter.ingest(request("r1", "Bash"));
        let response = arbiter.deny(Some("not now".to_string())).unwrap();
        assert!(!response.allow);
        assert_eq!(response.message.as_deref(), Some("not now"));
    }

    #[test]
    fn remember_blanket_approves_the_tool_for_the_session() {
        let mut arbiter = PermissionArbiter::new(PermissionMode::Request);
        arbiter.ingest(request("r1", "Bash"));
        let response = arbiter.allow(true).unwrap();
        assert!(response.remember);

        match arbiter.ingest(request("r2", "Bash")) {
            IngestOutcome::AutoApproved(response) => assert_eq!(response.request_id, "r2"),
            other => panic!("expected remembered approval, got {other:?}"),
        }
        // A different tool still asks.
        assert_eq!(arbiter.ingest(request("r3", "Write")), IngestOutcome::DialogRequired);
    }

    #[test]
    fn safe_review_auto_approves_current_request() {
        let mut arbiter = PermissionArbiter::new(PermissionMode::Bot);
        let IngestOutcome::ReviewPending(ticket) = arbiter.ingest(request("r1", "Bash")) else {
            panic!("expected review");
        };
        let verdict = ReviewResult {
            safe: true,
            reason: "routine".to_string(),
        };
        match arbiter.apply_review(&ticket, &verdict) {
            ReviewApplication::AutoApproved(response) => assert_eq!(response.request_id, "r1"),
            other => panic!("expected approval, got {other:?}"),
        }
        assert!(!arbiter.is_pending());
    }

    #[test]
    fn flagged_review_keeps_request_pending_for_dialog() {
        let mut arbiter = PermissionArbiter::new(PermissionMode::Bot);
        let IngestOutcome::ReviewPending(ticket) = arbiter.ingest(request("r1", "Bash")) else {
            panic!("expected review");
        };
        let verdict = ReviewResult {
            safe: false,
            reason: "sudo".to_string(),
        };
        assert_eq!(
            arbiter.apply_review(&ticket, &verdict),
            ReviewApplication::DialogRequired {
                reason: "sudo".to_string()
            }
        );
        assert!(arbiter.is_pending());
    }

    #[test]
    fn stale_review_after_supersession_is_discarded() {
        let mut arbiter = PermissionArbiter::new(PermissionMode::Bot);
        let IngestOutcome::ReviewPending(old_ticket) = arbiter.ingest(request("r1", "Bash")) else {
            panic!("expected review");
        };
        // The first request resolves manually, a second one arrives.
        arbiter.deny(None);
        let IngestOutcome::ReviewPending(_) = arbiter.ingest(request("r2", "Write")) else {
            panic!("expected review");
        };

        let verdict = ReviewResult {
            safe: true,
            reason: "routine".to_string(),
        };
        assert_eq!(
            arbiter.apply_review(&old_ticket, &verdict),
            ReviewApplication::Stale
        );
        assert_eq!(arbiter.pending().unwrap().request_id, "r2");
    }

    #[test]
    fn response_channel_follows_request_id_presence() {
        let with_id = PermissionResponse {
            request_id: "r1".to_string(),
            allow: true,
            remember: false,
            tool_input: json!({}),
            message: None,
        };
        assert_eq!(with_id.channel(), ResponseChannel::Stream);
        let control = with_id.control_message();
        assert_eq!(control["type"], "control_response");
        assert_eq!(control["request_id"], "r1");

        let without_id = PermissionResponse {
            request_id: String::new(),
            ..with_id
        };
        assert_eq!(without_id.channel(), ResponseChannel::File);
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("AUTO".parse::<PermissionMode>().unwrap(), PermissionMode::Auto);
        assert_eq!("bot".parse::<PermissionMode>().unwrap(), PermissionMode::Bot);
        assert_eq!(" plan ".parse::<PermissionMode>().unwrap(), PermissionMode::Plan);
        assert!("yolo".parse::<PermissionMode>().is_err());
    }

    #[test]
    fn from_event_extracts_permission_requests_only() {
        let event = CanonicalEvent::PermissionRequest {
            request_id: "r1".to_string(),
            tool_name: "Bash".to_string(),
            tool_input: Some(json!({"command": "ls"})),
            description: "list files".to_string(),
        };
        let request = PermissionRequest::from_event(&event).unwrap();
        assert_eq!(request.tool_name, "Bash");
        assert!(PermissionRequest::from_event(&CanonicalEvent::Done).is_none());
    }
}
