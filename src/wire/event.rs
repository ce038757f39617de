use serde::{Deserialize, Serialize};

/// Canonical, fully-defaulted form of a wire event. Payload fields may
/// arrive snake_cased, camelCased, both, or not at all; [`super::normalize`]
/// resolves that, and past it the rest of the crate only sees this union.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    Status {
        message: String,
        is_compaction: bool,
        pre_tokens: u64,
        post_tokens: u64,
    },

    Ready {
        session_id: String,
        model: String,
        tools: u32,
    },

    Processing { prompt: String },

    TextDelta { text: String },

    ThinkingStart { index: Option<u64> },

    ThinkingDelta { thinking: String },

    ToolStart {
        id: String,
        name: String,
        parent_tool_use_id: Option<String>,
    },

    ToolInput { json: String },

    ToolPending,

    PermissionRequest {
        request_id: String,
        tool_name: String,
        tool_input: Option<serde_json::Value>,
        description: String,
    },

    AskUserQuestion {
        request_id: String,
        questions: serde_json::Value,
    },

    ToolResult {
        tool_use_id: Option<String>,
        stdout: String,
        stderr: String,
        is_error: bool,
    },

    BlockEnd,

    ContextUpdate {
        input_tokens: u64,
        raw_input_tokens: u64,
        cache_read: u64,
        cache_write: u64,
    },

    Result {
        content: String,
        cost: f64,
        duration: u64,
        turns: u32,
        is_error: bool,
        input_tokens: u64,
        output_tokens: u64,
        cache_read: u64,
        cache_write: u64,
    },

    Done,

    Interrupted,

    Closed { code: i64 },

    Error { message: String },

    SubagentStart {
        id: String,
        agent_type: String,
        description: String,
        prompt: String,
    },

    SubagentProgress {
        subagent_id: String,
        tool_name: String,
        tool_detail: String,
        tool_count: u32,
    },

    SubagentEnd {
        id: String,
        agent_type: String,
        duration: u64,
        tool_count: u32,
        result: String,
    },

    BgTaskRegistered { task_id: String, description: String },

    BgTaskCompleted { task_id: String },

    BgTaskResult {
        task_id: String,
        status: String,
        agent_type: String,
        result: String,
    },

    // Unrecognized type tag, carried so callers can ignore it safely.
    #[serde(other)]
    Unknown,
}

impl CanonicalEvent {
    /// Events that terminate the current streaming turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CanonicalEvent::Done
                | CanonicalEvent::Interrupted
                | CanonicalEvent::Closed { .. }
                | CanonicalEvent::Error { .. }
        )
    }
}
