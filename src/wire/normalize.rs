use serde_json::{Map, Value};

use super::event::CanonicalEvent;
use crate::logging;

/// Presence-ordered view over a raw event's fields.
///
/// Resolution rule for dual-cased fields: a snake_case key that is present
/// wins even when its value is falsy (`0`, `false`, `""`); the camelCase key
/// applies only when the snake_case key is entirely absent; otherwise the
/// kind's default applies. JSON `null` counts as absent (the emitter omits
/// unset fields rather than nulling them), and a present value of the wrong
/// JSON type resolves to the default, not to the other casing.
struct FieldView<'a> {
    fields: Option<&'a Map<String, Value>>,
}

impl<'a> FieldView<'a> {
    fn new(raw: &'a Value) -> Self {
        Self {
            fields: raw.as_object(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.fields
            .and_then(|m| m.get(key))
            .filter(|v| !v.is_null())
    }

    fn pick(&self, snake: &str, camel: &str) -> Option<&'a Value> {
        self.get(snake).or_else(|| self.get(camel))
    }

    fn str_or(&self, snake: &str, camel: &str, default: &str) -> String {
        self.pick(snake, camel)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    fn single_str_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    fn opt_str(&self, snake: &str, camel: &str) -> Option<String> {
        self.pick(snake, camel)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn u64_or(&self, snake: &str, camel: &str, default: u64) -> u64 {
        self.pick(snake, camel)
            .and_then(Value::as_u64)
            .unwrap_or(default)
    }

    fn u32_or(&self, snake: &str, camel: &str, default: u32) -> u32 {
        self.pick(snake, camel)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(default)
    }

    fn single_u64_or(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    fn single_f64_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    fn single_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(Value::as_i64).unwrap_or(default)
    }

    fn bool_or(&self, snake: &str, camel: &str, default: bool) -> bool {
        self.pick(snake, camel)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    fn value(&self, snake: &str, camel: &str) -> Option<Value> {
        self.pick(snake, camel).cloned()
    }
}

/// Map an arbitrary wire event to its canonical shape.
///
/// Total: a missing or unrecognized `type` yields [`CanonicalEvent::Unknown`]
/// and absent or malformed fields resolve to the kind's documented default.
/// This function never fails.
pub fn normalize(raw: &Value) -> CanonicalEvent {
    let view = FieldView::new(raw);
    let type_tag = view.get("type").and_then(Value::as_str);

    match type_tag {
        Some("status") => CanonicalEvent::Status {
            message: view.single_str_or("message", ""),
            is_compaction: view.bool_or("is_compaction", "isCompaction", false),
            pre_tokens: view.u64_or("pre_tokens", "preTokens", 0),
            post_tokens: view.u64_or("post_tokens", "postTokens", 0),
        },
        Some("ready") => CanonicalEvent::Ready {
            session_id: view.str_or("session_id", "sessionId", ""),
            model: view.single_str_or("model", ""),
            tools: view.u32_or("tools", "tools", 0),
        },
        Some("processing") => CanonicalEvent::Processing {
            prompt: view.single_str_or("prompt", ""),
        },
        Some("text_delta") => CanonicalEvent::TextDelta {
            text: view.single_str_or("text", ""),
        },
        Some("thinking_start") => CanonicalEvent::ThinkingStart {
            index: view.get("index").and_then(Value::as_u64),
        },
        Some("thinking_delta") => CanonicalEvent::ThinkingDelta {
            thinking: view.single_str_or("thinking", ""),
        },
        Some("tool_start") => CanonicalEvent::ToolStart {
            id: view.single_str_or("id", ""),
            name: view.single_str_or("name", "unknown"),
            parent_tool_use_id: view.opt_str("parent_tool_use_id", "parentToolUseId"),
        },
        Some("tool_input") => CanonicalEvent::ToolInput {
            json: view.single_str_or("json", ""),
        },
        Some("tool_pending") => CanonicalEvent::ToolPending,
        Some("permission_request") => CanonicalEvent::PermissionRequest {
            request_id: view.str_or("request_id", "requestId", ""),
            tool_name: view.str_or("tool_name", "toolName", "unknown"),
            tool_input: view.value("tool_input", "toolInput"),
            description: view.single_str_or("description", ""),
        },
        Some("ask_user_question") => CanonicalEvent::AskUserQuestion {
            request_id: view.str_or("request_id", "requestId", ""),
            questions: view.get("questions").cloned().unwrap_or(Value::Null),
        },
        Some("tool_result") => CanonicalEvent::ToolResult {
            tool_use_id: view.opt_str("tool_use_id", "toolUseId"),
            stdout: view.single_str_or("stdout", ""),
            stderr: view.single_str_or("stderr", ""),
            is_error: view.bool_or("is_error", "isError", false),
        },
        Some("block_end") => CanonicalEvent::BlockEnd,
        Some("context_update") => CanonicalEvent::ContextUpdate {
            input_tokens: view.u64_or("input_tokens", "inputTokens", 0),
            raw_input_tokens: view.u64_or("raw_input_tokens", "rawInputTokens", 0),
            cache_read: view.u64_or("cache_read", "cacheRead", 0),
            cache_write: view.u64_or("cache_write", "cacheWrite", 0),
        },
        Some("result") => CanonicalEvent::Result {
            content: view.single_str_or("content", ""),
            cost: view.single_f64_or("cost", 0.0),
            duration: view.single_u64_or("duration", 0),
            turns: view.u32_or("turns", "turns", 0),
            is_error: view.bool_or("is_error", "isError", false),
            input_tokens: view.u64_or("input_tokens", "inputTokens", 0),
            output_tokens: view.u64_or("output_tokens", "outputTokens", 0),
            cache_read: view.u64_or("cache_read", "cacheRead", 0),
            cache_write: view.u64_or("cache_write", "cacheWrite", 0),
        },
        Some("done") => CanonicalEvent::Done,
        Some("interrupted") => CanonicalEvent::Interrupted,
        Some("closed") => CanonicalEvent::Closed {
            code: view.single_i64_or("code", 0),
        },
        Some("error") => CanonicalEvent::Error {
            message: view.single_str_or("message", "Unknown error"),
        },
        Some("subagent_start") => CanonicalEvent::SubagentStart {
            id: view.single_str_or("id", ""),
            agent_type: view.str_or("agent_type", "agentType", "unknown"),
            description: view.single_str_or("description", ""),
            prompt: view.single_str_or("prompt", ""),
        },
        Some("subagent_progress") => CanonicalEvent::SubagentProgress {
            subagent_id: view.str_or("subagent_id", "subagentId", ""),
            tool_name: view.str_or("tool_name", "toolName", ""),
            tool_detail: view.str_or("tool_detail", "toolDetail", ""),
            tool_count: view.u32_or("tool_count", "toolCount", 0),
        },
        Some("subagent_end") => CanonicalEvent::SubagentEnd {
            id: view.single_str_or("id", ""),
            agent_type: view.str_or("agent_type", "agentType", "unknown"),
            duration: view.single_u64_or("duration", 0),
            tool_count: view.u32_or("tool_count", "toolCount", 0),
            result: view.single_str_or("result", ""),
        },
        Some("bg_task_registered") => CanonicalEvent::BgTaskRegistered {
            task_id: view.str_or("task_id", "taskId", ""),
            description: view.single_str_or("description", ""),
        },
        Some("bg_task_completed") => CanonicalEvent::BgTaskCompleted {
            task_id: view.str_or("task_id", "taskId", ""),
        },
        Some("bg_task_result") => CanonicalEvent::BgTaskResult {
            task_id: view.str_or("task_id", "taskId", ""),
            status: view.single_str_or("status", "completed"),
            agent_type: view.str_or("agent_type", "agentType", "unknown"),
            result: view.single_str_or("result", ""),
        },
        other => {
            logging::emit_unknown_event(other, raw);
            CanonicalEvent::Unknown
        }
    }
}
