use std::collections::HashMap;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::message::{ContentBlock, Message, MessageVariant, Role, SessionInfo, ToolUse};
use crate::wire::accumulator::JsonAccumulator;
use crate::wire::event::CanonicalEvent;

// Per-phase poll timeouts and idle budgets: overall waits of 30s before
// first content, 6s mid-stream, 2min for tools, 2.5min while compacting.
pub const TIMEOUT_INITIAL_MS: u64 = 500;
pub const TIMEOUT_STREAMING_MS: u64 = 2000;
pub const TIMEOUT_EXTENDED_MS: u64 = 5000;

pub const MAX_IDLE_INITIAL: u32 = 60;
pub const MAX_IDLE_STREAMING: u32 = 3;
pub const MAX_IDLE_TOOL_PENDING: u32 = 24;
pub const MAX_IDLE_COMPACTING: u32 = 30;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponsePhase {
    #[default]
    AwaitingResponse,
    Streaming,
    ToolPending,
    Compacting,
}

impl ResponsePhase {
    pub fn timeout(&self) -> std::time::Duration {
        let ms = match self {
            ResponsePhase::AwaitingResponse => TIMEOUT_INITIAL_MS,
            ResponsePhase::Streaming => TIMEOUT_STREAMING_MS,
            ResponsePhase::ToolPending | ResponsePhase::Compacting => TIMEOUT_EXTENDED_MS,
        };
        std::time::Duration::from_millis(ms)
    }

    pub fn max_idle(&self) -> u32 {
        match self {
            ResponsePhase::AwaitingResponse => MAX_IDLE_INITIAL,
            ResponsePhase::Streaming => MAX_IDLE_STREAMING,
            ResponsePhase::ToolPending => MAX_IDLE_TOOL_PENDING,
            ResponsePhase::Compacting => MAX_IDLE_COMPACTING,
        }
    }

    pub fn transition(&self, event: &CanonicalEvent) -> Self {
        match event {
            CanonicalEvent::ToolPending => ResponsePhase::ToolPending,
            CanonicalEvent::TextDelta { .. }
            | CanonicalEvent::ToolStart { .. }
            | CanonicalEvent::ToolResult { .. } => ResponsePhase::Streaming,
            CanonicalEvent::Status {
                message,
                is_compaction,
                ..
            } => {
                if message.contains("Compacting") {
                    ResponsePhase::Compacting
                } else if *is_compaction || message.contains("Compacted") {
                    match self {
                        ResponsePhase::AwaitingResponse => ResponsePhase::AwaitingResponse,
                        _ => ResponsePhase::Streaming,
                    }
                } else {
                    *self
                }
            }
            _ => *self,
        }
    }

    pub fn is_extended_wait(&self) -> bool {
        matches!(self, ResponsePhase::ToolPending | ResponsePhase::Compacting)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReconcilerUpdate {
    TextDelta(String),
    ThinkingDelta(String),
    ToolStarted { id: String, name: String },
    ToolInputUpdated { id: String },
    ToolResolved { id: String },
    TodosUpdated(Value),
    QuestionsUpdated(Value),
    StatusMessage(String),
    PhaseChanged(ResponsePhase),
    SessionUpdated(SessionInfo),
    MessageFinalized(u64),
    StreamError(String),
}

struct PendingToolResult {
    output: String,
    is_error: bool,
}

struct SubagentRun {
    agent_type: String,
    tool_count: u32,
}

const TODO_TOOL: &str = "TodoWrite";
const QUESTION_TOOL: &str = "AskUserQuestion";

/// Folds the canonical event stream into the conversation model.
pub struct StreamReconciler {
    messages: Vec<Message>,
    next_message_id: u64,
    session: SessionInfo,
    show_thinking: bool,

    streaming: bool,
    accepting: bool,
    loading: bool,
    error: Option<String>,
    phase: ResponsePhase,

    content: String,
    thinking: String,
    tool_uses: Vec<ToolUse>,
    blocks: Vec<ContentBlock>,
    tool_inputs: HashMap<String, JsonAccumulator<Value>>,
    current_tool: Option<String>,
    pending_results: HashMap<String, PendingToolResult>,

    todo_json: JsonAccumulator<Value>,
    question_json: JsonAccumulator<Value>,
    subagents: HashMap<String, SubagentRun>,
    bg_tasks: HashMap<String, String>,
}

impl StreamReconciler {
    pub fn new(show_thinking: bool) -> Self {
        Self {
            messages: Vec::new(),
            next_message_id: 0,
            session: SessionInfo::default(),
            show_thinking,
            streaming: false,
            accepting: true,
            loading: false,
            error: None,
            phase: ResponsePhase::AwaitingResponse,
            content: String::new(),
            thinking: String::new(),
            tool_uses: Vec::new(),
            blocks: Vec::new(),
            tool_inputs: HashMap::new(),
            current_tool: None,
            pending_results: HashMap::new(),
            todo_json: JsonAccumulator::new()
                .with_validator(|v: &Value| v.get("todos").is_some_and(Value::is_array)),
            question_json: JsonAccumulator::new()
                .with_validator(|v: &Value| v.get("questions").is_some_and(Value::is_array)),
            subagents: HashMap::new(),
            bg_tasks: HashMap::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionInfo {
        &mut self.session
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn phase(&self) -> ResponsePhase {
        self.phase
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_show_thinking(&mut self, enabled: bool) {
        self.show_thinking = enabled;
    }

    pub fn show_thinking(&self) -> bool {
        self.show_thinking
    }

    pub fn streaming_content(&self) -> &str {
        &self.content
    }

    pub fn streaming_thinking(&self) -> &str {
        &self.thinking
    }

    pub fn streaming_tool_uses(&self) -> &[ToolUse] {
        &self.tool_uses
    }

    pub fn begin_turn(&mut self) {
        self.clear_turn_buffers();
        self.streaming = true;
        self.accepting = true;
        self.loading = true;
        self.error = None;
        self.phase = ResponsePhase::AwaitingResponse;
    }

    /// Drop further deltas for the current turn, ahead of the backend
    /// acknowledging an interrupt.
    pub fn stop_accepting(&mut self) {
        self.accepting = false;
        self.loading = false;
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn push_user_message(&mut self, content: String) -> u64 {
        let id = self.alloc_message_id();
        self.messages.push(Message::new(id, Role::User, content));
        id
    }

    pub fn push_system_message(&mut self, content: String) -> u64 {
        let id = self.alloc_message_id();
        self.messages.push(Message::new(id, Role::System, content));
        id
    }

    pub fn fade_all_messages(&mut self) {
        for message in &mut self.messages {
            message.faded = true;
        }
    }

    pub fn push_divider(&mut self) -> u64 {
        let id = self.alloc_message_id();
        let mut message = Message::new(id, Role::System, String::new());
        message.variant = MessageVariant::Divider;
        self.messages.push(message);
        id
    }

    pub fn reset_context_to_base(&mut self) {
        if self.session.base_context > 0 {
            self.session.total_context = self.session.base_context;
        } else {
            self.session.total_context = 0;
        }
        self.session.output_tokens = 0;
    }

    pub fn apply(
        &mut self,
        event: &CanonicalEvent,
        tx: Option<&mpsc::UnboundedSender<ReconcilerUpdate>>,
    ) {
        let next_phase = self.phase.transition(event);
        if next_phase != self.phase {
            self.phase = next_phase;
            emit(tx, ReconcilerUpdate::PhaseChanged(next_phase));
        }

        match event {
            CanonicalEvent::Processing { .. } | CanonicalEvent::ThinkingStart { .. } => {
                if self.accepting {
                    self.ensure_streaming();
                }
            }
            CanonicalEvent::TextDelta { text } => {
                if !self.accepting {
                    return;
                }
                self.ensure_streaming();
                self.content.push_str(text);
                match self.blocks.last_mut() {
                    Some(ContentBlock::Text { text: existing }) => existing.push_str(text),
                    _ => self.blocks.push(ContentBlock::Text { text: text.clone() }),
                }
                emit(tx, ReconcilerUpdate::TextDelta(text.clone()));
            }
            CanonicalEvent::ThinkingDelta { thinking } => {
                if !self.accepting {
                    return;
                }
                self.ensure_streaming();
                self.thinking.push_str(thinking);
                if self.show_thinking {
                    emit(tx, ReconcilerUpdate::ThinkingDelta(thinking.clone()));
                }
            }
            CanonicalEvent::ToolStart { id, name, .. } => {
                if !self.accepting {
                    return;
                }
                self.ensure_streaming();
                self.register_tool_start(id.clone(), name.clone(), tx);
            }
            CanonicalEvent::ToolInput { json } => {
                if !self.accepting {
                    return;
                }
                self.append_tool_input(json, tx);
            }
            CanonicalEvent::ToolPending => {}
            CanonicalEvent::BlockEnd => {
                self.finish_current_tool_input(tx);
            }
            CanonicalEvent::ToolResult {
                tool_use_id,
                stdout,
                stderr,
                is_error,
            } => {
                let output = compose_tool_output(stdout, stderr);
                let target = tool_use_id.clone().or_else(|| self.current_tool.clone());
                match target {
                    Some(id) => {
                        if self.patch_tool_result(&id, &output, *is_error) {
                            emit(tx, ReconcilerUpdate::ToolResolved { id });
                        } else {
                            // Result raced ahead of its start event; park it
                            // until the start registers.
                            self.pending_results.insert(
                                id,
                                PendingToolResult {
                                    output,
                                    is_error: *is_error,
                                },
                            );
                        }
                    }
                    None => {}
                }
            }
            CanonicalEvent::Status {
                message,
                is_compaction,
                pre_tokens,
                post_tokens,
            } => {
                emit(tx, ReconcilerUpdate::StatusMessage(message.clone()));
                if *is_compaction {
                    self.session.total_context = *post_tokens;
                    let note = format!(
                        "Context compacted: {pre_tokens} → {post_tokens} tokens"
                    );
                    let id = self.push_system_message(note);
                    if let Some(entry) = self.messages.iter_mut().find(|m| m.id == id) {
                        entry.faded = true;
                    }
                    emit(tx, ReconcilerUpdate::SessionUpdated(self.session.clone()));
                }
            }
            CanonicalEvent::Ready {
                session_id,
                model,
                tools,
            } => {
                if !session_id.is_empty() {
                    self.session.session_id = session_id.clone();
                }
                if !model.is_empty() {
                    self.session.model = model.clone();
                }
                self.session.tools = *tools;
                emit(tx, ReconcilerUpdate::SessionUpdated(self.session.clone()));
            }
            CanonicalEvent::ContextUpdate {
                input_tokens,
                cache_read,
                cache_write,
                ..
            } => {
                let total = input_tokens + cache_read + cache_write;
                if self.session.base_context == 0 {
                    self.session.base_context = total;
                }
                self.session.total_context = total;
                emit(tx, ReconcilerUpdate::SessionUpdated(self.session.clone()));
            }
            CanonicalEvent::Result {
                content,
                cost,
                is_error,
                output_tokens,
                ..
            } => {
                self.session.output_tokens = *output_tokens;
                self.session.total_cost += cost;
                if *is_error && !content.is_empty() {
                    self.error = Some(content.clone());
                    emit(tx, ReconcilerUpdate::StreamError(content.clone()));
                }
                emit(tx, ReconcilerUpdate::SessionUpdated(self.session.clone()));
            }
            CanonicalEvent::Done => {
                self.finish_streaming(false, tx);
            }
            CanonicalEvent::Interrupted => {
                self.finish_streaming(true, tx);
            }
            CanonicalEvent::Error { message } => {
                self.error = Some(message.clone());
                emit(tx, ReconcilerUpdate::StreamError(message.clone()));
                self.finish_streaming(false, tx);
            }
            CanonicalEvent::Closed { code } => {
                if self.streaming {
                    let message = format!("Backing process closed (code {code})");
                    self.error = Some(message.clone());
                    emit(tx, ReconcilerUpdate::StreamError(message));
                    self.finish_streaming(false, tx);
                }
            }
            CanonicalEvent::SubagentStart { id, agent_type, .. } => {
                self.subagents.insert(
                    id.clone(),
                    SubagentRun {
                        agent_type: agent_type.clone(),
                        tool_count: 0,
                    },
                );
            }
            CanonicalEvent::SubagentProgress {
                subagent_id,
                tool_count,
                ..
            } => {
                if let Some(run) = self.subagents.get_mut(subagent_id) {
                    run.tool_count = *tool_count;
                }
            }
            CanonicalEvent::SubagentEnd { id, result, .. } => {
                let run = self.subagents.remove(id);
                if self.patch_tool_result(id, result, false) {
                    emit(tx, ReconcilerUpdate::ToolResolved { id: id.clone() });
                } else if let Some(run) = run {
                    self.push_system_message(format!(
                        "Subagent {} finished ({} tool calls): {result}",
                        run.agent_type, run.tool_count
                    ));
                }
            }
            CanonicalEvent::BgTaskRegistered {
                task_id,
                description,
            } => {
                self.bg_tasks.insert(task_id.clone(), description.clone());
            }
            CanonicalEvent::BgTaskCompleted { .. } => {}
            CanonicalEvent::BgTaskResult {
                task_id,
                status,
                result,
                ..
            } => {
                // Consumed entries are pruned so the table cannot grow
                // across a long session.
                let description = self.bg_tasks.remove(task_id);
                if self.patch_tool_result(task_id, result, status == "failed") {
                    emit(
                        tx,
                        ReconcilerUpdate::ToolResolved {
                            id: task_id.clone(),
                        },
                    );
                } else {
                    let label = description.unwrap_or_else(|| task_id.clone());
                    self.push_system_message(format!(
                        "Background task {status}: {label}{}",
                        if result.is_empty() {
                            String::new()
                        } else {
                            format!(" — {result}")
                        }
                    ));
                }
            }
            CanonicalEvent::AskUserQuestion { questions, .. } => {
                emit(tx, ReconcilerUpdate::QuestionsUpdated(questions.clone()));
            }
            // Permission requests are arbitrated by the session layer.
            CanonicalEvent::PermissionRequest { .. } => {}
            CanonicalEvent::Unknown => {}
        }
    }

    /// Finalize the in-flight turn. The completed message is appended
    /// before loading and the per-turn buffers are cleared, so a render
    /// frame never sees neither the finalized message nor the streaming
    /// view.
    pub fn finish_streaming(
        &mut self,
        interrupted: bool,
        tx: Option<&mpsc::UnboundedSender<ReconcilerUpdate>>,
    ) -> Option<u64> {
        let has_payload =
            !self.content.is_empty() || !self.tool_uses.is_empty() || !self.blocks.is_empty();
        let appended = if has_payload {
            let id = self.alloc_message_id();
            let mut message = Message::new(id, Role::Assistant, std::mem::take(&mut self.content));
            message.tool_uses = std::mem::take(&mut self.tool_uses);
            message.content_blocks = std::mem::take(&mut self.blocks);
            message.interrupted = interrupted;
            self.messages.push(message);
            emit(tx, ReconcilerUpdate::MessageFinalized(id));
            Some(id)
        } else {
            None
        };

        self.loading = false;
        self.streaming = false;
        self.clear_turn_buffers();
        appended
    }

    fn ensure_streaming(&mut self) {
        if !self.streaming {
            self.begin_turn();
        }
    }

    fn clear_turn_buffers(&mut self) {
        self.content.clear();
        self.thinking.clear();
        self.tool_uses.clear();
        self.blocks.clear();
        self.tool_inputs.clear();
        self.current_tool = None;
        self.pending_results.clear();
        self.todo_json.reset();
        self.question_json.reset();
        self.phase = ResponsePhase::AwaitingResponse;
    }

    fn alloc_message_id(&mut self) -> u64 {
        self.next_message_id += 1;
        self.next_message_id
    }

    fn register_tool_start(
        &mut self,
        id: String,
        name: String,
        tx: Option<&mpsc::UnboundedSender<ReconcilerUpdate>>,
    ) {
        self.tool_uses.push(ToolUse::started(id.clone(), name.clone()));
        self.blocks.push(ContentBlock::ToolUse { id: id.clone() });

        let mut accumulator = JsonAccumulator::new();
        accumulator.start();
        self.tool_inputs.insert(id.clone(), accumulator);
        self.current_tool = Some(id.clone());
        if name == TODO_TOOL {
            self.todo_json.start();
        } else if name == QUESTION_TOOL {
            self.question_json.start();
        }
        emit(
            tx,
            ReconcilerUpdate::ToolStarted {
                id: id.clone(),
                name,
            },
        );

        // A result may have raced ahead of this start; apply it
        // retroactively and prune the side table.
        if let Some(parked) = self.pending_results.remove(&id) {
            self.patch_tool_result(&id, &parked.output, parked.is_error);
            emit(tx, ReconcilerUpdate::ToolResolved { id });
        }
    }

    fn append_tool_input(
        &mut self,
        fragment: &str,
        tx: Option<&mpsc::UnboundedSender<ReconcilerUpdate>>,
    ) {
        let Some(id) = self.current_tool.clone() else {
            return;
        };
        let Some(accumulator) = self.tool_inputs.get_mut(&id) else {
            return;
        };
        let outcome = accumulator.append(Some(fragment));
        if let Some(value) = outcome.value {
            if let Some(tool) = self.tool_uses.iter_mut().find(|t| t.id == id) {
                tool.input = value;
                emit(tx, ReconcilerUpdate::ToolInputUpdated { id: id.clone() });
            }
        }

        let tool_name = self
            .tool_uses
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.name.clone());
        match tool_name.as_deref() {
            Some(TODO_TOOL) => {
                if let Some(value) = self.todo_json.append(Some(fragment)).value {
                    emit(tx, ReconcilerUpdate::TodosUpdated(value));
                }
            }
            Some(QUESTION_TOOL) => {
                if let Some(value) = self.question_json.append(Some(fragment)).value {
                    emit(tx, ReconcilerUpdate::QuestionsUpdated(value));
                }
            }
            _ => {}
        }
    }

    fn finish_current_tool_input(&mut self, tx: Option<&mpsc::UnboundedSender<ReconcilerUpdate>>) {
        let Some(id) = self.current_tool.take() else {
            return;
        };
        if let Some(mut accumulator) = self.tool_inputs.remove(&id) {
            let parsed = accumulator.finish();
            let raw = accumulator.raw().to_string();
            if let Some(tool) = self.tool_uses.iter_mut().find(|t| t.id == id) {
                match parsed {
                    Some(value) => tool.input = value,
                    None if !raw.trim().is_empty() => {
                        tool.input = json!({ "raw": raw });
                    }
                    None => {}
                }
                emit(tx, ReconcilerUpdate::ToolInputUpdated { id });
            }
        }
    }

    // Patches the current turn first, then already finalized messages.
    // False when no such tool is known yet.
    fn patch_tool_result(&mut self, id: &str, output: &str, is_error: bool) -> bool {
        let tool = self
            .tool_uses
            .iter_mut()
            .find(|t| t.id == id)
            .or_else(|| {
                self.messages
                    .iter_mut()
                    .rev()
                    .flat_map(|m| m.tool_uses.iter_mut())
                    .find(|t| t.id == id)
            });
        match tool {
            Some(tool) => {
                tool.result = Some(output.to_string());
                tool.is_error = is_error;
                tool.is_loading = false;
                if is_error {
                    tool.auto_expanded = true;
                }
                true
            }
            None => false,
        }
    }
}

fn compose_tool_output(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (false, false) => format!("{stdout}\n{stderr}"),
        (true, false) => stderr.to_string(),
        _ => stdout.to_string(),
    }
}

fn emit(tx: Option<&mpsc::UnboundedSender<ReconcilerUpdate>>, update: ReconcilerUpdate) {
    if let Some(tx) = tx {
        let _ = tx.send(update);
    }
}
