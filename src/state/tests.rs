use serde_json::json;
use tokio::sync::mpsc;

use super::message::{ContentBlock, MessageVariant, Role};
use super::reconciler::{ReconcilerUpdate, ResponsePhase, StreamReconciler};
use crate::wire::event::CanonicalEvent;

fn text(text: &str) -> CanonicalEvent {
    CanonicalEvent::TextDelta {
        text: text.to_string(),
    }
}

fn tool_start(id: &str, name: &str) -> CanonicalEvent {
    CanonicalEvent::ToolStart {
        id: id.to_string(),
        name: name.to_string(),
        parent_tool_use_id: None,
    }
}

fn tool_input(json: &str) -> CanonicalEvent {
    CanonicalEvent::ToolInput {
        json: json.to_string(),
    }
}

fn tool_result(id: Option<&str>, stdout: &str, is_error: bool) -> CanonicalEvent {
    CanonicalEvent::ToolResult {
        tool_use_id: id.map(str::to_string),
        stdout: stdout.to_string(),
        stderr: String::new(),
        is_error,
    }
}

#[test]
fn text_deltas_fold_into_one_finalized_message() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(&text("Hello, "), None);
    reconciler.apply(&text("world."), None);
    assert!(reconciler.is_loading());
    assert_eq!(reconciler.streaming_content(), "Hello, world.");

    reconciler.apply(&CanonicalEvent::Done, None);
    assert!(!reconciler.is_loading());
    let messages = reconciler.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::Assistant);
    assert_eq!(messages[0].content, "Hello, world.");
    assert!(!messages[0].interrupted);
    assert_eq!(
        messages[0].content_blocks,
        vec![ContentBlock::Text {
            text: "Hello, world.".to_string()
        }]
    );
}

#[test]
fn tool_blocks_interleave_with_text_in_emission_order() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(&text("Let me check. "), None);
    reconciler.apply(&tool_start("tool_1", "read_file"), None);
    reconciler.apply(&tool_input(r#"{"path":"a.txt"}"#), None);
    reconciler.apply(&CanonicalEvent::BlockEnd, None);
    reconciler.apply(&text("Done reading."), None);
    reconciler.apply(&CanonicalEvent::Done, None);

    let message = &reconciler.messages()[0];
    assert_eq!(
        message.content_blocks,
        vec![
            ContentBlock::Text {
                text: "Let me check. ".to_string()
            },
            ContentBlock::ToolUse {
                id: "tool_1".to_string()
            },
            ContentBlock::Text {
                text: "Done reading.".to_string()
            },
        ]
    );
    assert_eq!(message.tool_uses.len(), 1);
    assert_eq!(message.tool_uses[0].input, json!({"path": "a.txt"}));
}

#[test]
fn tool_input_fragments_parse_once_complete() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(&tool_start("tool_1", "search"), None);
    reconciler.apply(&tool_input(r#"{"query":"#), None);
    // Not yet parseable; the started tool still has its empty default.
    assert_eq!(reconciler.streaming_tool_uses()[0].input, json!({}));

    reconciler.apply(&tool_input(r#""rust""#), None);
    reconciler.apply(&tool_input("}"), None);
    assert_eq!(
        reconciler.streaming_tool_uses()[0].input,
        json!({"query": "rust"})
    );
}

#[test]
fn unparseable_tool_input_falls_back_to_raw_on_block_end() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(&tool_start("tool_1", "search"), None);
    reconciler.apply(&tool_input(r#"{"query": <broken"#), None);
    reconciler.apply(&CanonicalEvent::BlockEnd, None);

    assert_eq!(
        reconciler.streaming_tool_uses()[0].input,
        json!({"raw": r#"{"query": <broken"#})
    );
}

#[test]
fn tool_result_patches_matching_tool_by_id() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(&tool_start("tool_1", "Bash"), None);
    reconciler.apply(&tool_result(Some("tool_1"), "ok\n", false), None);

    let tool = &reconciler.streaming_tool_uses()[0];
    assert!(!tool.is_loading);
    assert_eq!(tool.result.as_deref(), Some("ok\n"));
    assert!(!tool.is_error);
}

#[test]
fn result_arriving_before_start_is_applied_retroactively() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.begin_turn();
    reconciler.apply(&tool_result(Some("tool_1"), "early output", false), None);
    // No tool registered yet, nothing to patch.
    assert!(reconciler.streaming_tool_uses().is_empty());

    reconciler.apply(&tool_start("tool_1", "Bash"), None);
    let tool = &reconciler.streaming_tool_uses()[0];
    assert_eq!(tool.result.as_deref(), Some("early output"));
    assert!(!tool.is_loading);

    // The side table was pruned: a second start for the same id must not
    // see a stale parked result.
    reconciler.apply(&CanonicalEvent::Done, None);
    reconciler.apply(&tool_start("tool_1", "Bash"), None);
    assert!(reconciler.streaming_tool_uses()[0].is_loading);
}

#[test]
fn orphaned_parked_result_is_dropped_at_turn_end() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.begin_turn();
    reconciler.apply(&tool_result(Some("tool_1"), "stray output", false), None);
    reconciler.apply(&CanonicalEvent::Done, None);

    // The start never arrived this turn; a same-id tool in the next turn
    // must not inherit the stale result.
    reconciler.apply(&tool_start("tool_1", "Bash"), None);
    let tool = &reconciler.streaming_tool_uses()[0];
    assert!(tool.is_loading);
    assert!(tool.result.is_none());
}

#[test]
fn ask_user_question_event_surfaces_questions_update() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(
        &CanonicalEvent::AskUserQuestion {
            request_id: "q-1".to_string(),
            questions: json!([{"question": "Proceed?"}]),
        },
        Some(&tx),
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        ReconcilerUpdate::QuestionsUpdated(json!([{"question": "Proceed?"}]))
    );
}

#[test]
fn error_result_auto_expands_tool() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(&tool_start("tool_1", "Bash"), None);
    reconciler.apply(&tool_result(Some("tool_1"), "command failed", true), None);

    let tool = &reconciler.streaming_tool_uses()[0];
    assert!(tool.is_error);
    assert!(tool.auto_expanded);
}

#[test]
fn empty_turn_finalizes_without_appending() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.begin_turn();
    assert!(reconciler.is_loading());

    let appended = reconciler.finish_streaming(false, None);
    assert!(appended.is_none());
    assert!(reconciler.messages().is_empty());
    assert!(!reconciler.is_loading());
}

#[test]
fn interrupt_finalizes_exactly_one_message_flagged_interrupted() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(&text("partial answ"), None);
    reconciler.stop_accepting();
    // Late deltas after the client-side stop are dropped.
    reconciler.apply(&text("er arriving late"), None);

    let appended = reconciler.finish_streaming(true, None);
    assert!(appended.is_some());
    let messages = reconciler.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].interrupted);
    assert_eq!(messages[0].content, "partial answ");
}

#[test]
fn error_event_sets_error_and_still_finalizes() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(&text("some progress"), None);
    reconciler.apply(
        &CanonicalEvent::Error {
            message: "transport failed".to_string(),
        },
        None,
    );

    assert_eq!(reconciler.error(), Some("transport failed"));
    assert!(!reconciler.is_loading());
    assert_eq!(reconciler.messages().len(), 1);
}

#[test]
fn thinking_deltas_accumulate_but_stay_out_of_content() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut reconciler = StreamReconciler::new(false);
    reconciler.apply(
        &CanonicalEvent::ThinkingDelta {
            thinking: "hmm".to_string(),
        },
        Some(&tx),
    );
    assert_eq!(reconciler.streaming_thinking(), "hmm");
    // Display disabled: no thinking update emitted.
    assert!(rx.try_recv().is_err());

    reconciler.set_show_thinking(true);
    reconciler.apply(
        &CanonicalEvent::ThinkingDelta {
            thinking: " okay".to_string(),
        },
        Some(&tx),
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        ReconcilerUpdate::ThinkingDelta(" okay".to_string())
    );

    reconciler.apply(&text("answer"), None);
    reconciler.apply(&CanonicalEvent::Done, None);
    assert_eq!(reconciler.messages()[0].content, "answer");
}

#[test]
fn compaction_status_resets_context_and_adds_faded_note() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.session_mut().total_context = 100_000;
    reconciler.apply(
        &CanonicalEvent::Status {
            message: "Compacted conversation".to_string(),
            is_compaction: true,
            pre_tokens: 100_000,
            post_tokens: 30_000,
        },
        None,
    );

    assert_eq!(reconciler.session().total_context, 30_000);
    let note = reconciler.messages().last().unwrap();
    assert_eq!(note.role, Role::System);
    assert!(note.faded);
    assert!(note.content.contains("100000"));
}

#[test]
fn context_update_seeds_base_and_clear_resets_to_it() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(
        &CanonicalEvent::ContextUpdate {
            input_tokens: 9_000,
            raw_input_tokens: 0,
            cache_read: 1_000,
            cache_write: 0,
        },
        None,
    );
    assert_eq!(reconciler.session().base_context, 10_000);
    assert_eq!(reconciler.session().total_context, 10_000);

    reconciler.apply(
        &CanonicalEvent::ContextUpdate {
            input_tokens: 40_000,
            raw_input_tokens: 0,
            cache_read: 5_000,
            cache_write: 0,
        },
        None,
    );
    assert_eq!(reconciler.session().base_context, 10_000);
    assert_eq!(reconciler.session().total_context, 45_000);

    reconciler.reset_context_to_base();
    assert_eq!(reconciler.session().total_context, 10_000);
}

#[test]
fn fade_and_divider_support_clear() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.push_user_message("first".to_string());
    reconciler.apply(&text("reply"), None);
    reconciler.apply(&CanonicalEvent::Done, None);

    reconciler.fade_all_messages();
    reconciler.push_divider();

    let messages = reconciler.messages();
    assert!(messages[0].faded);
    assert!(messages[1].faded);
    let divider = messages.last().unwrap();
    assert!(!divider.faded);
    assert_eq!(divider.variant, MessageVariant::Divider);
}

#[test]
fn message_ids_are_monotonic_per_session() {
    let mut reconciler = StreamReconciler::new(true);
    let a = reconciler.push_user_message("one".to_string());
    let b = reconciler.push_system_message("two".to_string());
    reconciler.apply(&text("three"), None);
    let c = reconciler.finish_streaming(false, None).unwrap();
    assert!(a < b && b < c);
}

#[test]
fn response_phase_follows_event_transitions() {
    let mut reconciler = StreamReconciler::new(true);
    assert_eq!(reconciler.phase(), ResponsePhase::AwaitingResponse);

    reconciler.apply(&text("x"), None);
    assert_eq!(reconciler.phase(), ResponsePhase::Streaming);

    reconciler.apply(&CanonicalEvent::ToolPending, None);
    assert_eq!(reconciler.phase(), ResponsePhase::ToolPending);

    reconciler.apply(&tool_result(None, "out", false), None);
    assert_eq!(reconciler.phase(), ResponsePhase::Streaming);

    reconciler.apply(
        &CanonicalEvent::Status {
            message: "Compacting conversation...".to_string(),
            is_compaction: false,
            pre_tokens: 0,
            post_tokens: 0,
        },
        None,
    );
    assert_eq!(reconciler.phase(), ResponsePhase::Compacting);
}

#[test]
fn phase_timeouts_match_documented_values() {
    use std::time::Duration;
    assert_eq!(
        ResponsePhase::AwaitingResponse.timeout(),
        Duration::from_millis(500)
    );
    assert_eq!(ResponsePhase::Streaming.timeout(), Duration::from_secs(2));
    assert_eq!(ResponsePhase::ToolPending.timeout(), Duration::from_secs(5));
    assert_eq!(ResponsePhase::AwaitingResponse.max_idle(), 60);
    assert_eq!(ResponsePhase::Streaming.max_idle(), 3);
    assert_eq!(ResponsePhase::ToolPending.max_idle(), 24);
    assert_eq!(ResponsePhase::Compacting.max_idle(), 30);
    assert!(ResponsePhase::Compacting.is_extended_wait());
    assert!(!ResponsePhase::Streaming.is_extended_wait());
}

#[test]
fn todo_tool_input_streams_through_validated_accumulator() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(&tool_start("tool_1", "TodoWrite"), Some(&tx));
    reconciler.apply(&tool_input(r#"{"todos":["#), Some(&tx));
    reconciler.apply(&tool_input(r#"{"text":"write tests"}]}"#), Some(&tx));

    let mut saw_todos = false;
    while let Ok(update) = rx.try_recv() {
        if let ReconcilerUpdate::TodosUpdated(value) = update {
            assert_eq!(value, json!({"todos": [{"text": "write tests"}]}));
            saw_todos = true;
        }
    }
    assert!(saw_todos);
}

#[test]
fn subagent_end_patches_matching_task_tool() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(&tool_start("tool_1", "Task"), None);
    reconciler.apply(
        &CanonicalEvent::SubagentStart {
            id: "tool_1".to_string(),
            agent_type: "Explore".to_string(),
            description: "Find files".to_string(),
            prompt: "search".to_string(),
        },
        None,
    );
    reconciler.apply(
        &CanonicalEvent::SubagentEnd {
            id: "tool_1".to_string(),
            agent_type: "Explore".to_string(),
            duration: 5_000,
            tool_count: 7,
            result: "Found 3 files".to_string(),
        },
        None,
    );

    let tool = &reconciler.streaming_tool_uses()[0];
    assert_eq!(tool.result.as_deref(), Some("Found 3 files"));
    assert!(!tool.is_loading);
}

#[test]
fn bg_task_result_without_tool_becomes_system_note_and_prunes() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(
        &CanonicalEvent::BgTaskRegistered {
            task_id: "bg_1".to_string(),
            description: "long build".to_string(),
        },
        None,
    );
    reconciler.apply(
        &CanonicalEvent::BgTaskResult {
            task_id: "bg_1".to_string(),
            status: "completed".to_string(),
            agent_type: "unknown".to_string(),
            result: "built ok".to_string(),
        },
        None,
    );

    let note = reconciler.messages().last().unwrap();
    assert_eq!(note.role, Role::System);
    assert!(note.content.contains("long build"));
    assert!(note.content.contains("built ok"));

    // A duplicate result no longer finds the pruned entry and falls back
    // to the bare task id.
    reconciler.apply(
        &CanonicalEvent::BgTaskResult {
            task_id: "bg_1".to_string(),
            status: "completed".to_string(),
            agent_type: "unknown".to_string(),
            result: String::new(),
        },
        None,
    );
    let note = reconciler.messages().last().unwrap();
    assert!(note.content.contains("bg_1"));
}

#[test]
fn stderr_composes_into_tool_output() {
    let mut reconciler = StreamReconciler::new(true);
    reconciler.apply(&tool_start("tool_1", "Bash"), None);
    reconciler.apply(
        &CanonicalEvent::ToolResult {
            tool_use_id: Some("tool_1".to_string()),
            stdout: "out".to_string(),
            stderr: "warning".to_string(),
            is_error: false,
        },
        None,
    );
    assert_eq!(
        reconciler.streaming_tool_uses()[0].result.as_deref(),
        Some("out\nwarning")
    );
}
