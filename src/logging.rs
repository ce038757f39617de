use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;

const DEFAULT_LOG_PATH: &str = "/tmp/deskchat-debug-events.log";
const DEBUG_EVENTS_ENV: &str = "DESKCHAT_DEBUG_EVENTS";
const LOG_PATH_ENV: &str = "DESKCHAT_LOG_PATH";

pub fn debug_events_enabled() -> bool {
    std::env::var(DEBUG_EVENTS_ENV)
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Record a wire event whose `type` tag was missing or unrecognized.
pub fn emit_unknown_event(type_tag: Option<&str>, raw: &Value) {
    if !debug_events_enabled() {
        return;
    }
    let message = format!(
        "DESKCHAT WARN unknown_event type={}\nraw:\n{raw}\n",
        type_tag.unwrap_or("<none>")
    );
    emit_log_message(&message);
}

/// Record a permission decision (auto-approve, review verdict, manual).
pub fn emit_permission_decision(tool_name: &str, allow: bool, source: &str) {
    if !debug_events_enabled() {
        return;
    }
    let message =
        format!("DESKCHAT INFO permission_decision tool={tool_name} allow={allow} via={source}\n");
    emit_log_message(&message);
}

fn emit_log_message(message: &str) {
    if append_log_file(&resolve_log_path(), message).is_ok() {
        return;
    }
    eprintln!("{message}");
}

fn resolve_log_path() -> String {
    std::env::var(LOG_PATH_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_PATH.to_string())
}

fn append_log_file(path: &str, message: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(message.as_bytes())
}
