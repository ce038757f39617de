use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
    pub is_loading: bool,
    pub result: Option<String>,
    pub is_error: bool,
    pub auto_expanded: bool,
}

impl ToolUse {
    pub fn started(id: String, name: String) -> Self {
        Self {
            id,
            name,
            input: Value::Object(serde_json::Map::new()),
            is_loading: true,
            result: None,
            is_error: false,
            auto_expanded: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageVariant {
    #[default]
    Plain,
    Divider,
}

/// A finalized conversation entry. Immutable once appended except for
/// targeted patches (a tool result landing while its ToolUse is still
/// loading, or the presentation-only fade on clear).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub role: Role,
    pub content: String,
    pub tool_uses: Vec<ToolUse>,
    pub content_blocks: Vec<ContentBlock>,
    pub faded: bool,
    pub variant: MessageVariant,
    pub interrupted: bool,
}

impl Message {
    pub fn new(id: u64, role: Role, content: String) -> Self {
        Self {
            id,
            role,
            content,
            tool_uses: Vec::new(),
            content_blocks: Vec::new(),
            faded: false,
            variant: MessageVariant::Plain,
            interrupted: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub model: String,
    pub tools: u32,
    pub total_context: u64,
    /// Pre-conversation token count; clear resets the display to this,
    /// not to zero.
    pub base_context: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
}
