use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub safe: bool,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub tool_name: String,
    pub tool_input: Value,
    pub description: Option<String>,
}

struct CommandRule {
    pattern: &'static str,
    reason: &'static str,
}

struct PathRule {
    patterns: &'static [&'static str],
    reason: &'static str,
}

// Checked in order against Bash commands; first match wins.
static BASH_RULES: &[CommandRule] = &[
    CommandRule {
        pattern: r"rm\s+-rf\s+/($|[^a-zA-Z])|rm\s+-rf\s+~|rm\s+-rf\s+\$HOME",
        reason: "Catastrophic deletion: would delete system or home directory",
    },
    CommandRule {
        pattern: r"(^|\s)sudo\s",
        reason: "Privilege escalation: requires sudo",
    },
    CommandRule {
        pattern: r"mkfs|dd\s+if=",
        reason: "Dangerous disk operation: could format or overwrite disk",
    },
    CommandRule {
        pattern: r"\|\s*(curl|wget|bash|sh)\s*$|\|\s*(curl|wget|bash|sh)\s",
        reason: "Potential code injection: piping to curl or shell",
    },
    CommandRule {
        pattern: r"git\s+reset\s+--hard",
        reason: "git reset --hard discards uncommitted changes. This could lose work.",
    },
    CommandRule {
        pattern: r"git\s+push\s+(-f|--force)",
        reason: "git push --force overwrites remote history. This could lose others' work.",
    },
    CommandRule {
        pattern: r"git\s+clean\s+-f",
        reason: "git clean -f permanently deletes untracked files. No undo available.",
    },
    CommandRule {
        pattern: r"(^|[;&|]\s*)>\s*[^>]",
        reason: "File truncation: '>' without command empties the file instantly.",
    },
    CommandRule {
        pattern: r":\|:|:\(\)",
        reason: "Fork bomb detected: would crash the system.",
    },
    CommandRule {
        pattern: r"(?i)(curl|wget).*[@<].*(\.env|\.pem|\.key|\.crt|id_rsa|id_ed25519|credentials|\.aws|\.ssh|\.gnupg|\.netrc|password|secret|token)",
        reason: "Potential data exfiltration: uploading sensitive file via curl/wget.",
    },
    CommandRule {
        pattern: r"(curl|wget).*\$(AWS|ANTHROPIC|OPENAI|API_KEY|SECRET|TOKEN|PASSWORD|GITHUB)",
        reason: "Potential credential exfiltration: sending env vars via network request.",
    },
    CommandRule {
        pattern: r"security\s+(find-generic-password|find-internet-password|dump-keychain)",
        reason: "Keychain access: attempting to read credentials from macOS keychain.",
    },
    CommandRule {
        pattern: r"(?i)(cat|head|tail|less|more|grep|awk|sed)\s+.*(\.(bash_history|zsh_history|psql_history|mysql_history|git-credentials|netrc)|\.aws/credentials)",
        reason: "Reading sensitive file: history or credentials file access.",
    },
    CommandRule {
        pattern: r"(?i)(cp|mv|tee|install)\s.*LaunchAgents|(LaunchAgents|LaunchDaemons).*(>|cp\s|mv\s|tee\s)",
        reason: "Persistence mechanism: modifying macOS LaunchAgents/Daemons.",
    },
    CommandRule {
        pattern: r"\.git/hooks/.*(>|cp\s|mv\s|chmod\s|tee\s)|>\s*\.git/hooks/|(cp|mv|tee|chmod)\s.*\.git/hooks/",
        reason: "Git hook modification: could execute code on git operations.",
    },
    CommandRule {
        pattern: r"base64.*(\|\s*(bash|sh)|eval)|eval\s*.*base64",
        reason: "Obfuscated code execution: base64 decoded content being executed.",
    },
];

static WRITE_PATH_RULES: &[PathRule] = &[
    PathRule {
        patterns: &["~/.", "$HOME/.", "/.config/", "/.local/", "/.ssh/"],
        reason: "Writing to home directory config: could modify your personal settings.",
    },
    PathRule {
        patterns: &["/etc/", "/usr/", "/var/", "/System/"],
        reason: "Writing to system directory: could affect system stability.",
    },
];

static READ_SENSITIVE_FILES: &[PathRule] = &[
    PathRule {
        patterns: &[
            ".bash_history",
            ".zsh_history",
            ".psql_history",
            ".mysql_history",
        ],
        reason: "Reading shell history file: contains command history which may include sensitive information.",
    },
    PathRule {
        patterns: &[
            ".git-credentials",
            ".netrc",
            ".aws/credentials",
            ".ssh/id_",
            "id_rsa",
            "id_ed25519",
        ],
        reason: "Reading credential file: contains authentication credentials.",
    },
];

static COMPILED_BASH_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    BASH_RULES
        .iter()
        .filter_map(|rule| Regex::new(rule.pattern).ok().map(|re| (re, rule.reason)))
        .collect()
});

/// Rule-based verdict without any network call. `None` means no rule
/// matched and the heavier review path decides.
pub fn instant_decision(request: &ReviewRequest) -> Option<ReviewResult> {
    if request.tool_name == "Write" || request.tool_name == "Edit" {
        return check_write_path(request);
    }
    if request.tool_name.eq_ignore_ascii_case("Read") {
        return check_read_path(request);
    }
    if request.tool_name.eq_ignore_ascii_case("Bash") {
        return check_bash_command(request);
    }
    None
}

fn input_path(request: &ReviewRequest) -> &str {
    request
        .tool_input
        .get("file_path")
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn check_write_path(request: &ReviewRequest) -> Option<ReviewResult> {
    let file_path = input_path(request);

    // Dotfiles directly under a macOS home directory.
    if file_path.starts_with("/Users/") && file_path.contains("/.") {
        return Some(ReviewResult {
            safe: false,
            reason: format!(
                "Writing to home directory config: {file_path}. This could modify your personal settings."
            ),
        });
    }

    for rule in WRITE_PATH_RULES {
        for pattern in rule.patterns {
            if file_path.contains(pattern) || file_path.starts_with(pattern) {
                return Some(ReviewResult {
                    safe: false,
                    reason: format!("{} Path: {file_path}", rule.reason),
                });
            }
        }
    }
    None
}

fn check_read_path(request: &ReviewRequest) -> Option<ReviewResult> {
    let file_path = input_path(request);
    for rule in READ_SENSITIVE_FILES {
        for pattern in rule.patterns {
            if file_path.contains(pattern) {
                return Some(ReviewResult {
                    safe: false,
                    reason: format!("{} Path: {file_path}", rule.reason),
                });
            }
        }
    }
    None
}

fn check_bash_command(request: &ReviewRequest) -> Option<ReviewResult> {
    let command = request
        .tool_input
        .get("command")
        .and_then(Value::as_str)
        .or_else(|| request.tool_input.get("cmd").and_then(Value::as_str))
        .or_else(|| request.tool_input.get("script").and_then(Value::as_str))
        .unwrap_or("");

    for (regex, reason) in COMPILED_BASH_RULES.iter() {
        if regex.is_match(command) {
            return Some(ReviewResult {
                safe: false,
                reason: (*reason).to_string(),
            });
        }
    }
    None
}

const REVIEW_MODEL: &str = "claude-3-haiku-20240307";
const REVIEW_MAX_TOKENS: u32 = 150;
const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Safety reviewer for bot-mode permission arbitration.
///
/// Rule tables decide first; when no rule matches and an API key is
/// configured, an LLM call decides. Without a key, an unmatched request is
/// treated as safe. Any failure of the LLM path resolves to unsafe so the
/// request falls through to a manual decision instead of hanging.
pub struct SafetyReviewer {
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl SafetyReviewer {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            api_key,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub async fn review(&self, request: &ReviewRequest) -> ReviewResult {
        if let Some(result) = instant_decision(request) {
            return result;
        }

        let Some(api_key) = self.api_key.as_deref() else {
            return ReviewResult {
                safe: true,
                reason: "No safety rule matched".to_string(),
            };
        };

        match self.call_review_api(api_key, request).await {
            Ok(result) => result,
            Err(error) => ReviewResult {
                safe: false,
                reason: format!("Review failed ({error:#}); manual decision required"),
            },
        }
    }

    async fn call_review_api(&self, api_key: &str, request: &ReviewRequest) -> Result<ReviewResult> {
        let body = serde_json::json!({
            "model": REVIEW_MODEL,
            "max_tokens": REVIEW_MAX_TOKENS,
            "messages": [{ "role": "user", "content": build_prompt(request) }],
        });

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("review API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("review API error ({status}): {body}");
        }

        let json: Value = response
            .json()
            .await
            .context("failed to decode review API response")?;
        let text = json["content"][0]["text"]
            .as_str()
            .ok_or_else(|| anyhow!("no text in review API response"))?;
        parse_verdict(text)
    }
}

fn build_prompt(request: &ReviewRequest) -> String {
    let tool_input = serde_json::to_string_pretty(&request.tool_input).unwrap_or_default();
    let description = request
        .description
        .as_ref()
        .map(|d| format!("\nDescription: {d}"))
        .unwrap_or_default();

    format!(
        r#"You are a security reviewer for a developer tool. FLAG operations that could cause data loss, security issues, or unauthorized access.

APPROVE (safe operations):
- Reading any files (including system files for debugging)
- Writing/editing files within the project directory
- Build commands: npm, cargo, pip, make, etc.
- Test commands: npm test, cargo test, pytest, etc.
- Safe git: status, diff, log, add, commit, branch, pull, fetch, push (without --force)
- Navigation: ls, cd, find, grep
- Creating directories, copying files within project
- Normal API calls (curl/wget without sensitive data)

FLAG (dangerous operations):
- Deleting files outside the project, destructive git (reset --hard, push --force, clean -f)
- File truncation, database destruction, rm -rf with possibly-empty variables
- Uploading sensitive files or env vars externally, reading credential or history files
- Keychain access, SSH key reads
- Persistence: LaunchAgents, git hooks, shell profile modification
- Obfuscated or remote code execution (base64 | bash, curl | sh)
- System changes: chmod/chown on system dirs, broad process kills, chmod -R 777

When genuinely uncertain, FLAG and explain why. Better to ask than destroy.

Tool: {}{}
Input:
{}

Respond ONLY with valid JSON (no markdown):
{{"safe": true/false, "reason": "brief explanation"}}"#,
        request.tool_name, description, tool_input
    )
}

fn parse_verdict(text: &str) -> Result<ReviewResult> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    };
    serde_json::from_str::<ReviewResult>(json).context("unparseable review verdict")
}
