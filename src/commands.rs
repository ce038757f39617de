use anyhow::{bail, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyInput {
    pub key: String,
    pub code: String,
    pub alt: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl From<KeyEvent> for KeyInput {
    fn from(event: KeyEvent) -> Self {
        let (key, code) = match event.code {
            KeyCode::Char(c) => {
                let code = if c.is_ascii_alphabetic() {
                    format!("Key{}", c.to_ascii_uppercase())
                } else if c.is_ascii_digit() {
                    format!("Digit{c}")
                } else {
                    String::new()
                };
                (c.to_lowercase().to_string(), code)
            }
            KeyCode::Esc => ("escape".to_string(), "Escape".to_string()),
            KeyCode::Enter => ("enter".to_string(), "Enter".to_string()),
            KeyCode::Tab => ("tab".to_string(), "Tab".to_string()),
            KeyCode::Backspace => ("backspace".to_string(), "Backspace".to_string()),
            _ => (String::new(), String::new()),
        };
        Self {
            key,
            code,
            alt: event.modifiers.contains(KeyModifiers::ALT),
            ctrl: event.modifiers.contains(KeyModifiers::CONTROL),
            meta: event.modifiers.contains(KeyModifiers::SUPER),
            shift: event.modifiers.contains(KeyModifiers::SHIFT),
        }
    }
}

/// A parsed `mod+mod+key` chord. Modifier matching is exact: a chord
/// without shift does not fire when shift is held.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyChord {
    pub alt: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub key: String,
}

impl KeyChord {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut chord = Self {
            alt: false,
            ctrl: false,
            meta: false,
            shift: false,
            key: String::new(),
        };
        let tokens: Vec<&str> = spec.split('+').map(str::trim).collect();
        if tokens.is_empty() || tokens.iter().any(|t| t.is_empty()) {
            bail!("invalid key chord '{spec}'");
        }
        let Some((key, modifiers)) = tokens.split_last() else {
            bail!("invalid key chord '{spec}'");
        };
        for modifier in modifiers {
            match modifier.to_ascii_lowercase().as_str() {
                "alt" | "option" => chord.alt = true,
                "ctrl" | "control" => chord.ctrl = true,
                "cmd" | "meta" | "super" => chord.meta = true,
                "shift" => chord.shift = true,
                other => bail!("unknown modifier '{other}' in chord '{spec}'"),
            }
        }
        chord.key = key.to_lowercase();
        if chord.key.is_empty() {
            bail!("key chord '{spec}' has no key");
        }
        Ok(chord)
    }

    fn expected_code(&self) -> Option<String> {
        let mut chars = self.key.chars();
        let (Some(c), None) = (chars.next(), chars.next()) else {
            return None;
        };
        if c.is_ascii_alphabetic() {
            Some(format!("Key{}", c.to_ascii_uppercase()))
        } else if c.is_ascii_digit() {
            Some(format!("Digit{c}"))
        } else {
            None
        }
    }

    /// All four modifiers must match exactly; the key matches by name or
    /// by code.
    pub fn matches(&self, input: &KeyInput) -> bool {
        if self.alt != input.alt
            || self.ctrl != input.ctrl
            || self.meta != input.meta
            || self.shift != input.shift
        {
            return false;
        }
        if input.key.eq_ignore_ascii_case(&self.key) {
            return true;
        }
        self.expected_code()
            .is_some_and(|code| !input.code.is_empty() && input.code == code)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandAction {
    Clear,
    Interrupt,
    Resume,
    ToggleThinking,
}

struct CommandEntry {
    name: &'static str,
    action: CommandAction,
    binding: Option<KeyChord>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Command(CommandAction),
    Forward(String),
    Shell(String),
    Prompt(String),
}

pub struct CommandRegistry {
    entries: Vec<CommandEntry>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CommandRegistry {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("clear", CommandAction::Clear, None);
        registry.register("resume", CommandAction::Resume, None);
        registry.register("interrupt", CommandAction::Interrupt, Some("escape"));
        registry.register("thinking", CommandAction::ToggleThinking, Some("alt+t"));
        registry
    }

    pub fn register(&mut self, name: &'static str, action: CommandAction, binding: Option<&str>) {
        let binding = binding.and_then(|spec| KeyChord::parse(spec).ok());
        self.entries.push(CommandEntry {
            name,
            action,
            binding,
        });
    }

    /// Dispatch one line of input. Unregistered slash commands are
    /// forwarded verbatim so backend-owned commands (compaction among
    /// them) pass through.
    pub fn dispatch_text(&self, input: &str) -> Dispatch {
        if let Some(command) = input.strip_prefix('!') {
            return Dispatch::Shell(command.trim().to_string());
        }
        if let Some(rest) = input.strip_prefix('/') {
            let name = rest.split_whitespace().next().unwrap_or("").to_lowercase();
            for entry in &self.entries {
                if entry.name == name {
                    return Dispatch::Command(entry.action);
                }
            }
            return Dispatch::Forward(input.to_string());
        }
        Dispatch::Prompt(input.to_string())
    }

    pub fn dispatch_key(&self, input: &KeyInput) -> Option<CommandAction> {
        self.entries
            .iter()
            .find(|entry| {
                entry
                    .binding
                    .as_ref()
                    .is_some_and(|chord| chord.matches(input))
            })
            .map(|entry| entry.action)
    }
}
