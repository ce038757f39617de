use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::permission::PermissionMode;
use crate::util::parse_bool_flag;

const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
const DEFAULT_START_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_REVIEW_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Key for the bot-mode safety reviewer. Optional; without it bot mode
    /// runs on rule tables alone.
    pub api_key: Option<String>,
    #[serde(skip)]
    pub permission_mode: PermissionMode,
    pub show_thinking: bool,
    pub poll_interval_ms: u64,
    pub start_timeout_ms: u64,
    pub review_timeout_ms: u64,
    pub working_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok().and_then(|v| {
            if v.trim().is_empty() {
                None
            } else {
                Some(v)
            }
        });
        let permission_mode = match std::env::var("DESKCHAT_PERMISSION_MODE") {
            Ok(raw) => raw.parse::<PermissionMode>()?,
            Err(_) => PermissionMode::default(),
        };
        let show_thinking = std::env::var("DESKCHAT_SHOW_THINKING")
            .ok()
            .and_then(parse_bool_flag)
            .unwrap_or(true);
        let poll_interval_ms =
            parse_env_u64("DESKCHAT_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let start_timeout_ms =
            parse_env_u64("DESKCHAT_START_TIMEOUT_MS", DEFAULT_START_TIMEOUT_MS)?;
        let review_timeout_ms =
            parse_env_u64("DESKCHAT_REVIEW_TIMEOUT_MS", DEFAULT_REVIEW_TIMEOUT_MS)?;

        Ok(Self {
            api_key,
            permission_mode,
            show_thinking,
            poll_interval_ms,
            start_timeout_ms,
            review_timeout_ms,
            working_dir: std::env::current_dir()?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("DESKCHAT_POLL_INTERVAL_MS must be greater than zero");
        }
        if self.start_timeout_ms == 0 {
            bail!("DESKCHAT_START_TIMEOUT_MS must be greater than zero");
        }
        if self.review_timeout_ms == 0 {
            bail!("DESKCHAT_REVIEW_TIMEOUT_MS must be greater than zero");
        }
        Ok(())
    }
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) => Ok(value),
            Err(_) => bail!("Invalid {name} '{raw}': expected an integer"),
        },
        Err(_) => Ok(default),
    }
}
