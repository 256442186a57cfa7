//! Session configuration (TOML).
//!
//! This file is intended to be edited by humans and must remain stable and
//! automatable. Missing fields default to sensible values.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::action::ParserProfile;

/// Which orchestration policy drives focus, perception, and progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Model-judged focus selection, perception, and progress.
    #[default]
    Judged,
    /// DFS focus pointer with a fixed advance cadence; no judge calls.
    Symbolic,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Judged => "judged",
            Mode::Symbolic => "symbolic",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: Mode,
    /// Hard turn budget; the only cancellation mechanism a session has.
    pub max_turns: u32,
    /// Symbolic policy: advance the focus pointer every this many turns.
    pub advance_every_turns: u32,
    /// Symbolic perception: word budget for truncated prose.
    pub perceive_word_budget: usize,
    /// How many trailing messages progress judgments see.
    pub recent_history_messages: usize,
    /// Enable the scope-validation judgment (judged mode only).
    pub validation: bool,
    /// Base directory for session artifacts.
    pub jobs_dir: String,

    pub model: ModelConfig,
    pub environment: EnvironmentConfig,
    pub user: UserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Backend command, e.g. `["my-model-cli", "--json"]`. Receives the
    /// conversation as JSON on stdin and prints the completion.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Working directory for executed commands. Empty means the current dir.
    pub work_dir: String,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

/// Grammar and persona of the simulated user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserConfig {
    pub think_tags: (String, String),
    pub response_tags: (String, String),
    pub exit_sentinel: String,
    pub command_fence: String,
    pub request_fence: String,
    pub profile: String,
    pub behaviors: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            max_turns: 100,
            advance_every_turns: 2,
            perceive_word_budget: 64,
            recent_history_messages: 10,
            validation: false,
            jobs_dir: "jobs".to_string(),
            model: ModelConfig::default(),
            environment: EnvironmentConfig::default(),
            user: UserConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 600,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            work_dir: String::new(),
            timeout_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

impl UserConfig {
    /// Parser grammar for this party. Deliberation is always required of the
    /// simulated user.
    pub fn parser_profile(&self) -> ParserProfile {
        ParserProfile {
            think_tags: self.think_tags.clone(),
            payload_tags: self.response_tags.clone(),
            think_required: true,
            exit_sentinel: self.exit_sentinel.clone(),
            command_fence: self.command_fence.clone(),
            request_fence: Some(self.request_fence.clone()),
        }
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        let profile = ParserProfile::user();
        Self {
            think_tags: profile.think_tags,
            response_tags: profile.payload_tags,
            exit_sentinel: profile.exit_sentinel,
            command_fence: profile.command_fence,
            request_fence: profile.request_fence.unwrap_or_default(),
            profile: "A junior developer learning to code".to_string(),
            behaviors: String::new(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(anyhow!("max_turns must be > 0"));
        }
        if self.advance_every_turns == 0 {
            return Err(anyhow!("advance_every_turns must be > 0"));
        }
        if self.perceive_word_budget == 0 {
            return Err(anyhow!("perceive_word_budget must be > 0"));
        }
        if self.model.timeout_secs == 0 || self.environment.timeout_secs == 0 {
            return Err(anyhow!("timeouts must be > 0"));
        }
        if self.model.output_limit_bytes == 0 || self.environment.output_limit_bytes == 0 {
            return Err(anyhow!("output limits must be > 0"));
        }
        if self.user.command_fence.trim().is_empty() || self.user.request_fence.trim().is_empty() {
            return Err(anyhow!("fence labels must be non-empty"));
        }
        if self.user.exit_sentinel.trim().is_empty() {
            return Err(anyhow!("exit_sentinel must be non-empty"));
        }
        Ok(())
    }

    /// Parser grammar derived from the user section.
    pub fn user_parser_profile(&self) -> ParserProfile {
        self.user.parser_profile()
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model.timeout_secs)
    }

    pub fn environment_timeout(&self) -> Duration {
        Duration::from_secs(self.environment.timeout_secs)
    }
}

/// Load config from a TOML file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<SessionConfig> {
    if !path.exists() {
        let cfg = SessionConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SessionConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SessionConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');

    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
