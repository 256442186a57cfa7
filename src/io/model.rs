//! Model collaborator boundary.
//!
//! The [`Model`] trait decouples the orchestration loop from the actual LLM
//! backend. The production backend is a child process fed role-tagged
//! messages as JSON on stdin; tests use scripted models that return
//! predetermined completions without spawning anything.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::history::ChatMessage;
use crate::io::process::run_command_with_timeout;

/// Structured reply from a model backend. The text is unconstrained; the
/// action parser is the sole gate on structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReply {
    pub content: String,
}

/// Abstraction over model backends.
pub trait Model {
    /// Send an ordered conversation and return the completion.
    fn query(&self, messages: &[ChatMessage]) -> Result<ModelReply>;
}

/// Model backend that spawns a configured command, writes the message list
/// as a JSON array on stdin, and reads the completion from stdout.
pub struct CommandModel {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModel {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(anyhow!("model command must be a non-empty array"));
        }
        Ok(Self {
            command,
            timeout,
            output_limit_bytes,
        })
    }
}

impl Model for CommandModel {
    #[instrument(skip_all, fields(messages = messages.len(), timeout_secs = self.timeout.as_secs()))]
    fn query(&self, messages: &[ChatMessage]) -> Result<ModelReply> {
        let payload = serde_json::to_vec(messages)?;

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);

        let output = run_command_with_timeout(
            cmd,
            Some(&payload),
            self.timeout,
            self.output_limit_bytes,
        )?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model backend timed out");
            return Err(anyhow!(
                "model backend timed out after {:?}",
                self.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model backend failed");
            return Err(anyhow!(
                "model backend exited with status {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            ));
        }

        debug!(bytes = output.stdout.len(), "model backend replied");
        Ok(ModelReply {
            content: output.stdout_text(),
        })
    }
}
