//! Structured-action grammar over free-form model output.
//!
//! The parser turns one raw model completion into exactly one typed action or
//! a [`FormatError`]. The grammar deliberately rejects ambiguity instead of
//! guessing: a wrong guess silently corrupts the simulated session, while a
//! `FormatError` becomes a visible correction prompt and the turn is retried.

use regex::Regex;

use crate::core::error::FormatError;

/// Typed action produced by the parser. Never persisted directly; the
/// orchestrator immediately converts it into one or more messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    /// Run a shell command. `content` is the trimmed fence body.
    Execute { reasoning: String, content: String },
    /// Say something to the agent. `content` is the trimmed fence body.
    Request { reasoning: String, content: String },
    /// End the session. `content` is the full payload text.
    Exit { reasoning: String, content: String },
}

impl UserAction {
    pub fn reasoning(&self) -> &str {
        match self {
            UserAction::Execute { reasoning, .. }
            | UserAction::Request { reasoning, .. }
            | UserAction::Exit { reasoning, .. } => reasoning,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            UserAction::Execute { content, .. }
            | UserAction::Request { content, .. }
            | UserAction::Exit { content, .. } => content,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UserAction::Execute { .. } => "execute",
            UserAction::Request { .. } => "request",
            UserAction::Exit { .. } => "exit",
        }
    }
}

/// Grammar parameters for one simulated party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserProfile {
    /// Delimiters around private deliberation.
    pub think_tags: (String, String),
    /// Delimiters around the outer payload.
    pub payload_tags: (String, String),
    /// Whether the think block must be present.
    pub think_required: bool,
    /// Substring of the payload that classifies the action as `exit`.
    pub exit_sentinel: String,
    /// Fence label for executable commands.
    pub command_fence: String,
    /// Fence label for agent requests. `None` for parties that can only
    /// execute (the request grammar is not scanned at all).
    pub request_fence: Option<String>,
}

impl ParserProfile {
    /// Simulated-user grammar: deliberation is mandatory, payload lives in
    /// `<response>` tags, and both command and request fences are legal.
    pub fn user() -> Self {
        Self {
            think_tags: ("<think>".to_string(), "</think>".to_string()),
            payload_tags: ("<response>".to_string(), "</response>".to_string()),
            think_required: true,
            exit_sentinel: "[USER END]".to_string(),
            command_fence: "bash".to_string(),
            request_fence: Some("request".to_string()),
        }
    }

    /// Autonomous-agent grammar: deliberation optional, payload in `<action>`
    /// tags, commands only.
    pub fn autonomous_agent() -> Self {
        Self {
            think_tags: ("<think>".to_string(), "</think>".to_string()),
            payload_tags: ("<action>".to_string(), "</action>".to_string()),
            think_required: false,
            exit_sentinel: "[TASK COMPLETE]".to_string(),
            command_fence: "bash".to_string(),
            request_fence: None,
        }
    }
}

/// Compiled tag/fence grammar for one profile.
#[derive(Debug)]
pub struct ActionParser {
    profile: ParserProfile,
    think_re: Regex,
    payload_re: Regex,
    command_re: Regex,
    request_re: Option<Regex>,
}

fn tag_pattern(tags: &(String, String)) -> String {
    format!(
        "(?s){}(.*?){}",
        regex::escape(&tags.0),
        regex::escape(&tags.1)
    )
}

fn fence_pattern(label: &str) -> String {
    format!(r"(?s)```{}\s*\n(.*?)\n```", regex::escape(label))
}

impl ActionParser {
    pub fn new(profile: ParserProfile) -> Self {
        let think_re = Regex::new(&tag_pattern(&profile.think_tags))
            .expect("think tag pattern should compile");
        let payload_re = Regex::new(&tag_pattern(&profile.payload_tags))
            .expect("payload tag pattern should compile");
        let command_re = Regex::new(&fence_pattern(&profile.command_fence))
            .expect("command fence pattern should compile");
        let request_re = profile.request_fence.as_deref().map(|label| {
            Regex::new(&fence_pattern(label)).expect("request fence pattern should compile")
        });
        Self {
            profile,
            think_re,
            payload_re,
            command_re,
            request_re,
        }
    }

    pub fn profile(&self) -> &ParserProfile {
        &self.profile
    }

    /// Ordered extraction: reasoning, payload, exit sentinel, fenced blocks.
    pub fn parse(&self, content: &str) -> Result<UserAction, FormatError> {
        let reasoning = match self.think_re.captures(content) {
            Some(caps) => caps[1].trim().to_string(),
            None if self.profile.think_required => {
                return Err(FormatError::new(format!(
                    "Missing {}...{} block",
                    self.profile.think_tags.0, self.profile.think_tags.1
                )));
            }
            None => String::new(),
        };

        let payload = self
            .payload_re
            .captures(content)
            .map(|caps| caps[1].trim().to_string())
            .ok_or_else(|| {
                FormatError::new(format!(
                    "Missing {}...{} block",
                    self.profile.payload_tags.0, self.profile.payload_tags.1
                ))
            })?;

        if payload.contains(&self.profile.exit_sentinel) {
            return Ok(UserAction::Exit {
                reasoning,
                content: payload,
            });
        }

        let commands: Vec<String> = self
            .command_re
            .captures_iter(&payload)
            .map(|caps| caps[1].trim().to_string())
            .collect();
        let requests: Vec<String> = self
            .request_re
            .as_ref()
            .map(|re| {
                re.captures_iter(&payload)
                    .map(|caps| caps[1].trim().to_string())
                    .collect()
            })
            .unwrap_or_default();

        match (commands.len(), requests.len()) {
            (1, 0) => Ok(UserAction::Execute {
                reasoning,
                content: commands.into_iter().next().expect("one command"),
            }),
            (0, 1) => Ok(UserAction::Request {
                reasoning,
                content: requests.into_iter().next().expect("one request"),
            }),
            (n_cmd, n_req) => Err(FormatError::new(format!(
                "Expected exactly one {} or {} block, got {} {} blocks and {} {} blocks",
                self.profile.command_fence,
                self.profile
                    .request_fence
                    .as_deref()
                    .unwrap_or("(unsupported)"),
                n_cmd,
                self.profile.command_fence,
                n_req,
                self.profile.request_fence.as_deref().unwrap_or("request"),
            ))),
        }
    }
}
