//! Visibility-scoped, append-only message store for one session.
//!
//! Every message carries the set of roles permitted to see it; `get(viewer)`
//! produces the viewer's history rendered for direct consumption as model
//! conversation input. Rendering is an explicit `(author, viewer)` table, not
//! cascading conditionals, so the "reasoning never leaks to the agent"
//! invariant stays independently testable.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Conversational polarity of a rendered history entry, in model wire terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A rendered history entry ready to feed a model as conversation input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Party that can author or view messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Environment,
    Orchestrator,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::Environment => "environment",
            Role::Orchestrator => "orchestrator",
            Role::System => "system",
        }
    }
}

/// One utterance or event in a session. Immutable once appended.
///
/// `action` holds a shell command when the message represents an execution;
/// `response` holds communicated text. Both may be empty for structural
/// messages such as format-error notices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub visible_to: Vec<Role>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub response: String,
}

impl Default for Role {
    fn default() -> Self {
        Role::System
    }
}

impl Message {
    pub fn response(role: Role, visible_to: &[Role], response: impl Into<String>) -> Self {
        Self {
            role,
            visible_to: visible_to.to_vec(),
            response: response.into(),
            ..Self::default()
        }
    }

    pub fn is_visible_to(&self, viewer: Role) -> bool {
        self.visible_to.contains(&viewer)
    }
}

/// Exit sentinel the render table needs to distinguish a terminal payload
/// from an ordinary request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRules {
    pub user_exit_sentinel: String,
}

impl Default for RenderRules {
    fn default() -> Self {
        Self {
            user_exit_sentinel: "[USER END]".to_string(),
        }
    }
}

/// Append-only conversation log with per-viewer filtered rendering.
#[derive(Debug, Clone, Default)]
pub struct SessionHistory {
    messages: Vec<Message>,
    rules: RenderRules,
}

impl SessionHistory {
    pub fn new(rules: RenderRules) -> Self {
        Self {
            messages: Vec::new(),
            rules,
        }
    }

    /// Append a message to the end of the log. Never fails, never reorders.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Render the history as the given viewer sees it, in append order.
    ///
    /// Messages the viewer is not permitted to see are filtered out; messages
    /// whose rendering is empty are dropped (no empty turns). Polarity is
    /// `assistant` for the viewer's own messages, `user` for everything else.
    pub fn get(&self, viewer: Role) -> Result<Vec<ChatMessage>> {
        let mut result = Vec::new();
        for msg in &self.messages {
            if !msg.is_visible_to(viewer) {
                continue;
            }
            let content = self.render(msg, viewer)?;
            if content.is_empty() {
                continue;
            }
            let role = if msg.role == viewer {
                ChatRole::Assistant
            } else {
                ChatRole::User
            };
            result.push(ChatMessage { role, content });
        }
        Ok(result)
    }

    /// Plain-text transcript for judge prompts: `[role] executed: cmd` or
    /// `[role]: response`. Orchestrator bookkeeping is skipped. `last_n`
    /// caps the view to the most recent messages.
    pub fn transcript(&self, last_n: Option<usize>) -> String {
        let start = last_n
            .map(|n| self.messages.len().saturating_sub(n))
            .unwrap_or(0);
        let mut lines = Vec::new();
        for msg in &self.messages[start..] {
            if msg.role == Role::Orchestrator {
                continue;
            }
            if !msg.action.is_empty() {
                lines.push(format!("[{}] executed: {}", msg.role.as_str(), msg.action));
            } else if !msg.response.is_empty() {
                lines.push(format!("[{}]: {}", msg.role.as_str(), msg.response));
            }
        }
        if lines.is_empty() {
            "(no history yet)".to_string()
        } else {
            lines.join("\n")
        }
    }

    /// Role-pair rendering table.
    ///
    /// The orchestrator viewer bypasses the table and gets a debug-complete
    /// rendering. An unmapped pair is a construction-time contract violation,
    /// not a runtime data condition, so it is a hard error.
    fn render(&self, msg: &Message, viewer: Role) -> Result<String> {
        if viewer == Role::Orchestrator {
            let parts: Vec<&str> = [&msg.reasoning, &msg.action, &msg.response]
                .into_iter()
                .filter(|s| !s.is_empty())
                .map(String::as_str)
                .collect();
            return Ok(parts.join("\n"));
        }

        let rendered = match (msg.role, viewer) {
            // The agent sees only what the user communicated. Reasoning and
            // raw commands must never leak across this boundary.
            (Role::User, Role::Agent) => msg.response.clone(),

            // The user sees its own prior deliberation in full tag form so
            // the user model keeps producing the expected grammar.
            (Role::User, Role::User) => {
                let body = if !msg.action.is_empty() {
                    format!("```bash\n{}\n```", msg.action)
                } else if msg.response.contains(&self.rules.user_exit_sentinel) {
                    msg.response.clone()
                } else {
                    format!("```request\n{}\n```", msg.response)
                };
                format!("<think>{}</think>\n<response>{}</response>", msg.reasoning, body)
            }

            (Role::Environment, Role::User) | (Role::Environment, Role::Agent) => {
                msg.response.clone()
            }

            (Role::Agent, Role::User) => format!("AI agent's response: {}", msg.response),

            (Role::Agent, Role::Agent) => {
                let body = if !msg.action.is_empty() {
                    format!("```bash\n{}\n```", msg.action)
                } else {
                    msg.response.clone()
                };
                if msg.reasoning.is_empty() {
                    body
                } else {
                    format!("<think>{}</think>\n<action>{}</action>", msg.reasoning, body)
                }
            }

            // Orchestrator-injected notices and perceptions.
            (Role::System, Role::User) | (Role::System, Role::Agent) => msg.response.clone(),

            (author, viewer) => bail!(
                "no render rule for {} -> {}",
                author.as_str(),
                viewer.as_str()
            ),
        };
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> SessionHistory {
        SessionHistory::new(RenderRules::default())
    }

    #[test]
    fn get_filters_by_visibility() {
        let mut h = history();
        h.append(Message::response(
            Role::User,
            &[Role::User, Role::Agent, Role::Orchestrator],
            "please help",
        ));
        h.append(Message {
            role: Role::User,
            visible_to: vec![Role::User, Role::Orchestrator],
            action: "ls -la".to_string(),
            ..Message::default()
        });

        assert_eq!(h.get(Role::Agent).expect("agent view").len(), 1);
        assert_eq!(h.get(Role::User).expect("user view").len(), 2);
        assert_eq!(h.get(Role::Orchestrator).expect("orch view").len(), 2);
    }

    #[test]
    fn reasoning_never_reaches_the_agent() {
        let mut h = history();
        h.append(Message {
            role: Role::User,
            visible_to: vec![Role::User, Role::Agent],
            reasoning: "SECRET deliberation".to_string(),
            response: "what does this error mean?".to_string(),
            ..Message::default()
        });

        let agent_view = h.get(Role::Agent).expect("agent view");
        assert_eq!(agent_view[0].content, "what does this error mean?");
        assert!(!agent_view[0].content.contains("SECRET"));

        let user_view = h.get(Role::User).expect("user view");
        assert!(user_view[0].content.contains("<think>SECRET deliberation</think>"));
        assert!(user_view[0].content.contains("```request\nwhat does this error mean?\n```"));
    }

    #[test]
    fn user_sees_own_action_as_bash_fence() {
        let mut h = history();
        h.append(Message {
            role: Role::User,
            visible_to: vec![Role::User],
            reasoning: "try it myself".to_string(),
            action: "cat /etc/hosts".to_string(),
            ..Message::default()
        });
        let view = h.get(Role::User).expect("user view");
        assert!(view[0].content.contains("```bash\ncat /etc/hosts\n```"));
    }

    #[test]
    fn user_exit_payload_is_rendered_raw() {
        let mut h = history();
        h.append(Message {
            role: Role::User,
            visible_to: vec![Role::User],
            reasoning: "done".to_string(),
            response: "[USER END] all set".to_string(),
            ..Message::default()
        });
        let view = h.get(Role::User).expect("user view");
        assert!(view[0].content.contains("<response>[USER END] all set</response>"));
        assert!(!view[0].content.contains("```request"));
    }

    #[test]
    fn polarity_is_assistant_only_for_own_messages() {
        let mut h = history();
        h.append(Message::response(Role::User, &[Role::User, Role::Agent], "hi"));
        h.append(Message::response(Role::Agent, &[Role::User, Role::Agent], "hello"));

        let agent_view = h.get(Role::Agent).expect("agent view");
        assert_eq!(agent_view[0].role, ChatRole::User);
        assert_eq!(agent_view[1].role, ChatRole::Assistant);

        let user_view = h.get(Role::User).expect("user view");
        assert_eq!(user_view[0].role, ChatRole::Assistant);
        assert_eq!(user_view[1].role, ChatRole::User);
        assert_eq!(user_view[1].content, "AI agent's response: hello");
    }

    #[test]
    fn empty_renderings_are_dropped() {
        let mut h = history();
        h.append(Message {
            role: Role::User,
            visible_to: vec![Role::Agent],
            reasoning: "private only".to_string(),
            ..Message::default()
        });
        assert!(h.get(Role::Agent).expect("agent view").is_empty());
    }

    #[test]
    fn orchestrator_sees_debug_complete_rendering() {
        let mut h = history();
        h.append(Message {
            role: Role::User,
            visible_to: vec![Role::Orchestrator],
            reasoning: "think".to_string(),
            action: "ls".to_string(),
            response: "note".to_string(),
            ..Message::default()
        });
        let view = h.get(Role::Orchestrator).expect("orch view");
        assert_eq!(view[0].content, "think\nls\nnote");
    }

    #[test]
    fn unmapped_pair_is_a_hard_error() {
        let mut h = history();
        h.append(Message::response(Role::Orchestrator, &[Role::Agent], "internal"));
        assert!(h.get(Role::Agent).is_err());
    }

    #[test]
    fn transcript_skips_orchestrator_and_caps_to_last_n() {
        let mut h = history();
        h.append(Message::response(Role::Orchestrator, &[Role::Orchestrator], "bookkeeping"));
        h.append(Message::response(Role::User, &[Role::User], "first"));
        h.append(Message {
            role: Role::User,
            visible_to: vec![Role::User],
            action: "pwd".to_string(),
            ..Message::default()
        });

        let full = h.transcript(None);
        assert_eq!(full, "[user]: first\n[user] executed: pwd");
        assert_eq!(h.transcript(Some(1)), "[user] executed: pwd");
        assert!(!full.contains("bookkeeping"));
    }
}
