//! The AI assistant being benchmarked: a chat-only agent that answers from
//! its visible slice of the history. It executes nothing; the user relays
//! commands and output.

use anyhow::Result;

use crate::core::history::{ChatMessage, ChatRole, Role, SessionHistory};
use crate::io::prompt::PromptEngine;

#[derive(Debug, Default)]
pub struct ChatAgent;

impl ChatAgent {
    pub fn new() -> Self {
        Self
    }

    /// Conversation to send to the agent model: its system prompt plus the
    /// agent-visible history. Reasoning and raw user commands are absent by
    /// construction of the history view.
    pub fn build_prompt(
        &self,
        engine: &PromptEngine,
        history: &SessionHistory,
    ) -> Result<Vec<ChatMessage>> {
        let mut messages = vec![ChatMessage::new(
            ChatRole::System,
            engine.render_agent_system()?,
        )];
        messages.extend(history.get(Role::Agent)?);
        Ok(messages)
    }
}
