//! The simulated user: prompt assembly and action parsing.
//!
//! The user never talks to the model directly; the orchestrator owns the
//! model handle and feeds completions back through [`User::parse`]. This
//! keeps the user a pure function of configuration and visible state.

use anyhow::Result;

use crate::core::action::{ActionParser, UserAction};
use crate::core::error::FormatError;
use crate::core::history::{ChatMessage, ChatRole, Role, SessionHistory};
use crate::core::memory::UserMemory;
use crate::io::config::UserConfig;
use crate::io::prompt::PromptEngine;

pub struct User {
    config: UserConfig,
    parser: ActionParser,
}

impl User {
    pub fn new(config: UserConfig) -> Self {
        let parser = ActionParser::new(config.parser_profile());
        Self { config, parser }
    }

    pub fn profile(&self) -> &str {
        &self.config.profile
    }

    pub fn exit_sentinel(&self) -> &str {
        &self.config.exit_sentinel
    }

    /// Full conversation to send to the user model this turn: persona system
    /// prompt, per-turn cognitive state, then the user-visible history.
    pub fn build_prompt(
        &self,
        engine: &PromptEngine,
        root_goal: &str,
        task_nodes: &str,
        memory: &UserMemory,
        history: &SessionHistory,
    ) -> Result<Vec<ChatMessage>> {
        let mut messages = vec![
            ChatMessage::new(ChatRole::System, engine.render_user_system(&self.config)?),
            ChatMessage::new(
                ChatRole::User,
                engine.render_user_instance(root_goal, task_nodes, &memory.to_prompt())?,
            ),
        ];
        messages.extend(history.get(Role::User)?);
        Ok(messages)
    }

    pub fn parse(&self, content: &str) -> Result<UserAction, FormatError> {
        self.parser.parse(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::history::Message;

    fn user() -> User {
        User::new(UserConfig::default())
    }

    #[test]
    fn prompt_is_system_then_instance_then_history() {
        let engine = PromptEngine::new();
        let mut history = SessionHistory::default();
        history.append(Message::response(
            Role::Agent,
            &[Role::User, Role::Orchestrator],
            "try ls",
        ));

        let messages = user()
            .build_prompt(&engine, "learn the shell", "- run ls", &UserMemory::new(), &history)
            .expect("build");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[1].content.contains("learn the shell"));
        assert!(messages[1].content.contains("(nothing yet)"));
        assert!(messages[2].content.contains("AI agent's response: try ls"));
    }

    #[test]
    fn parse_uses_the_configured_grammar() {
        let action = user()
            .parse("<think>R</think><response>```bash\npwd\n```</response>")
            .expect("parse");
        assert_eq!(action.kind(), "execute");
        assert_eq!(action.content(), "pwd");
    }
}
