//! Prompt templates for the user, the agent, and every orchestrator
//! judgment. Templates are embedded at compile time and rendered through
//! minijinja.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::io::config::UserConfig;

const USER_SYSTEM_TEMPLATE: &str = include_str!("prompts/user_system.md");
const USER_INSTANCE_TEMPLATE: &str = include_str!("prompts/user_instance.md");
const AGENT_SYSTEM_TEMPLATE: &str = include_str!("prompts/agent_system.md");
const PARSE_TASK_TEMPLATE: &str = include_str!("prompts/parse_task.md");
const NEXT_NODE_TEMPLATE: &str = include_str!("prompts/next_node.md");
const PERCEIVE_TEMPLATE: &str = include_str!("prompts/perceive.md");
const PROGRESS_TEMPLATE: &str = include_str!("prompts/progress.md");
const VALIDATE_TEMPLATE: &str = include_str!("prompts/validate.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("user_system", USER_SYSTEM_TEMPLATE),
            ("user_instance", USER_INSTANCE_TEMPLATE),
            ("agent_system", AGENT_SYSTEM_TEMPLATE),
            ("parse_task", PARSE_TASK_TEMPLATE),
            ("next_node", NEXT_NODE_TEMPLATE),
            ("perceive", PERCEIVE_TEMPLATE),
            ("progress", PROGRESS_TEMPLATE),
            ("validate", VALIDATE_TEMPLATE),
        ] {
            env.add_template(name, source)
                .unwrap_or_else(|e| panic!("{name} template should be valid: {e}"));
        }
        Self { env }
    }

    /// Persona and output grammar for the simulated user.
    pub fn render_user_system(&self, user: &UserConfig) -> Result<String> {
        let rendered = self.env.get_template("user_system")?.render(context! {
            profile => user.profile.trim(),
            behaviors => (!user.behaviors.trim().is_empty()).then(|| user.behaviors.trim()),
            think_open => user.think_tags.0,
            think_close => user.think_tags.1,
            response_open => user.response_tags.0,
            response_close => user.response_tags.1,
            command_fence => user.command_fence,
            request_fence => user.request_fence,
            exit_sentinel => user.exit_sentinel,
        })?;
        Ok(rendered)
    }

    /// Per-turn cognitive state injected ahead of the conversation.
    pub fn render_user_instance(
        &self,
        root_goal: &str,
        task_nodes: &str,
        memory: &str,
    ) -> Result<String> {
        let rendered = self.env.get_template("user_instance")?.render(context! {
            root_goal => root_goal.trim(),
            task_nodes => task_nodes,
            memory => memory,
        })?;
        Ok(rendered)
    }

    pub fn render_agent_system(&self) -> Result<String> {
        let rendered = self.env.get_template("agent_system")?.render(context! {})?;
        Ok(rendered)
    }

    pub fn render_parse_task(&self, task_spec: &str) -> Result<String> {
        let rendered = self.env.get_template("parse_task")?.render(context! {
            task_spec => task_spec.trim(),
        })?;
        Ok(rendered)
    }

    pub fn render_next_node(
        &self,
        task_tree_json: &str,
        session_history: &str,
        current_node_ids: &[String],
        current_turn: u32,
        max_turns: u32,
    ) -> Result<String> {
        let rendered = self.env.get_template("next_node")?.render(context! {
            task_tree => task_tree_json,
            session_history => session_history,
            task_nodes => format!("{current_node_ids:?}"),
            current_turn => current_turn,
            max_turns => max_turns,
        })?;
        Ok(rendered)
    }

    pub fn render_perceive(
        &self,
        task_spec: &str,
        session_history: &str,
        user_profile: &str,
        raw_response: &str,
        role: &str,
        current_index: usize,
    ) -> Result<String> {
        let rendered = self.env.get_template("perceive")?.render(context! {
            task_spec => task_spec.trim(),
            session_history => session_history,
            user_profile => user_profile,
            raw_response => raw_response,
            role => role,
            current_index => current_index,
        })?;
        Ok(rendered)
    }

    pub fn render_progress(
        &self,
        task_tree_json: &str,
        current_nodes: &str,
        recent_history: &str,
    ) -> Result<String> {
        let rendered = self.env.get_template("progress")?.render(context! {
            task_tree => task_tree_json,
            current_nodes => current_nodes,
            recent_history => recent_history,
        })?;
        Ok(rendered)
    }

    pub fn render_validate(
        &self,
        task_spec: &str,
        current_nodes: &str,
        action_type: &str,
        action_content: &str,
        reasoning: &str,
    ) -> Result<String> {
        let rendered = self.env.get_template("validate")?.render(context! {
            task_spec => task_spec.trim(),
            current_nodes => current_nodes,
            action_type => action_type,
            action_content => action_content,
            reasoning => reasoning,
        })?;
        Ok(rendered)
    }
}
