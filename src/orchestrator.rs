//! The session turn engine.
//!
//! One orchestrator owns one session end to end: the message store, the task
//! tree, and the user's memory. The user and agent only ever see filtered
//! views through `SessionHistory::get`. The loop is strictly sequential;
//! model queries and command executions are blocking calls.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agent::ChatAgent;
use crate::core::action::UserAction;
use crate::core::error::{ExecutionTimeout, FormatError, observation};
use crate::core::history::{ChatMessage, ChatRole, Message, RenderRules, Role, SessionHistory};
use crate::core::memory::UserMemory;
use crate::core::task::{TaskNode, decompose_from_text, find};
use crate::io::env::Environment;
use crate::io::model::Model;
use crate::io::prompt::PromptEngine;
use crate::policy::{Policy, TurnContext};
use crate::user::User;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The user issued a terminal exit action.
    Exited,
    /// The turn budget ran out first.
    StepLimit,
}

/// Everything a finished session leaves behind.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub messages: Vec<Message>,
    pub tree: TaskNode,
    pub turns: u32,
    pub outcome: SessionOutcome,
}

impl SessionReport {
    pub fn is_complete(&self) -> bool {
        self.tree.is_complete()
    }
}

pub struct Orchestrator<'a> {
    model: &'a dyn Model,
    env: &'a dyn Environment,
    policy: Box<dyn Policy + 'a>,
    engine: PromptEngine,
    user: User,
    agent: ChatAgent,
    instruction: String,
    max_turns: u32,
    history: SessionHistory,
    memory: UserMemory,
    tree: TaskNode,
}

impl<'a> Orchestrator<'a> {
    /// Build a session. When no pre-decomposed tree is supplied, the model
    /// is asked to decompose the instruction; any malformed decomposition
    /// degrades to a single-node tree rather than failing the session.
    pub fn new(
        model: &'a dyn Model,
        env: &'a dyn Environment,
        policy: Box<dyn Policy + 'a>,
        user: User,
        instruction: impl Into<String>,
        max_turns: u32,
        tree: Option<TaskNode>,
    ) -> Result<Self> {
        let instruction = instruction.into();
        let engine = PromptEngine::new();

        let tree = match tree {
            Some(tree) => tree,
            None => {
                let prompt = engine.render_parse_task(&instruction)?;
                let reply = model
                    .query(&[ChatMessage::new(ChatRole::User, prompt)])
                    .context("decompose task")?;
                decompose_from_text(&reply.content, &instruction)
            }
        };
        info!(nodes = crate::core::task::focus_order(&tree).len(), "task tree ready");

        let rules = RenderRules {
            user_exit_sentinel: user.exit_sentinel().to_string(),
        };

        Ok(Self {
            model,
            env,
            policy,
            engine,
            user,
            agent: ChatAgent::new(),
            instruction,
            max_turns,
            history: SessionHistory::new(rules),
            memory: UserMemory::new(),
            tree,
        })
    }

    /// Run the turn loop to completion.
    #[instrument(skip_all, fields(max_turns = self.max_turns))]
    pub fn run(&mut self) -> Result<SessionReport> {
        let Self {
            model,
            env,
            policy,
            engine,
            user,
            agent,
            instruction,
            max_turns,
            history,
            memory,
            tree,
        } = self;
        let model: &dyn Model = *model;
        let env: &dyn Environment = *env;
        let policy = policy.as_mut();
        let max_turns = *max_turns;

        let mut turn = 0u32;
        let outcome = loop {
            turn += 1;
            if turn > max_turns {
                history.append(Message::response(
                    Role::Orchestrator,
                    &[Role::Orchestrator],
                    observation(
                        "StepLimit",
                        &format!("Session ended after {max_turns} turns without completion."),
                        "",
                    ),
                ));
                info!(turns = max_turns, "step limit reached");
                break SessionOutcome::StepLimit;
            }

            let ctx = TurnContext {
                model,
                engine,
                task_spec: instruction,
                user_profile: user.profile(),
                turn,
                max_turns,
            };

            // 1. Focus selection.
            let focus_ids = policy.select_focus(&ctx, tree, history)?;
            let focus_text = render_focus(tree, &focus_ids);
            history.append(Message::response(
                Role::Orchestrator,
                &[Role::Orchestrator],
                format!("What is currently on user's mind:\n{focus_text}"),
            ));
            debug!(turn, focus = ?focus_ids, "turn started");

            // 2. Action generation. A format error becomes a visible
            // correction notice and the turn is retried; the only bound is
            // the global turn budget.
            let prompt = user.build_prompt(engine, &tree.description, &focus_text, memory, history)?;
            let reply = model.query(&prompt).context("query user model")?;
            let action = match user.parse(&reply.content) {
                Ok(action) => action,
                Err(e) => {
                    warn!(turn, err = %e, "malformed user action");
                    history.append(Message::response(
                        Role::Environment,
                        &[Role::User, Role::Orchestrator],
                        observation(
                            "FormatError",
                            e.message(),
                            "Reply with exactly one action in the required format.",
                        ),
                    ));
                    continue;
                }
            };
            info!(turn, kind = action.kind(), "user acted");

            // 3. Scope validation.
            let (reason, valid) = policy.validate_action(&ctx, &action, &focus_text)?;
            if !valid {
                warn!(turn, reason, "action rejected as out of scope");
                history.append(Message::response(
                    Role::Orchestrator,
                    &[Role::Orchestrator],
                    reason,
                ));
                continue;
            }

            // 4. Dispatch.
            let mut exiting = false;
            match action {
                UserAction::Request { reasoning, content } => {
                    history.append(Message {
                        role: Role::User,
                        visible_to: vec![Role::User, Role::Agent, Role::Orchestrator],
                        reasoning,
                        response: content,
                        ..Message::default()
                    });

                    let agent_prompt = agent.build_prompt(engine, history)?;
                    let agent_reply = model.query(&agent_prompt).context("query agent model")?;
                    history.append(Message::response(
                        Role::Agent,
                        &[Role::Agent, Role::Orchestrator],
                        &agent_reply.content,
                    ));

                    apply_perception(policy, &ctx, memory, history, &agent_reply.content, Role::Agent)?;
                }

                UserAction::Execute { reasoning, content } => {
                    // Raw commands are hidden from the agent.
                    history.append(Message {
                        role: Role::User,
                        visible_to: vec![Role::User, Role::Orchestrator],
                        reasoning,
                        action: content.clone(),
                        ..Message::default()
                    });

                    match env.execute(&content, None, None) {
                        Ok(result) => {
                            let output = if result.output.is_empty() {
                                format!(
                                    "Empty stdout & stderr from executing {content} - return code: {}",
                                    result.returncode
                                )
                            } else {
                                result.output
                            };
                            history.append(Message::response(
                                Role::Environment,
                                &[Role::Orchestrator],
                                &output,
                            ));
                            apply_perception(policy, &ctx, memory, history, &output, Role::Environment)?;
                        }
                        Err(err) => match err.downcast_ref::<ExecutionTimeout>() {
                            Some(timeout) => {
                                warn!(turn, command = %timeout.command, "execution timed out");
                                history.append(Message::response(
                                    Role::Environment,
                                    &[Role::User, Role::Orchestrator],
                                    observation(
                                        "ExecutionTimeout",
                                        &timeout.to_string(),
                                        "The command ran too long. Try a faster variant.",
                                    ),
                                ));
                            }
                            None => return Err(err),
                        },
                    }
                }

                UserAction::Exit { reasoning, content } => {
                    history.append(Message {
                        role: Role::User,
                        visible_to: vec![Role::User, Role::Agent, Role::Orchestrator],
                        reasoning,
                        response: content,
                        ..Message::default()
                    });
                    exiting = policy.exit_ends_session();
                    if !exiting {
                        debug!(turn, "exit deferred, traversal not exhausted");
                    }
                }
            }

            // 5. Progress update. Runs on the exit turn too, so the tree's
            // final state reflects the work the exit acknowledged.
            policy.update_progress(&ctx, tree, history)?;

            if exiting {
                info!(turn, "user ended the session");
                break SessionOutcome::Exited;
            }
        };

        Ok(SessionReport {
            messages: history.messages().to_vec(),
            tree: tree.clone(),
            turns: turn.min(max_turns),
            outcome,
        })
    }
}

/// Focus nodes as a prompt-ready bullet list.
fn render_focus(tree: &TaskNode, focus_ids: &[String]) -> String {
    let lines: Vec<String> = focus_ids
        .iter()
        .filter_map(|id| find(tree, id).map(|n| format!("- {}", n.description)))
        .collect();
    if lines.is_empty() {
        "(nothing yet)".to_string()
    } else {
        lines.join("\n")
    }
}

/// Run perception and append the result as what the user takes away.
///
/// A malformed perception judgment is recoverable: the orchestrator records
/// the violation for itself and the session moves on without a perception
/// for this turn. Anything else is a real failure.
fn apply_perception(
    policy: &mut dyn Policy,
    ctx: &TurnContext<'_>,
    memory: &mut UserMemory,
    history: &mut SessionHistory,
    raw: &str,
    source: Role,
) -> Result<()> {
    match policy.perceive(ctx, memory, raw, source, history) {
        Ok(perception) => {
            history.append(Message::response(
                Role::System,
                &[Role::User, Role::Orchestrator],
                perception,
            ));
            Ok(())
        }
        Err(err) => match err.downcast_ref::<FormatError>() {
            Some(format_err) => {
                warn!(err = %format_err, "perception judgment malformed, skipping");
                history.append(Message::response(
                    Role::Orchestrator,
                    &[Role::Orchestrator],
                    observation("FormatError", format_err.message(), ""),
                ));
                Ok(())
            }
            None => Err(err),
        },
    }
}
