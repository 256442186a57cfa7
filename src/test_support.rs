//! Test-only helpers: deterministic task-node builders and scripted
//! model/environment doubles that replay canned replies without spawning
//! processes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::error::ExecutionTimeout;
use crate::core::history::ChatMessage;
use crate::core::task::TaskNode;
use crate::io::env::{Environment, ExecResult};
use crate::io::model::{Model, ModelReply};

/// Create a deterministic leaf with default fields.
pub fn task_leaf(id: &str) -> TaskNode {
    TaskNode {
        id: id.to_string(),
        description: format!("{id} description"),
        children: Vec::new(),
        status: Default::default(),
    }
}

/// Create a node with children using deterministic defaults.
pub fn task_node(id: &str, children: Vec<TaskNode>) -> TaskNode {
    TaskNode {
        children,
        ..task_leaf(id)
    }
}

/// Model double that replays a fixed sequence of completions and records
/// every conversation it was asked.
pub struct ScriptedModel {
    replies: RefCell<VecDeque<String>>,
    queries: RefCell<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().map(Into::into).collect()),
            queries: RefCell::new(Vec::new()),
        }
    }

    /// Conversations seen so far, in query order.
    pub fn queries(&self) -> Vec<Vec<ChatMessage>> {
        self.queries.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl Model for ScriptedModel {
    fn query(&self, messages: &[ChatMessage]) -> Result<ModelReply> {
        self.queries.borrow_mut().push(messages.to_vec());
        let content = self
            .replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model ran out of replies"))?;
        Ok(ModelReply { content })
    }
}

/// One scripted execution outcome.
#[derive(Debug, Clone)]
pub enum ScriptedExec {
    Succeed { output: String, returncode: i32 },
    TimeOut { partial_output: String },
}

impl ScriptedExec {
    pub fn ok(output: impl Into<String>) -> Self {
        ScriptedExec::Succeed {
            output: output.into(),
            returncode: 0,
        }
    }
}

/// Environment double that replays scripted execution outcomes and records
/// the commands it received.
pub struct ScriptedEnv {
    outcomes: RefCell<VecDeque<ScriptedExec>>,
    commands: RefCell<Vec<String>>,
    work_dir: PathBuf,
}

impl ScriptedEnv {
    pub fn new(outcomes: impl IntoIterator<Item = ScriptedExec>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into_iter().collect()),
            commands: RefCell::new(Vec::new()),
            work_dir: PathBuf::from("."),
        }
    }

    /// Commands executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl Environment for ScriptedEnv {
    fn execute(
        &self,
        command: &str,
        _cwd: Option<&Path>,
        _timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        self.commands.borrow_mut().push(command.to_string());
        let outcome = self
            .outcomes
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted environment ran out of outcomes"))?;
        match outcome {
            ScriptedExec::Succeed { output, returncode } => Ok(ExecResult { output, returncode }),
            ScriptedExec::TimeOut { partial_output } => Err(anyhow::Error::new(ExecutionTimeout {
                command: command.to_string(),
                partial_output,
            })),
        }
    }

    fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}
