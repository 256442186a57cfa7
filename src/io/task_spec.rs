//! Task directory loading and task-tree schema validation.
//!
//! A task lives in `<task_dir>/<task_name>/` and consists of:
//! - `instruction.md` (required): the natural-language task given to the user
//! - `task.toml` (optional): per-task environment overrides
//! - `task_tree.json` (optional): a pre-decomposed tree, validated against
//!   the bundled JSON schema before use
//! - `tests/` (optional): verification scripts uploaded after the session

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::core::task::TaskNode;
use crate::io::config::EnvironmentConfig;

pub const TASK_TREE_SCHEMA: &str = include_str!("../../schemas/task_tree.schema.json");

/// Everything a session needs to know about one task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub dir: PathBuf,
    pub instruction: String,
    /// Per-task environment overrides from `task.toml`.
    pub environment: Option<EnvironmentConfig>,
    /// Pre-decomposed tree, if the task ships one.
    pub task_tree: Option<TaskNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaskToml {
    environment: Option<EnvironmentConfig>,
}

impl TaskSpec {
    pub fn load(task_dir: &Path, task_name: &str) -> Result<Self> {
        let dir = task_dir.join(task_name);
        if !dir.is_dir() {
            bail!("task directory not found: {}", dir.display());
        }

        let instruction_path = dir.join("instruction.md");
        let instruction = fs::read_to_string(&instruction_path)
            .with_context(|| format!("read {}", instruction_path.display()))?;

        let toml_path = dir.join("task.toml");
        let environment = if toml_path.exists() {
            let contents = fs::read_to_string(&toml_path)
                .with_context(|| format!("read {}", toml_path.display()))?;
            let parsed: TaskToml =
                toml::from_str(&contents).with_context(|| format!("parse {}", toml_path.display()))?;
            parsed.environment
        } else {
            debug!(task = task_name, "no task.toml, using session defaults");
            None
        };

        let tree_path = dir.join("task_tree.json");
        let task_tree = if tree_path.exists() {
            Some(load_task_tree(&tree_path)?)
        } else {
            None
        };

        Ok(Self {
            name: task_name.to_string(),
            dir,
            instruction,
            environment,
            task_tree,
        })
    }

    pub fn tests_dir(&self) -> PathBuf {
        self.dir.join("tests")
    }
}

/// Load a task tree from disk, validating against the bundled schema
/// (Draft 2020-12) before deserializing.
pub fn load_task_tree(path: &Path) -> Result<TaskNode> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read tree {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse tree {}", path.display()))?;
    validate_tree_schema(&value)?;
    TaskNode::from_value(&value).with_context(|| format!("deserialize tree {}", path.display()))
}

/// Validate a JSON value against the task-tree schema.
pub fn validate_tree_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(TASK_TREE_SCHEMA).context("parse bundled schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile task tree schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("tree schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
