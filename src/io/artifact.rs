//! Session artifacts: timestamped save directories and pretty-printed JSON
//! outputs (`history.json`, `task_tree.json`, `result.json`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::core::history::Message;
use crate::core::task::TaskNode;

/// Create `jobs_dir/task_name/mode/<unix-secs>/` for this session's outputs.
pub fn create_save_dir(jobs_dir: &Path, task_name: &str, mode: &str) -> Result<PathBuf> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_secs();
    let save_dir = jobs_dir.join(task_name).join(mode).join(timestamp.to_string());
    fs::create_dir_all(&save_dir)
        .with_context(|| format!("create save dir {}", save_dir.display()))?;
    Ok(save_dir)
}

/// Serialize `value` to pretty-printed JSON with trailing newline.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn save_history(save_dir: &Path, messages: &[Message]) -> Result<PathBuf> {
    let path = save_dir.join("history.json");
    write_json(&path, &messages)?;
    info!(path = %path.display(), messages = messages.len(), "history saved");
    Ok(path)
}

pub fn save_task_tree(save_dir: &Path, tree: &TaskNode) -> Result<PathBuf> {
    let path = save_dir.join("task_tree.json");
    write_json(&path, tree)?;
    info!(path = %path.display(), "task tree saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::history::Role;
    use crate::test_support::task_leaf;

    #[test]
    fn save_dir_is_nested_by_task_and_mode() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = create_save_dir(temp.path(), "cron", "judged").expect("create");
        assert!(dir.is_dir());
        assert!(dir.starts_with(temp.path().join("cron").join("judged")));
    }

    #[test]
    fn history_and_tree_round_trip_as_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let messages = vec![Message::response(Role::User, &[Role::User], "hello")];
        let path = save_history(temp.path(), &messages).expect("save");

        let raw = fs::read_to_string(path).expect("read");
        let parsed: Vec<Message> = serde_json::from_str(&raw).expect("parse");
        assert_eq!(parsed, messages);
        assert!(raw.ends_with('\n'));

        let tree_path = save_task_tree(temp.path(), &task_leaf("root")).expect("save");
        let raw = fs::read_to_string(tree_path).expect("read");
        assert!(raw.contains("\"id\": \"root\""));
    }
}
