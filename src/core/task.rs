//! Hierarchical task decomposition with bottom-up completion propagation.
//!
//! A task tree is created once per session from a task specification and is
//! mutated only by status transitions; the structure is fixed after parse.
//! Traversal is deterministic depth-first, left-to-right, in parse order.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Completion state of one subtask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

/// A node in the task tree. Strict ownership tree: children are owned
/// directly, no shared references, no cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub children: Vec<TaskNode>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl TaskNode {
    /// Single-leaf fallback: the whole spec as one node. Always available,
    /// no external dependency.
    pub fn single(task_spec: impl Into<String>) -> Self {
        Self {
            id: "root".to_string(),
            description: task_spec.into(),
            children: Vec::new(),
            status: TaskStatus::Pending,
        }
    }

    /// Strict parse of a pre-supplied tree. Duplicate ids are a
    /// construction-time contract violation and abort.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let node: TaskNode = serde_json::from_value(value.clone())?;
        let errors = validate_ids(&node);
        if !errors.is_empty() {
            bail!("invalid task tree:\n- {}", errors.join("\n- "));
        }
        Ok(node)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Id uniqueness and well-formedness checks, enforced at construction.
pub fn validate_ids(root: &TaskNode) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    validate_ids_inner(root, &mut seen, &mut errors);
    errors
}

fn validate_ids_inner(node: &TaskNode, seen: &mut HashSet<String>, errors: &mut Vec<String>) {
    if node.id.trim().is_empty() {
        errors.push("empty node id".to_string());
    }
    if !seen.insert(node.id.clone()) {
        errors.push(format!("duplicate id '{}'", node.id));
    }
    for child in &node.children {
        validate_ids_inner(child, seen, errors);
    }
}

static JSON_BLOB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*\]|\{.*\}").expect("json blob pattern"));

/// Build a tree from a decomposition source's raw text output.
///
/// Extracts the first JSON array or object; an array becomes the children of
/// a synthetic root carrying the task spec. Anything malformed (bad JSON,
/// missing fields, duplicate ids) degrades to the single-leaf fallback
/// rather than failing the session.
pub fn decompose_from_text(content: &str, task_spec: &str) -> TaskNode {
    let Some(m) = JSON_BLOB_RE.find(content) else {
        return TaskNode::single(task_spec);
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(m.as_str()) else {
        return TaskNode::single(task_spec);
    };

    let candidate = if value.is_array() {
        serde_json::json!({
            "id": "root",
            "description": task_spec,
            "children": value,
        })
    } else {
        value
    };

    TaskNode::from_value(&candidate).unwrap_or_else(|_| TaskNode::single(task_spec))
}

/// Depth-first search by id, first match wins.
pub fn find<'a>(node: &'a TaskNode, target_id: &str) -> Option<&'a TaskNode> {
    if node.id == target_id {
        return Some(node);
    }
    for child in &node.children {
        if let Some(found) = find(child, target_id) {
            return Some(found);
        }
    }
    None
}

pub fn find_mut<'a>(node: &'a mut TaskNode, target_id: &str) -> Option<&'a mut TaskNode> {
    if node.id == target_id {
        return Some(node);
    }
    for child in &mut node.children {
        if let Some(found) = find_mut(child, target_id) {
            return Some(found);
        }
    }
    None
}

/// Mark a node completed by id. Returns false when the id is absent.
pub fn mark_completed(root: &mut TaskNode, id: &str) -> bool {
    match find_mut(root, id) {
        Some(node) => {
            node.status = TaskStatus::Completed;
            true
        }
        None => false,
    }
}

/// Re-derive internal statuses bottom-up: a node with children is completed
/// iff all children are (recursively) completed; leaves keep their explicit
/// marks. After this runs, a node is completed iff every leaf in its subtree
/// is completed.
pub fn propagate(root: &mut TaskNode) {
    propagate_inner(root);
}

fn propagate_inner(node: &mut TaskNode) -> bool {
    if node.children.is_empty() {
        return node.is_complete();
    }
    let mut all_complete = true;
    for child in &mut node.children {
        if !propagate_inner(child) {
            all_complete = false;
        }
    }
    node.status = if all_complete {
        TaskStatus::Completed
    } else {
        TaskStatus::Pending
    };
    all_complete
}

/// Focus order for the symbolic policy: root first, then every leaf in
/// left-to-right DFS order. A tree with no children yields just the root.
pub fn focus_order(root: &TaskNode) -> Vec<String> {
    let mut order = vec![root.id.clone()];
    if !root.children.is_empty() {
        collect_leaves(root, &mut order);
    }
    order
}

fn collect_leaves(node: &TaskNode, order: &mut Vec<String>) {
    if node.children.is_empty() {
        order.push(node.id.clone());
        return;
    }
    for child in &node.children {
        collect_leaves(child, order);
    }
}

/// Indented one-line-per-node summary for judge prompts and logs.
pub fn summarize(root: &TaskNode, max_nodes: usize) -> String {
    let mut lines = Vec::new();
    summarize_inner(root, 0, max_nodes, &mut lines);
    lines.join("\n")
}

fn summarize_inner(node: &TaskNode, depth: usize, max_nodes: usize, lines: &mut Vec<String>) {
    if lines.len() >= max_nodes {
        return;
    }
    let marker = if node.is_complete() { "[x]" } else { "[ ]" };
    lines.push(format!(
        "{}{} {}: {}",
        "  ".repeat(depth),
        marker,
        node.id,
        node.description
    ));
    for child in &node.children {
        summarize_inner(child, depth + 1, max_nodes, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{task_leaf, task_node};

    #[test]
    fn single_leaf_fallback() {
        let tree = TaskNode::single("fix the build");
        assert_eq!(tree.id, "root");
        assert!(tree.is_leaf());
        assert_eq!(tree.status, TaskStatus::Pending);
    }

    #[test]
    fn find_is_depth_first_first_match() {
        let tree = task_node(
            "root",
            vec![
                task_node("a", vec![task_leaf("a1"), task_leaf("a2")]),
                task_leaf("b"),
            ],
        );
        assert_eq!(find(&tree, "a2").expect("found").id, "a2");
        assert!(find(&tree, "missing").is_none());
    }

    #[test]
    fn duplicate_ids_fail_strict_construction() {
        let value = serde_json::json!({
            "id": "root",
            "description": "r",
            "children": [
                {"id": "x", "description": "one"},
                {"id": "x", "description": "two"},
            ],
        });
        let err = TaskNode::from_value(&value).expect_err("should fail");
        assert!(err.to_string().contains("duplicate id 'x'"));
    }

    #[test]
    fn propagate_completes_node_iff_all_leaves_complete() {
        let mut tree = task_node(
            "root",
            vec![
                task_node("a", vec![task_leaf("a1"), task_leaf("a2")]),
                task_leaf("b"),
            ],
        );

        mark_completed(&mut tree, "a1");
        propagate(&mut tree);
        assert!(!find(&tree, "a").expect("a").is_complete());
        assert!(!tree.is_complete());

        mark_completed(&mut tree, "a2");
        propagate(&mut tree);
        assert!(find(&tree, "a").expect("a").is_complete());
        assert!(!tree.is_complete());

        mark_completed(&mut tree, "b");
        propagate(&mut tree);
        assert!(tree.is_complete());
    }

    #[test]
    fn propagate_derives_internal_status_from_children_only() {
        // An internal node marked directly does not stay completed while its
        // leaves are pending.
        let mut tree = task_node("root", vec![task_node("a", vec![task_leaf("a1")])]);
        mark_completed(&mut tree, "a");
        propagate(&mut tree);
        assert!(!find(&tree, "a").expect("a").is_complete());
    }

    #[test]
    fn focus_order_is_root_then_leaves_dfs() {
        let tree = task_node(
            "root",
            vec![
                task_node("a", vec![task_leaf("a1"), task_leaf("a2")]),
                task_leaf("b"),
            ],
        );
        assert_eq!(focus_order(&tree), vec!["root", "a1", "a2", "b"]);

        let single = TaskNode::single("whole task");
        assert_eq!(focus_order(&single), vec!["root"]);
    }

    #[test]
    fn serde_round_trip_preserves_structure_and_status() {
        let mut tree = task_node(
            "root",
            vec![task_node("a", vec![task_leaf("a1")]), task_leaf("b")],
        );
        mark_completed(&mut tree, "b");

        let value = serde_json::to_value(&tree).expect("serialize");
        let rebuilt = TaskNode::from_value(&value).expect("deserialize");
        assert_eq!(rebuilt, tree);
    }

    #[test]
    fn decompose_accepts_object_and_array_forms() {
        let object = r#"Here is the plan: {"id": "root", "description": "r",
            "children": [{"id": "1", "description": "step one"}]}"#;
        let tree = decompose_from_text(object, "spec");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].id, "1");

        let array = r#"[{"id": "1", "description": "one"}, {"id": "2", "description": "two"}]"#;
        let tree = decompose_from_text(array, "the spec");
        assert_eq!(tree.id, "root");
        assert_eq!(tree.description, "the spec");
        assert_eq!(tree.children.len(), 2);
    }

    #[test]
    fn decompose_degrades_to_single_leaf_on_garbage() {
        for bad in [
            "no json here at all",
            "{not valid json}",
            r#"[{"id": "x", "description": "a"}, {"id": "x", "description": "b"}]"#,
        ] {
            let tree = decompose_from_text(bad, "the spec");
            assert!(tree.is_leaf(), "input {bad:?} should degrade");
            assert_eq!(tree.description, "the spec");
        }
    }

    #[test]
    fn summarize_marks_completion_and_caps_nodes() {
        let mut tree = task_node("root", vec![task_leaf("a"), task_leaf("b")]);
        mark_completed(&mut tree, "a");
        let text = summarize(&tree, 200);
        assert!(text.contains("[x] a"));
        assert!(text.contains("[ ] b"));
        assert_eq!(summarize(&tree, 1).lines().count(), 1);
    }
}
