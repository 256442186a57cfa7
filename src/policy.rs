//! Orchestration policies: the judged policy asks a model for focus,
//! perception, and progress; the symbolic policy derives all three from the
//! tree structure and a fixed cadence. One trait, two implementations,
//! selected at session construction.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::action::UserAction;
use crate::core::history::{ChatMessage, ChatRole, Role, SessionHistory};
use crate::core::memory::{UserMemory, parse_judged_perception, perceive_symbolic};
use crate::core::task::{TaskNode, find, focus_order, mark_completed, propagate};
use crate::io::model::Model;
use crate::io::prompt::PromptEngine;

/// Per-turn inputs shared by every policy judgment.
pub struct TurnContext<'a> {
    pub model: &'a dyn Model,
    pub engine: &'a PromptEngine,
    /// The task's instruction text.
    pub task_spec: &'a str,
    pub user_profile: &'a str,
    pub turn: u32,
    pub max_turns: u32,
}

/// Focus, perception, progress, and scope decisions for one session.
///
/// Perception errors that stem from malformed judgment output must carry a
/// [`crate::core::error::FormatError`] in the anyhow chain so the
/// orchestrator can recover instead of aborting.
pub trait Policy {
    /// Which node ids the user has on their mind this turn.
    fn select_focus(
        &mut self,
        ctx: &TurnContext<'_>,
        tree: &TaskNode,
        history: &SessionHistory,
    ) -> Result<Vec<String>>;

    /// Scope check on the parsed action. `(reason, valid)`; default accepts
    /// everything.
    fn validate_action(
        &mut self,
        _ctx: &TurnContext<'_>,
        _action: &UserAction,
        _focus: &str,
    ) -> Result<(String, bool)> {
        Ok((String::new(), true))
    }

    /// Turn raw agent/environment output into what the user takes away,
    /// updating memory as a side effect. The returned text is appended to
    /// the history as the user-visible perception.
    fn perceive(
        &mut self,
        ctx: &TurnContext<'_>,
        memory: &mut UserMemory,
        raw: &str,
        source: Role,
        history: &SessionHistory,
    ) -> Result<String>;

    /// Mark completed nodes and advance internal state.
    fn update_progress(
        &mut self,
        ctx: &TurnContext<'_>,
        tree: &mut TaskNode,
        history: &SessionHistory,
    ) -> Result<()>;

    /// Whether a user `exit` action terminates the session this turn.
    fn exit_ends_session(&self) -> bool {
        true
    }
}

// ──────────────────────────────────────────────────────────────
// Symbolic policy
// ──────────────────────────────────────────────────────────────

/// Deterministic policy: root-then-leaves DFS focus pointer, advanced on a
/// fixed cadence, current node marked completed after its turn. No model
/// calls at all.
pub struct SymbolicPolicy {
    order: Vec<String>,
    idx: usize,
    advance_every: u32,
    word_budget: usize,
}

impl SymbolicPolicy {
    pub fn new(advance_every: u32, word_budget: usize) -> Self {
        Self {
            order: Vec::new(),
            idx: 0,
            advance_every,
            word_budget,
        }
    }

    /// Zero-based position of the focus pointer.
    pub fn focus_index(&self) -> usize {
        self.idx
    }

    pub fn is_exhausted(&self) -> bool {
        !self.order.is_empty() && self.idx >= self.order.len() - 1
    }
}

impl Policy for SymbolicPolicy {
    fn select_focus(
        &mut self,
        _ctx: &TurnContext<'_>,
        tree: &TaskNode,
        _history: &SessionHistory,
    ) -> Result<Vec<String>> {
        if self.order.is_empty() {
            self.order = focus_order(tree);
            debug!(nodes = self.order.len(), "focus order fixed");
        }
        // Cumulative: everything visited so far stays on the user's mind.
        Ok(self.order[..=self.idx.min(self.order.len() - 1)].to_vec())
    }

    fn perceive(
        &mut self,
        _ctx: &TurnContext<'_>,
        _memory: &mut UserMemory,
        raw: &str,
        source: Role,
        _history: &SessionHistory,
    ) -> Result<String> {
        // Agent prose is lossy for this user; environment output is read
        // verbatim. Session history doubles as memory in this mode.
        Ok(match source {
            Role::Agent => perceive_symbolic(raw, self.word_budget),
            _ => raw.to_string(),
        })
    }

    fn update_progress(
        &mut self,
        ctx: &TurnContext<'_>,
        tree: &mut TaskNode,
        _history: &SessionHistory,
    ) -> Result<()> {
        if self.order.is_empty() {
            return Ok(());
        }
        let current = self.order[self.idx.min(self.order.len() - 1)].clone();
        mark_completed(tree, &current);
        propagate(tree);

        if ctx.turn % self.advance_every == 0 && self.idx < self.order.len() - 1 {
            self.idx += 1;
            debug!(idx = self.idx, "focus advanced");
        }
        Ok(())
    }

    fn exit_ends_session(&self) -> bool {
        // An early exit is ignored until the traversal is exhausted; the
        // user still has nodes to visit.
        self.order.is_empty() || self.is_exhausted()
    }
}

// ──────────────────────────────────────────────────────────────
// Judged policy
// ──────────────────────────────────────────────────────────────

static RETURN_NODES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<RETURN_NODES>\s*(\[.*?\])\s*</RETURN_NODES>").expect("return nodes pattern")
});
static COMPLETED_NODES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<COMPLETED_NODES>\s*(\[.*?\])\s*</COMPLETED_NODES>")
        .expect("completed nodes pattern")
});
static JSON_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("json object pattern"));

/// Model-judged policy: focus selection, perception, progress, and optional
/// scope validation are all separate model judgments.
pub struct JudgedPolicy {
    validation: bool,
    recent_n: usize,
    current_ids: Vec<String>,
}

impl JudgedPolicy {
    pub fn new(validation: bool, recent_n: usize) -> Self {
        Self {
            validation,
            recent_n,
            current_ids: Vec::new(),
        }
    }

    fn judge(&self, ctx: &TurnContext<'_>, prompt: String) -> Result<String> {
        let reply = ctx
            .model
            .query(&[ChatMessage::new(ChatRole::User, prompt)])?;
        Ok(reply.content)
    }
}

/// Extract a JSON string array from a wrapped judgment reply. Unparseable
/// output yields an empty list, never an error: a confused judge means "no
/// change", not a dead session.
fn parse_id_list(re: &Regex, content: &str) -> Vec<String> {
    let Some(caps) = re.captures(content) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<serde_json::Value>>(&caps[1]) {
        Ok(values) => values
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        Err(e) => {
            warn!(err = %e, "unparseable id list in judgment");
            Vec::new()
        }
    }
}

impl Policy for JudgedPolicy {
    fn select_focus(
        &mut self,
        ctx: &TurnContext<'_>,
        tree: &TaskNode,
        history: &SessionHistory,
    ) -> Result<Vec<String>> {
        let prompt = ctx.engine.render_next_node(
            &serde_json::to_string_pretty(tree)?,
            &history.transcript(None),
            &self.current_ids,
            ctx.turn,
            ctx.max_turns,
        )?;
        let content = self.judge(ctx, prompt)?;

        let ids: Vec<String> = parse_id_list(&RETURN_NODES_RE, &content)
            .into_iter()
            .filter(|id| {
                let known = find(tree, id).is_some();
                if !known {
                    warn!(id, "judge selected unknown node id");
                }
                known
            })
            .collect();
        self.current_ids = ids.clone();
        Ok(ids)
    }

    fn validate_action(
        &mut self,
        ctx: &TurnContext<'_>,
        action: &UserAction,
        focus: &str,
    ) -> Result<(String, bool)> {
        if !self.validation {
            return Ok((String::new(), true));
        }
        let prompt = ctx.engine.render_validate(
            ctx.task_spec,
            focus,
            action.kind(),
            action.content(),
            action.reasoning(),
        )?;
        let content = self.judge(ctx, prompt)?;

        #[derive(Deserialize)]
        struct Verdict {
            #[serde(default = "default_valid")]
            valid: bool,
            #[serde(default)]
            reason: String,
        }
        fn default_valid() -> bool {
            true
        }

        // A judge that fails to produce the verdict shape defaults to valid.
        let verdict = JSON_OBJECT_RE
            .find(&content)
            .and_then(|m| serde_json::from_str::<Verdict>(m.as_str()).ok());
        Ok(match verdict {
            Some(v) => (v.reason, v.valid),
            None => (String::new(), true),
        })
    }

    fn perceive(
        &mut self,
        ctx: &TurnContext<'_>,
        memory: &mut UserMemory,
        raw: &str,
        source: Role,
        history: &SessionHistory,
    ) -> Result<String> {
        let prompt = ctx.engine.render_perceive(
            ctx.task_spec,
            &history.transcript(None),
            ctx.user_profile,
            raw,
            source.as_str(),
            memory.next_index(),
        )?;
        let content = self.judge(ctx, prompt)?;

        // Nothing is stored until the whole judgment validates; a rejected
        // judgment must leave memory exactly as it was.
        let judged = parse_judged_perception(&content).map_err(anyhow::Error::new)?;
        memory
            .add_external_batch(judged.external)
            .map_err(anyhow::Error::new)?;
        memory.add_perception(&judged.perception);
        Ok(judged.perception)
    }

    fn update_progress(
        &mut self,
        ctx: &TurnContext<'_>,
        tree: &mut TaskNode,
        history: &SessionHistory,
    ) -> Result<()> {
        let current_descs: Vec<String> = self
            .current_ids
            .iter()
            .filter_map(|id| find(tree, id).map(|n| n.description.clone()))
            .collect();
        let prompt = ctx.engine.render_progress(
            &serde_json::to_string_pretty(tree)?,
            &current_descs.join(" | "),
            &history.transcript(Some(self.recent_n)),
        )?;
        let content = self.judge(ctx, prompt)?;

        for id in parse_id_list(&COMPLETED_NODES_RE, &content) {
            if !mark_completed(tree, &id) {
                warn!(id, "judge completed unknown node id");
            }
        }
        propagate(tree);
        Ok(())
    }
}
