//! The simulated user's epistemic state.
//!
//! Working memory is a bounded stream of perceptions in temporal order.
//! External memory holds content the user can relay but not restate (code,
//! long output), addressed by a contiguous zero-based index that must never
//! be renumbered or have gaps.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::error::FormatError;

/// One external-memory entry: a short summary plus the verbatim content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalEntry {
    pub summary: String,
    pub content: String,
}

/// Perception stream plus indexed opaque storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserMemory {
    working_memory: Vec<String>,
    external_memory: Vec<ExternalEntry>,
}

impl UserMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a perception. Insertion order is temporal order; entries are
    /// never pruned within a session.
    pub fn add_perception(&mut self, perception: impl Into<String>) {
        self.working_memory.push(perception.into());
    }

    /// The index the next external entry must declare.
    pub fn next_index(&self) -> usize {
        self.external_memory.len()
    }

    /// Store an external entry, returning its index.
    pub fn add_external(&mut self, summary: impl Into<String>, content: impl Into<String>) -> usize {
        self.external_memory.push(ExternalEntry {
            summary: summary.into(),
            content: content.into(),
        });
        self.external_memory.len() - 1
    }

    /// Store a batch of entries under caller-declared indices.
    ///
    /// Each declared index must continue the current sequence; anything else
    /// is a contract violation since entries are referenced later by index.
    /// All indices are checked before anything is stored, so a mismatch
    /// anywhere in the batch leaves memory untouched.
    pub fn add_external_batch(
        &mut self,
        entries: Vec<(usize, ExternalEntry)>,
    ) -> Result<(), FormatError> {
        let mut expected = self.next_index();
        for (declared, _) in &entries {
            if *declared != expected {
                return Err(FormatError::new(format!(
                    "Index mismatch: {declared} != {expected}. External memory indices must be \
                     contiguous and start from {expected}."
                )));
            }
            expected += 1;
        }
        for (_, entry) in entries {
            self.external_memory.push(entry);
        }
        Ok(())
    }

    pub fn working_memory(&self) -> &[String] {
        &self.working_memory
    }

    pub fn external_memory(&self) -> &[ExternalEntry] {
        &self.external_memory
    }

    /// Render memory for the user prompt: perceptions as bullets in temporal
    /// order, then an explicitly opaque section the user may copy-paste from
    /// but is told not to reason about.
    pub fn to_prompt(&self) -> String {
        let mut lines: Vec<String> = self
            .working_memory
            .iter()
            .map(|p| format!("- {p}"))
            .collect();

        if !self.external_memory.is_empty() {
            lines.push(
                "\nExternal memory, treat as opaque. You can copy-paste these into requests \
                 or commands, but don't try to understand them:"
                    .to_string(),
            );
            for (idx, entry) in self.external_memory.iter().enumerate() {
                lines.push(format!("  [REF:{idx}] {}", entry.content));
            }
        }

        if lines.is_empty() {
            "(nothing yet)".to_string()
        } else {
            lines.join("\n")
        }
    }
}

static CODE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("code block pattern"));
static PERCEPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<PERCEPTION>(.*?)</PERCEPTION>").expect("perception pattern"));
static EXTERNAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<EXTERNAL_MEMORY>(.*?)</EXTERNAL_MEMORY>").expect("external pattern")
});

/// Symbolic perception: truncate prose to a word budget while preserving
/// fenced code blocks verbatim as indexed attachments referenced inline as
/// `[CODE BLOCK i]`. The budget counts whitespace-separated words, a cheap
/// stand-in for a tokenizer.
pub fn perceive_symbolic(raw: &str, word_budget: usize) -> String {
    let code_blocks: Vec<&str> = CODE_BLOCK_RE.find_iter(raw).map(|m| m.as_str()).collect();

    let mut counter = 0usize;
    let text_only = CODE_BLOCK_RE.replace_all(raw, |_: &regex::Captures<'_>| {
        let placeholder = format!("[CODE BLOCK {counter}]");
        counter += 1;
        placeholder
    });

    let words: Vec<&str> = text_only.split_whitespace().collect();
    let truncated = if words.len() > word_budget {
        words[..word_budget].join(" ")
    } else {
        words.join(" ")
    };

    let mut result = String::from("========== What You Read from AI's Response ==========\n\n");
    result.push_str(truncated.trim());

    if !code_blocks.is_empty() {
        result.push_str(
            "\n\n========== Code Blocks (You Can Copy and Paste/Execute But Don't Understand \
             at all) ==========\n\n",
        );
        let rendered: Vec<String> = code_blocks
            .iter()
            .enumerate()
            .map(|(i, block)| format!("[CODE BLOCK {i}]:\n{block}"))
            .collect();
        result.push_str(&rendered.join("\n\n"));
    }

    result
}

/// Parsed output of an LLM perception judgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgedPerception {
    pub perception: String,
    /// Entries keyed by the index the judgment declared, in ascending order.
    pub external: Vec<(usize, ExternalEntry)>,
}

/// Parse a perception judgment: a required `<PERCEPTION>` block and an
/// optional `<EXTERNAL_MEMORY>` JSON object keyed by declared indices.
pub fn parse_judged_perception(content: &str) -> Result<JudgedPerception, FormatError> {
    let perception = PERCEPTION_RE
        .captures(content)
        .map(|caps| caps[1].trim().to_string())
        .ok_or_else(|| FormatError::new("Missing <PERCEPTION>...</PERCEPTION> in output."))?;

    let mut external = Vec::new();
    if let Some(caps) = EXTERNAL_RE.captures(content) {
        let body = caps[1].trim();
        if !body.is_empty() {
            let entries: BTreeMap<String, ExternalEntry> = serde_json::from_str(body)
                .map_err(|e| FormatError::new(format!("Failed to parse external memory: {e}")))?;
            for (key, entry) in entries {
                let index: usize = key.trim().parse().map_err(|_| {
                    FormatError::new(format!("External memory index '{key}' is not an integer"))
                })?;
                external.push((index, entry));
            }
            external.sort_by_key(|(index, _)| *index);
        }
    }

    Ok(JudgedPerception {
        perception,
        external,
    })
}
