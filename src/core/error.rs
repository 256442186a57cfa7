//! Recoverable session errors.
//!
//! These are the only error types the orchestrator recovers from at runtime.
//! They travel inside [`anyhow::Error`] and are recognized at the loop
//! boundary via `downcast_ref`, where they become plain-text observations for
//! the offending party. Everything else aborts the session.

use std::fmt;

/// Model output failed the action or memory grammar.
///
/// Always recoverable: the orchestrator surfaces it as an observation and
/// retries the turn within the global turn budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatError(String);

impl FormatError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for FormatError {}

/// Environment execution exceeded its time budget.
///
/// Recoverable: surfaced as an observation message; the session continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTimeout {
    pub command: String,
    pub partial_output: String,
}

impl fmt::Display for ExecutionTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timeout executing: {}\n{}", self.command, self.partial_output)
    }
}

impl std::error::Error for ExecutionTimeout {}

/// Format an error as a structured observation for a simulated party.
///
/// Nothing upstream of the orchestrator ever receives a raw error object;
/// this is the plain-text shape it receives instead.
pub fn observation(kind: &str, details: &str, hint: &str) -> String {
    let mut parts = vec![format!("[{kind}]"), details.to_string()];
    if !hint.is_empty() {
        parts.push(format!("Hint: {hint}"));
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_includes_hint_only_when_present() {
        let with = observation("FormatError", "missing block", "use <response> tags");
        assert_eq!(with, "[FormatError]\nmissing block\nHint: use <response> tags");

        let without = observation("ExecutionTimeout", "sleep 9999", "");
        assert_eq!(without, "[ExecutionTimeout]\nsleep 9999");
    }

    #[test]
    fn format_error_downcasts_through_anyhow() {
        let err = anyhow::Error::new(FormatError::new("bad output"));
        let fe = err.downcast_ref::<FormatError>().expect("downcast");
        assert_eq!(fe.message(), "bad output");
    }
}
