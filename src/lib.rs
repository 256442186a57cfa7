//! Orchestrated user-agent session simulator.
//!
//! This crate runs benchmark sessions where a simulated human user works a
//! task with an AI chat assistant in a shared terminal. An orchestrator with
//! total visibility drives each turn, modeling realistic human limitations:
//! imperfect perception, lossy memory, bounded focus. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (message store, action grammar,
//!   task tree, memory). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (model and environment backends,
//!   configuration, prompts, artifacts). Isolated to enable scripted doubles
//!   in tests.
//!
//! Orchestration modules ([`orchestrator`], [`policy`], [`user`], [`agent`])
//! coordinate core logic with I/O to run a session end to end.

pub mod agent;
pub mod core;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod policy;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod user;
