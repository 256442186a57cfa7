//! Side-effecting boundary: child processes, model/environment backends,
//! configuration, prompt templates, and on-disk artifacts.

pub mod artifact;
pub mod config;
pub mod env;
pub mod model;
pub mod process;
pub mod prompt;
pub mod task_spec;
pub mod verify;
