//! Pure, deterministic session logic: message store, action grammar, task
//! tree, user memory, typed errors. No I/O; fully testable in isolation.

pub mod action;
pub mod error;
pub mod history;
pub mod memory;
pub mod task;
