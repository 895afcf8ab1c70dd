//! I/O helpers for the agent loops.

pub mod config;
pub mod git;
pub mod iteration_log;
pub mod process;
pub mod prompt;
pub mod provider;
pub mod workspace;
