//! Deterministic, pure logic shared by the agent loops.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod budget;
pub mod checklist;
pub mod conversation;
pub mod markers;
pub mod sentinel;
pub mod types;
pub mod verdict;
