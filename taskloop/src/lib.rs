//! Autonomous, checklist-driven coding agent.
//!
//! A provider model works through `TASKS.md` (decomposed from `INPUT.md`)
//! using a fixed set of local tools, and a separate oracle model decides when
//! the work is done. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (conversation window, sentinel planning,
//!   verdict rules, checklist and marker scanning). No I/O.
//! - **[`io`]**: Side effects (provider HTTP, git, subprocesses, workspace
//!   files, prompts, iteration records).
//! - **[`tools`]**: The tool surface offered to the provider.
//!
//! [`orchestrator`], [`oracle`] and [`controller`] combine them into the
//! inner turn loop and the outer task loop.

pub mod cancel;
pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod oracle;
pub mod orchestrator;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
