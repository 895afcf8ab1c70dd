//! Reserved stop-tools and batch planning.
//!
//! A provider response may carry several tool calls. They are scanned in
//! response order; the first sentinel halts dispatch and everything after it
//! in the batch is discarded without running.

use crate::core::types::ToolCall;

/// Provider signals the work is done.
pub const FINISHED: &str = "finished";
/// Provider signals it wants to yield the turn and be re-prompted.
pub const CONTINUE: &str = "continue";

pub const SENTINELS: [&str; 2] = [FINISHED, CONTINUE];

pub fn is_sentinel(name: &str) -> bool {
    SENTINELS.contains(&name)
}

/// How one batch of tool calls will be handled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchPlan {
    /// Non-sentinel calls before the first sentinel, in response order.
    pub dispatch: Vec<ToolCall>,
    /// The first sentinel call, if any.
    pub sentinel: Option<ToolCall>,
    /// Calls after the sentinel. Never executed.
    pub discarded: Vec<ToolCall>,
}

impl DispatchPlan {
    /// Calls to keep on the stored assistant message: dispatched ones plus the
    /// sentinel.
    pub fn recorded_calls(&self) -> Vec<ToolCall> {
        self.dispatch
            .iter()
            .chain(self.sentinel.iter())
            .cloned()
            .collect()
    }
}

pub fn plan_dispatch(calls: &[ToolCall]) -> DispatchPlan {
    let mut plan = DispatchPlan::default();
    let mut iter = calls.iter();
    for call in iter.by_ref() {
        if is_sentinel(&call.name) {
            plan.sentinel = Some(call.clone());
            break;
        }
        plan.dispatch.push(call.clone());
    }
    plan.discarded = iter.cloned().collect();
    plan
}
