//! Yes/no decision rules applied to an oracle response.

use serde::Serialize;

use crate::core::types::CompletionResponse;

pub const YES: &str = "yes";
pub const NO: &str = "no";

/// Which part of the response decided the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictBasis {
    ToolCall,
    Text,
    /// No usable signal, or the provider call failed.
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub answer: bool,
    pub basis: VerdictBasis,
}

impl Verdict {
    pub const fn fallback() -> Self {
        Self {
            answer: false,
            basis: VerdictBasis::Default,
        }
    }
}

/// Decide in priority order: the first `yes` or `no` call in response order,
/// then free text containing a lowercase "yes", otherwise false.
pub fn judge(response: &CompletionResponse) -> Verdict {
    let first_answer = response
        .tool_calls
        .iter()
        .find(|call| call.name == YES || call.name == NO);
    if let Some(call) = first_answer {
        return Verdict {
            answer: call.name == YES,
            basis: VerdictBasis::ToolCall,
        };
    }
    if response.text.contains(YES) {
        return Verdict {
            answer: true,
            basis: VerdictBasis::Text,
        };
    }
    Verdict::fallback()
}
