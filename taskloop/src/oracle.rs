//! Binary questions answered by a separate, usually smaller, model.
//!
//! The oracle never touches the session conversation. Each question is a
//! fresh two-message exchange, and any provider failure degrades to "no".

use serde_json::json;
use tracing::{info, instrument, warn};

use crate::core::types::{CompletionRequest, Message, ToolSpec};
use crate::core::verdict::{NO, YES, Verdict, judge};
use crate::io::provider::CompletionClient;

pub const DIRECTIVE: &str = r#"You must answer the question with a "yes" or "no" tool call."#;

/// Anything that can answer a yes/no question about the run.
pub trait Decide {
    fn decide(&self, question: &str) -> Verdict;
}

impl<T: Decide + ?Sized> Decide for &T {
    fn decide(&self, question: &str) -> Verdict {
        (**self).decide(question)
    }
}

pub struct Oracle<C> {
    client: C,
    temperature: f32,
    tools: Vec<ToolSpec>,
}

impl<C: CompletionClient> Oracle<C> {
    pub fn new(client: C, temperature: f32) -> Self {
        Self {
            client,
            temperature,
            tools: answer_specs(),
        }
    }
}

impl<C: CompletionClient> Decide for Oracle<C> {
    #[instrument(skip_all, fields(question_bytes = question.len()))]
    fn decide(&self, question: &str) -> Verdict {
        let request = CompletionRequest::new(
            DIRECTIVE.to_string(),
            vec![Message::user(question)],
            self.tools.clone(),
            self.temperature,
        );
        match self.client.complete(&request) {
            Ok(response) => {
                let verdict = judge(&response);
                info!(answer = verdict.answer, basis = ?verdict.basis, "oracle verdict");
                verdict
            }
            Err(err) => {
                warn!(err = %err, "oracle call failed; answering no");
                Verdict::fallback()
            }
        }
    }
}

fn answer_specs() -> Vec<ToolSpec> {
    [(YES, "Answer yes to the question."), (NO, "Answer no to the question.")]
        .into_iter()
        .map(|(name, description)| ToolSpec {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        })
        .collect()
}
