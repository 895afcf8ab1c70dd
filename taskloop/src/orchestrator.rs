//! The turn loop between the completion provider and the tool registry.
//!
//! One turn starts with a user prompt and alternates provider calls and tool
//! dispatch until the provider answers without tool calls, calls a sentinel,
//! returns nothing, hits the turn cap, or the run is cancelled.
//!
//! ```text
//! AWAITING_MODEL --tool calls--> DISPATCHING_TOOLS --> AWAITING_MODEL
//!       |                              |
//!       +--text only / no response     +--sentinel--> DONE
//!       +--cap / cancel--------------------------------> DONE
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::conversation::TrimPolicy;
use crate::core::sentinel::plan_dispatch;
use crate::core::types::{CompletionRequest, Message, ToolOutput, ToolResult};
use crate::io::config::AgentConfig;
use crate::io::prompt::Prompts;
use crate::io::provider::{CompletionClient, ProviderError};
use crate::session::Session;
use crate::tools::ToolRegistry;

const SENTINEL_ACK: &str = "acknowledged";

/// Per-turn limits.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnConfig {
    /// Provider calls allowed in one turn.
    pub max_turns: u32,
    pub max_messages: usize,
    pub trim_policy: TrimPolicy,
    pub temperature: f32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for TurnConfig {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            max_turns: cfg.looping.max_turns,
            max_messages: cfg.looping.max_messages,
            trim_policy: cfg.looping.trim_policy,
            temperature: cfg.provider.temperature,
        }
    }
}

/// Why a turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStop {
    /// The provider called a stop-tool (`finished` or `continue`).
    Sentinel(String),
    /// The provider answered with text and no tool calls.
    Answered,
    /// The provider returned neither text nor tool calls.
    NoResponse,
    /// The provider-call cap was reached.
    MaxTurns,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnOutcome {
    pub stop: TurnStop,
    /// Text of the last assistant message in the turn that carried any.
    pub text: String,
    pub provider_calls: u32,
    pub tools_dispatched: usize,
    pub discarded_calls: usize,
}

pub struct Orchestrator<'a, C> {
    client: C,
    tools: &'a ToolRegistry,
    prompts: &'a Prompts,
    config: TurnConfig,
    cancel: CancelToken,
}

impl<'a, C: CompletionClient> Orchestrator<'a, C> {
    pub fn new(
        client: C,
        tools: &'a ToolRegistry,
        prompts: &'a Prompts,
        config: TurnConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            client,
            tools,
            prompts,
            config,
            cancel,
        }
    }

    /// Run one turn for `prompt`.
    ///
    /// Tool failures stay in-band. A provider failure other than an empty
    /// response or cancellation is returned as an error wrapping
    /// [`ProviderError`].
    #[instrument(skip_all, fields(max_turns = self.config.max_turns))]
    pub fn run_turn(&self, session: &mut Session, prompt: &str) -> Result<TurnOutcome> {
        self.append(session, Message::user(prompt));

        let mut outcome = TurnOutcome {
            stop: TurnStop::Answered,
            text: String::new(),
            provider_calls: 0,
            tools_dispatched: 0,
            discarded_calls: 0,
        };

        loop {
            if self.cancel.is_cancelled() {
                outcome.stop = TurnStop::Cancelled;
                break;
            }
            if outcome.provider_calls >= self.config.max_turns {
                warn!(provider_calls = outcome.provider_calls, "turn cap reached");
                outcome.stop = TurnStop::MaxTurns;
                break;
            }

            let now = chrono::Local::now().to_rfc3339();
            let request = CompletionRequest::new(
                self.prompts.system(&now)?,
                session.snapshot(),
                self.tools.specs().to_vec(),
                self.config.temperature,
            );
            outcome.provider_calls += 1;
            let turn = outcome.provider_calls;

            let response = match self.client.complete(&request) {
                Ok(response) => response,
                Err(ProviderError::NoResponse) => {
                    warn!(turn, "provider returned no response");
                    outcome.stop = TurnStop::NoResponse;
                    break;
                }
                Err(ProviderError::Cancelled) => {
                    outcome.stop = TurnStop::Cancelled;
                    break;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("provider call {turn} failed"));
                }
            };

            if !response.text.trim().is_empty() {
                info!(turn, text = %response.text.trim(), "assistant");
                outcome.text = response.text.clone();
            }

            let plan = plan_dispatch(&response.tool_calls);
            if !plan.discarded.is_empty() {
                let names: Vec<&str> = plan.discarded.iter().map(|c| c.name.as_str()).collect();
                warn!(turn, discarded = ?names, "calls after a sentinel were not executed");
                outcome.discarded_calls += plan.discarded.len();
            }
            self.append(
                session,
                Message::assistant(response.text, plan.recorded_calls()),
            );

            for call in &plan.dispatch {
                let result = if self.cancel.is_cancelled() {
                    ToolResult::new(call, ToolOutput::failure("cancelled before dispatch"))
                } else {
                    debug!(turn, tool = %call.name, call_id = %call.id, "dispatching");
                    outcome.tools_dispatched += 1;
                    self.tools.dispatch(call)
                };
                self.append(session, Message::tool_result(&result));
            }

            if let Some(sentinel) = plan.sentinel {
                let ack = ToolResult::new(&sentinel, ToolOutput::ok(SENTINEL_ACK));
                self.append(session, Message::tool_result(&ack));
                info!(turn, sentinel = %sentinel.name, "turn ended by sentinel");
                outcome.stop = TurnStop::Sentinel(sentinel.name);
                break;
            }
            if plan.dispatch.is_empty() {
                outcome.stop = TurnStop::Answered;
                break;
            }
        }

        debug!(
            stop = ?outcome.stop,
            provider_calls = outcome.provider_calls,
            tools_dispatched = outcome.tools_dispatched,
            "turn finished"
        );
        Ok(outcome)
    }

    fn append(&self, session: &mut Session, msg: Message) {
        let report = session.append(msg, self.config.trim_policy, self.config.max_messages);
        if report.orphaned_results > 0 {
            warn!(
                dropped = report.dropped,
                orphaned = report.orphaned_results,
                "trim left tool results without their call"
            );
        }
    }
}
