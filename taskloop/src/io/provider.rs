//! Completion provider boundary.
//!
//! [`CompletionClient`] is the seam the orchestrator and oracle call through.
//! [`HttpCompletionClient`] speaks the OpenAI-compatible chat completions
//! protocol over a blocking HTTP client; [`RetryingClient`] wraps any client
//! with bounded exponential backoff for transient failures.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::types::{
    CompletionRequest, CompletionResponse, Message, Role, ToolCall, ToolSpec,
};
use crate::io::prompt::clip;

/// Failure talking to the provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("provider request timed out")]
    Timeout,
    #[error("provider returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("provider response could not be decoded: {0}")]
    Decode(String),
    #[error("provider returned neither text nor tool calls")]
    NoResponse,
    #[error("provider call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Failures worth retrying: network trouble, timeouts, rate limits and
    /// server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport(_) | ProviderError::Timeout => true,
            ProviderError::Status { code, .. } => *code == 429 || (500..=599).contains(code),
            ProviderError::Decode(_) | ProviderError::NoResponse | ProviderError::Cancelled => {
                false
            }
        }
    }
}

/// Turns a request into text and/or tool calls.
pub trait CompletionClient {
    /// Implementations return [`ProviderError::NoResponse`] rather than an
    /// empty [`CompletionResponse`].
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError>;
}

impl<C: CompletionClient + ?Sized> CompletionClient for &C {
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        (**self).complete(request)
    }
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct HttpCompletionClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpCompletionClient {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build provider http client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

impl std::fmt::Debug for HttpCompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCompletionClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl CompletionClient for HttpCompletionClient {
    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len()))]
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let body = WireRequest::from_request(&self.model, request);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ProviderError::Status {
                code: status.as_u16(),
                body: clip(body.trim(), 2_000),
            });
        }

        let text = response.text().map_err(transport_error)?;
        let decoded = decode_response(&text)?;
        debug!(
            text_bytes = decoded.text.len(),
            tool_calls = decoded.tool_calls.len(),
            "provider responded"
        );
        Ok(decoded)
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(err.to_string())
    }
}

fn decode_response(body: &str) -> Result<CompletionResponse, ProviderError> {
    let wire: WireResponse =
        serde_json::from_str(body).map_err(|err| ProviderError::Decode(err.to_string()))?;
    let Some(choice) = wire.choices.into_iter().next() else {
        return Err(ProviderError::NoResponse);
    };
    let response = CompletionResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_calls: choice
            .message
            .tool_calls
            .into_iter()
            .flatten()
            .map(|call| ToolCall::from_raw(call.id, call.function.name, &call.function.arguments))
            .collect(),
    };
    if response.is_empty() {
        return Err(ProviderError::NoResponse);
    }
    Ok(response)
}

/// Wraps a client with retries for [`ProviderError::is_transient`] failures.
#[derive(Debug)]
pub struct RetryingClient<C> {
    inner: C,
    max_retries: u32,
    base_delay: Duration,
    cancel: CancelToken,
}

impl<C: CompletionClient> RetryingClient<C> {
    pub fn new(inner: C, max_retries: u32, base_delay: Duration, cancel: CancelToken) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            cancel,
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base...
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(10))
    }
}

fn whole_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

impl<C: CompletionClient> CompletionClient for RetryingClient<C> {
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            match self.inner.complete(request) {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = whole_millis(delay),
                        err = %err,
                        "transient provider failure, retrying"
                    );
                    if !self.cancel.sleep(delay) {
                        return Err(ProviderError::Cancelled);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    temperature: f32,
}

impl<'a> WireRequest<'a> {
    fn from_request(model: &'a str, request: &'a CompletionRequest) -> Self {
        Self {
            model,
            messages: request.messages.iter().map(WireMessage::from_message).collect(),
            tools: request.tools.iter().map(WireTool::from_spec).collect(),
            temperature: request.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCallOut<'a>>,
}

impl<'a> WireMessage<'a> {
    fn from_message(msg: &'a Message) -> Self {
        let content = if msg.content.is_empty() && msg.role == Role::Assistant {
            None
        } else {
            Some(msg.content.as_str())
        };
        Self {
            role: msg.role.as_str(),
            content,
            tool_call_id: msg.tool_call_id.as_deref(),
            tool_calls: msg
                .tool_calls
                .iter()
                .map(|call| WireToolCallOut {
                    id: &call.id,
                    kind: "function",
                    function: WireFunctionOut {
                        name: &call.name,
                        arguments: call.arguments_text(),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireToolCallOut<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionOut<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionOut<'a> {
    name: &'a str,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionSpec<'a>,
}

impl<'a> WireTool<'a> {
    fn from_spec(spec: &'a ToolSpec) -> Self {
        Self {
            kind: "function",
            function: WireFunctionSpec {
                name: &spec.name,
                description: &spec.description,
                parameters: &spec.parameters,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireFunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallIn>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallIn {
    id: String,
    function: WireFunctionIn,
}

#[derive(Debug, Deserialize)]
struct WireFunctionIn {
    name: String,
    #[serde(default)]
    arguments: String,
}
