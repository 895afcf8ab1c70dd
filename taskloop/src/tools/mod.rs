//! Tool registry: declared tool surface, typed argument decoding, and
//! in-band error results.
//!
//! Every dispatch produces exactly one [`ToolResult`]. Unknown tools,
//! arguments that fail the schema or the typed decode, handler errors and
//! empty results all come back as a [`ToolOutput`] with `error` set, so the
//! provider can see and correct them.

pub mod fs;
pub mod lint;
pub mod web;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use jsonschema::{Draft, Validator};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::sentinel::{CONTINUE, FINISHED};
use crate::core::types::{ToolCall, ToolOutput, ToolResult, ToolSpec};
use crate::io::config::ToolsConfig;

/// A locally executed tool with a typed argument struct.
pub trait Tool {
    type Args: DeserializeOwned;

    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON Schema for [`Self::Args`].
    fn parameters(&self) -> Value;
    fn run(&self, args: Self::Args) -> Result<ToolOutput>;
}

/// Why a dispatch produced an error result.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    Unknown(String),
    #[error("invalid arguments for `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("`{tool}` failed: {reason}")]
    Failed { tool: String, reason: String },
    #[error("`{0}` returned an empty result")]
    EmptyResult(String),
    #[error("`{0}` is a stop signal and cannot be executed")]
    Sentinel(String),
}

trait ErasedTool {
    fn call(&self, arguments: &Value) -> Result<ToolOutput, ToolError>;
}

struct Registered<T> {
    tool: T,
    validator: Validator,
}

impl<T: Tool> ErasedTool for Registered<T> {
    fn call(&self, arguments: &Value) -> Result<ToolOutput, ToolError> {
        let name = self.tool.name();
        let invalid = |reason: String| ToolError::InvalidArguments {
            tool: name.to_string(),
            reason,
        };
        if let Value::String(raw) = arguments {
            return Err(invalid(format!("arguments are not a JSON object: {raw}")));
        }
        let problems: Vec<String> = self
            .validator
            .iter_errors(arguments)
            .map(|err| err.to_string())
            .collect();
        if !problems.is_empty() {
            return Err(invalid(problems.join("; ")));
        }
        let args: T::Args =
            serde_json::from_value(arguments.clone()).map_err(|err| invalid(err.to_string()))?;
        self.tool.run(args).map_err(|err| ToolError::Failed {
            tool: name.to_string(),
            reason: format!("{err:#}"),
        })
    }
}

enum Entry {
    Tool(Box<dyn ErasedTool>),
    Sentinel,
}

/// Name → handler map plus the declared surface, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    entries: HashMap<String, Entry>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        let name = tool.name();
        let parameters = tool.parameters();
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&parameters)
            .map_err(|err| anyhow!("invalid parameter schema for `{name}`: {err}"))?;
        let spec = ToolSpec {
            name: name.to_string(),
            description: tool.description().to_string(),
            parameters,
        };
        self.insert(spec, Entry::Tool(Box::new(Registered { tool, validator })))
    }

    /// Declare a stop-tool. It is offered to the provider but never executed.
    pub fn register_sentinel(&mut self, name: &str, description: &str) -> Result<()> {
        let spec = ToolSpec {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        };
        self.insert(spec, Entry::Sentinel)
    }

    fn insert(&mut self, spec: ToolSpec, entry: Entry) -> Result<()> {
        if self.entries.contains_key(&spec.name) {
            bail!("tool `{}` registered twice", spec.name);
        }
        self.entries.insert(spec.name.clone(), entry);
        self.specs.push(spec);
        Ok(())
    }

    /// Declared surface sent with every provider call.
    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|spec| spec.name.as_str()).collect()
    }

    /// Run one call. Never fails; problems become an error [`ToolOutput`].
    #[instrument(skip_all, fields(tool = %call.name, call_id = %call.id))]
    pub fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let output = match self.try_dispatch(call) {
            Ok(output) => {
                debug!(bytes = output.content.len(), "tool finished");
                output
            }
            Err(err) => {
                warn!(err = %err, "tool call failed");
                ToolOutput::failure(err.to_string())
            }
        };
        ToolResult::new(call, output)
    }

    fn try_dispatch(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        let entry = self
            .entries
            .get(&call.name)
            .ok_or_else(|| ToolError::Unknown(call.name.clone()))?;
        let tool = match entry {
            Entry::Tool(tool) => tool,
            Entry::Sentinel => return Err(ToolError::Sentinel(call.name.clone())),
        };
        let output = tool.call(&call.arguments)?;
        if output.content.trim().is_empty() && output.error.is_none() {
            return Err(ToolError::EmptyResult(call.name.clone()));
        }
        Ok(output)
    }
}

/// The tool surface for one run, rooted at `workdir`.
pub fn default_registry(workdir: &Path, cfg: &ToolsConfig) -> Result<ToolRegistry> {
    let subprocess_timeout = Duration::from_secs(cfg.tool_timeout_secs);
    let http_timeout = Duration::from_secs(cfg.http_timeout_secs);

    let mut registry = ToolRegistry::new();
    registry.register(fs::ListDirectory::new(workdir))?;
    registry.register(fs::ReadFile::new(workdir, cfg.max_read_lines))?;
    registry.register(fs::WriteFile::new(workdir))?;
    registry.register(lint::Lint::new(
        workdir,
        subprocess_timeout,
        cfg.output_limit_bytes,
    ))?;
    registry.register(web::VisitWebPage::new(http_timeout, cfg.output_limit_bytes)?)?;
    registry.register(web::WebPageSearch::new(&cfg.search_url, http_timeout)?)?;
    registry.register_sentinel(
        FINISHED,
        "Call when the requested work is complete. Ends the turn.",
    )?;
    registry.register_sentinel(
        CONTINUE,
        "Call to end the turn early and receive the next instruction.",
    )?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct EchoArgs {
        text: String,
        #[serde(default)]
        repeat: Option<usize>,
    }

    struct Echo;

    impl Tool for Echo {
        type Args = EchoArgs;

        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echo text back"
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "repeat": {"type": "integer", "minimum": 0}
                },
                "required": ["text"]
            })
        }

        fn run(&self, args: EchoArgs) -> Result<ToolOutput> {
            if args.text == "boom" {
                bail!("exploded");
            }
            Ok(ToolOutput::ok(args.text.repeat(args.repeat.unwrap_or(1))))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Echo).expect("register");
        registry
            .register_sentinel(FINISHED, "done")
            .expect("sentinel");
        registry
    }

    fn dispatch(args: Value) -> ToolResult {
        registry().dispatch(&ToolCall::new("c1", "echo", args))
    }

    #[test]
    fn decodes_and_runs() {
        let result = dispatch(json!({"text": "ab", "repeat": 2}));
        assert_eq!(result.id, "c1");
        assert_eq!(result.output, ToolOutput::ok("abab"));
    }

    #[test]
    fn unknown_tool_is_in_band_error() {
        let result = registry().dispatch(&ToolCall::new("c9", "rm_rf", json!({})));
        assert_eq!(result.id, "c9");
        assert_eq!(result.output.error.as_deref(), Some("unknown tool `rm_rf`"));
    }

    #[test]
    fn schema_violation_is_in_band_error() {
        let result = dispatch(json!({"repeat": -1}));
        let err = result.output.error.expect("error");
        assert!(err.starts_with("invalid arguments for `echo`"), "{err}");
    }

    #[test]
    fn unparseable_payload_is_in_band_error() {
        let result = registry().dispatch(&ToolCall::from_raw("c2", "echo", "{\"text\":"));
        let err = result.output.error.expect("error");
        assert!(err.contains("not a JSON object"), "{err}");
    }

    #[test]
    fn handler_failure_and_empty_result_are_in_band_errors() {
        let failed = dispatch(json!({"text": "boom"}));
        assert_eq!(
            failed.output.error.as_deref(),
            Some("`echo` failed: exploded")
        );

        let empty = dispatch(json!({"text": "x", "repeat": 0}));
        assert_eq!(
            empty.output.error.as_deref(),
            Some("`echo` returned an empty result")
        );
    }

    #[test]
    fn sentinels_are_declared_but_not_executed() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["echo", FINISHED]);
        let result = registry.dispatch(&ToolCall::new("c3", FINISHED, json!({})));
        assert!(result.output.is_error());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = registry();
        assert!(registry.register(Echo).is_err());
        assert!(registry.register_sentinel(FINISHED, "again").is_err());
    }

    #[test]
    fn default_surface_is_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = default_registry(temp.path(), &ToolsConfig::default()).expect("registry");
        assert_eq!(
            registry.names(),
            vec![
                "list_directory",
                "read_file",
                "write_file",
                "lint",
                "visit_web_page",
                "web_page_search",
                FINISHED,
                CONTINUE,
            ]
        );
    }
}
