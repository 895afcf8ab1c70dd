//! Agent configuration stored under `.taskloop/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::conversation::TrimPolicy;

/// Agent configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults so an absent or
/// partial file is always usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub provider: ProviderConfig,
    #[serde(rename = "loop")]
    pub looping: LoopConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// OpenAI-compatible endpoint root; `/chat/completions` is appended.
    pub base_url: String,
    pub model: String,
    /// Model used for yes/no oracle questions. Usually smaller and cheaper.
    pub oracle_model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// First backoff delay; doubles on each retry.
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Provider calls allowed in one orchestrator turn.
    pub max_turns: u32,
    /// Conversation window kept after every append.
    pub max_messages: usize,
    pub trim_policy: TrimPolicy,
    /// Controller cycles (next-task turns) before giving up.
    pub max_cycles: u32,
    /// Whole-run wall-clock budget; `0` disables it.
    pub run_timeout_secs: u64,
    /// Run the documentation turn after the completion gate passes.
    pub generate_docs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Wall-clock limit for subprocess tools (lint, git).
    pub tool_timeout_secs: u64,
    /// HTTP timeout for web tools.
    pub http_timeout_secs: u64,
    /// Truncate tool and diff output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Upper bound on lines returned by one `read_file` call.
    pub max_read_lines: usize,
    /// HTML search endpoint queried by `web_page_search`.
    pub search_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1".to_string(),
            oracle_model: "gpt-4.1-nano".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.7,
            request_timeout_secs: 300,
            max_retries: 3,
            retry_backoff_ms: 2_000,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            max_messages: 30,
            trim_policy: TrimPolicy::Window,
            max_cycles: 100,
            run_timeout_secs: 0,
            generate_docs: true,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 120,
            http_timeout_secs: 30,
            output_limit_bytes: 100_000,
            max_read_lines: 1_000,
            search_url: "https://html.duckduckgo.com/html/".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        let p = &self.provider;
        if p.base_url.trim().is_empty() {
            return Err(anyhow!("provider.base_url must be non-empty"));
        }
        if p.model.trim().is_empty() || p.oracle_model.trim().is_empty() {
            return Err(anyhow!("provider.model and provider.oracle_model must be non-empty"));
        }
        if p.api_key_env.trim().is_empty() {
            return Err(anyhow!("provider.api_key_env must be non-empty"));
        }
        if !(0.0..=2.0).contains(&p.temperature) {
            return Err(anyhow!("provider.temperature must be within 0.0..=2.0"));
        }
        if p.request_timeout_secs == 0 {
            return Err(anyhow!("provider.request_timeout_secs must be > 0"));
        }
        let l = &self.looping;
        if l.max_turns == 0 {
            return Err(anyhow!("loop.max_turns must be > 0"));
        }
        if l.max_messages == 0 {
            return Err(anyhow!("loop.max_messages must be > 0"));
        }
        if l.max_cycles == 0 {
            return Err(anyhow!("loop.max_cycles must be > 0"));
        }
        let t = &self.tools;
        if t.tool_timeout_secs == 0 || t.http_timeout_secs == 0 {
            return Err(anyhow!("tools timeouts must be > 0"));
        }
        if t.output_limit_bytes == 0 {
            return Err(anyhow!("tools.output_limit_bytes must be > 0"));
        }
        if t.max_read_lines == 0 {
            return Err(anyhow!("tools.max_read_lines must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Read the provider credential from the environment variable `env_var`.
pub fn read_credential(env_var: &str) -> Result<String> {
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(anyhow!(
            "missing provider credential: set the {env_var} environment variable"
        )),
    }
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/config.toml");
        let mut cfg = AgentConfig::default();
        cfg.looping.trim_policy = TrimPolicy::PairAware;
        cfg.provider.model = "local-model".to_string();
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[loop]\nmax_messages = 12\ntrim_policy = \"pair_aware\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.looping.max_messages, 12);
        assert_eq!(cfg.looping.trim_policy, TrimPolicy::PairAware);
        assert_eq!(cfg.provider, ProviderConfig::default());
    }

    #[test]
    fn missing_credential_is_an_error() {
        let err = read_credential("TASKLOOP_TEST_UNSET_CREDENTIAL_VAR").expect_err("missing");
        assert!(err.to_string().contains("TASKLOOP_TEST_UNSET_CREDENTIAL_VAR"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut cfg = AgentConfig::default();
        cfg.looping.max_messages = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AgentConfig::default();
        cfg.tools.output_limit_bytes = 0;
        assert!(cfg.validate().is_err());
    }
}
