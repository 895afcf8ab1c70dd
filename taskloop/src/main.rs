//! Autonomous checklist-driven coding agent.
//!
//! `taskloop run` decomposes `INPUT.md` into `TASKS.md`, works the checklist
//! one item per cycle, and truncates both files once the checklist is judged
//! complete and the working tree diff is judged free of unfinished work.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use taskloop::cancel::CancelToken;
use taskloop::controller::{ControllerConfig, ControllerStop, CycleAction, TaskController};
use taskloop::exit_codes;
use taskloop::io::config::{AgentConfig, ProviderConfig, load_config, read_credential};
use taskloop::io::git::Git;
use taskloop::io::prompt::Prompts;
use taskloop::io::provider::{HttpCompletionClient, ProviderError, RetryingClient};
use taskloop::io::workspace::{
    InitOptions, WIKI_DIR, WorkspacePaths, init_workspace, resolve_workdir,
};
use taskloop::logging;
use taskloop::oracle::Oracle;
use taskloop::orchestrator::{Orchestrator, TurnConfig};
use taskloop::session::Session;
use taskloop::tools::default_registry;

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "Autonomous checklist-driven coding agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Work INPUT.md and TASKS.md until the checklist is done and the diff is clean.
    Run {
        /// Working directory holding INPUT.md and TASKS.md.
        #[arg(default_value = ".")]
        workdir: PathBuf,
        /// Config file (default: <WORKDIR>/.taskloop/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override `loop.max_cycles`.
        #[arg(long)]
        max_cycles: Option<u32>,
        /// Skip the documentation turn after completion.
        #[arg(long)]
        no_docs: bool,
    },
    /// Create INPUT.md, TASKS.md and `.taskloop/config.toml`.
    Init {
        #[arg(default_value = ".")]
        workdir: PathBuf,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the tool surface offered to the provider as JSON.
    Tools {
        #[arg(default_value = ".")]
        workdir: PathBuf,
    },
}

fn main() {
    logging::init("taskloop=info");
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            workdir,
            config,
            max_cycles,
            no_docs,
        } => cmd_run(workdir, config, max_cycles, no_docs),
        Command::Init { workdir, force } => cmd_init(workdir, force),
        Command::Tools { workdir } => cmd_tools(workdir),
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ProviderError>().is_some() {
        exit_codes::PROVIDER
    } else {
        exit_codes::INVALID
    }
}

fn load_workspace_config(paths: &WorkspacePaths, config: Option<PathBuf>) -> Result<AgentConfig> {
    let config_path = config.unwrap_or_else(|| paths.config_path.clone());
    load_config(&config_path)
}

fn provider_client(
    provider: &ProviderConfig,
    model: &str,
    api_key: &str,
    cancel: &CancelToken,
) -> Result<RetryingClient<HttpCompletionClient>> {
    let client = HttpCompletionClient::new(
        &provider.base_url,
        model,
        api_key,
        Duration::from_secs(provider.request_timeout_secs),
    )?;
    Ok(RetryingClient::new(
        client,
        provider.max_retries,
        Duration::from_millis(provider.retry_backoff_ms),
        cancel.clone(),
    ))
}

fn cmd_run(
    workdir: PathBuf,
    config: Option<PathBuf>,
    max_cycles: Option<u32>,
    no_docs: bool,
) -> Result<i32> {
    let root = resolve_workdir(&workdir)?;
    let paths = WorkspacePaths::new(&root);
    let mut cfg = load_workspace_config(&paths, config)?;
    if let Some(max_cycles) = max_cycles {
        cfg.looping.max_cycles = max_cycles;
    }
    if no_docs {
        cfg.looping.generate_docs = false;
    }
    cfg.validate().context("invalid settings")?;
    let api_key = read_credential(&cfg.provider.api_key_env)?;

    let cancel = CancelToken::new();
    cancel.install_signal_handlers()?;

    let tools = default_registry(&root, &cfg.tools)?;
    let prompts = Prompts::new(&root, WIKI_DIR, cfg.tools.output_limit_bytes)?;
    let orchestrator = Orchestrator::new(
        provider_client(&cfg.provider, &cfg.provider.model, &api_key, &cancel)?,
        &tools,
        &prompts,
        TurnConfig::from(&cfg),
        cancel.clone(),
    );
    let oracle = Oracle::new(
        provider_client(&cfg.provider, &cfg.provider.oracle_model, &api_key, &cancel)?,
        cfg.provider.temperature,
    );
    let git = Git::new(
        &root,
        Duration::from_secs(cfg.tools.tool_timeout_secs),
        cfg.tools.output_limit_bytes,
    );
    let controller = TaskController::new(
        orchestrator,
        oracle,
        git,
        &prompts,
        paths,
        ControllerConfig::from(&cfg),
        cancel,
    );

    let mut session = Session::new();
    let outcome = controller.run(&mut session, |report| {
        let action = match report.action {
            CycleAction::Continue => "continue",
            CycleAction::GapTasks => "gap tasks added",
            CycleAction::Finished => "finished",
        };
        println!(
            "cycle {}: {} ({} open, {} done)",
            report.cycle, action, report.progress.open, report.progress.done
        );
    })?;

    let code = match outcome.stop {
        ControllerStop::Completed => {
            println!(
                "run {}: complete after {} cycles",
                outcome.run_id, outcome.cycles
            );
            exit_codes::OK
        }
        ControllerStop::MaxCycles { max_cycles } => {
            eprintln!(
                "run {}: checklist still incomplete after {max_cycles} cycles",
                outcome.run_id
            );
            exit_codes::INCOMPLETE
        }
        ControllerStop::DeadlineExceeded => {
            eprintln!(
                "run {}: run deadline exceeded after {} cycles",
                outcome.run_id, outcome.cycles
            );
            exit_codes::INCOMPLETE
        }
        ControllerStop::Cancelled => {
            eprintln!("run {}: cancelled", outcome.run_id);
            exit_codes::CANCELLED
        }
    };
    Ok(code)
}

fn cmd_init(workdir: PathBuf, force: bool) -> Result<i32> {
    let root = resolve_workdir(&workdir)?;
    let paths = init_workspace(&root, &InitOptions { force })?;
    println!("initialized {}", paths.root.display());
    println!("write the task description to {}", paths.input_path.display());
    Ok(exit_codes::OK)
}

fn cmd_tools(workdir: PathBuf) -> Result<i32> {
    let root = resolve_workdir(&workdir)?;
    let cfg = load_workspace_config(&WorkspacePaths::new(&root), None)?;
    let tools = default_registry(&root, &cfg.tools)?;
    let json = serde_json::to_string_pretty(tools.specs()).context("serialize tool specs")?;
    println!("{json}");
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["taskloop", "run"]);
        match cli.command {
            Command::Run {
                workdir,
                config,
                max_cycles,
                no_docs,
            } => {
                assert_eq!(workdir, PathBuf::from("."));
                assert!(config.is_none());
                assert!(max_cycles.is_none());
                assert!(!no_docs);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_run_overrides() {
        let cli = Cli::parse_from([
            "taskloop",
            "run",
            "proj",
            "--max-cycles",
            "7",
            "--no-docs",
            "--config",
            "alt.toml",
        ]);
        match cli.command {
            Command::Run {
                workdir,
                config,
                max_cycles,
                no_docs,
            } => {
                assert_eq!(workdir, PathBuf::from("proj"));
                assert_eq!(config, Some(PathBuf::from("alt.toml")));
                assert_eq!(max_cycles, Some(7));
                assert!(no_docs);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["taskloop", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn provider_errors_map_to_provider_exit_code() {
        let err = anyhow::Error::new(ProviderError::Timeout).context("cycle 1 task turn");
        assert_eq!(exit_code_for(&err), exit_codes::PROVIDER);
        let err = anyhow::anyhow!("working directory missing");
        assert_eq!(exit_code_for(&err), exit_codes::INVALID);
    }
}
