//! Working directory layout: the two task files and `.taskloop/` state.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::io::config::{AgentConfig, write_config};

pub const INPUT_FILE: &str = "INPUT.md";
pub const TASKS_FILE: &str = "TASKS.md";
pub const STATE_DIR: &str = ".taskloop";
pub const WIKI_DIR: &str = "wiki";

const STATE_GITIGNORE: &str = "iterations/\n";

/// Canonical paths for one working directory.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub input_path: PathBuf,
    pub tasks_path: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub iterations_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub wiki_dir: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR);
        Self {
            input_path: root.join(INPUT_FILE),
            tasks_path: root.join(TASKS_FILE),
            config_path: state_dir.join("config.toml"),
            iterations_dir: state_dir.join("iterations"),
            gitignore_path: state_dir.join(".gitignore"),
            wiki_dir: root.join(WIKI_DIR),
            state_dir,
            root,
        }
    }
}

/// Resolve the working-directory argument to an absolute directory.
pub fn resolve_workdir(arg: &Path) -> Result<PathBuf> {
    if !arg.exists() {
        return Err(anyhow!("working directory {} does not exist", arg.display()));
    }
    if !arg.is_dir() {
        return Err(anyhow!("working directory {} is not a directory", arg.display()));
    }
    fs::canonicalize(arg).with_context(|| format!("resolve {}", arg.display()))
}

/// Which task files had to be created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreatedFiles {
    pub input: bool,
    pub tasks: bool,
}

/// Create INPUT.md and TASKS.md empty when absent. Existing files are left alone.
pub fn ensure_task_files(paths: &WorkspacePaths) -> Result<CreatedFiles> {
    let created = CreatedFiles {
        input: create_if_missing(&paths.input_path)?,
        tasks: create_if_missing(&paths.tasks_path)?,
    };
    if created.input || created.tasks {
        info!(input = created.input, tasks = created.tasks, "created task files");
    }
    Ok(created)
}

fn create_if_missing(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    fs::write(path, "").with_context(|| format!("create {}", path.display()))?;
    Ok(true)
}

pub fn read_input(paths: &WorkspacePaths) -> Result<String> {
    read_text(&paths.input_path)
}

/// Read the checklist from disk. The provider rewrites it through tools, so
/// this is the only trustworthy view of progress.
pub fn read_tasks(paths: &WorkspacePaths) -> Result<String> {
    read_text(&paths.tasks_path)
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Empty both task files after the completion gate passes.
pub fn truncate_task_files(paths: &WorkspacePaths) -> Result<()> {
    for path in [&paths.input_path, &paths.tasks_path] {
        fs::write(path, "").with_context(|| format!("truncate {}", path.display()))?;
    }
    Ok(())
}

/// Options for [`init_workspace`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite an existing `.taskloop/config.toml`.
    pub force: bool,
}

/// Scaffold a working directory: task files, `.taskloop/` with a default
/// config and a `.gitignore` for iteration records.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<WorkspacePaths> {
    let paths = WorkspacePaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "taskloop init: {} exists but is not a directory",
            paths.state_dir.display()
        ));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "taskloop init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.iterations_dir)
        .with_context(|| format!("create directory {}", paths.iterations_dir.display()))?;
    fs::write(&paths.gitignore_path, STATE_GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &AgentConfig::default())?;
    ensure_task_files(&paths)?;
    Ok(paths)
}
