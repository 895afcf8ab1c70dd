//! Git adapter for the diff gate.
//!
//! The controller only ever reads from git: it needs the working tree diff
//! (tracked changes plus untracked files) to decide whether finished-looking
//! work still contains unfinished markers.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::io::prompt::clip;

/// Prefix of git's stderr when run outside any repository.
const NOT_A_REPOSITORY: &str = "not a git repository";

/// Agent state directory, never part of the diff.
pub const STATE_DIR_PATHSPEC: &str = ":(exclude).taskloop";

/// Source of the working tree diff inspected by the completion gate.
pub trait DiffSource {
    fn worktree_diff(&self) -> Result<String>;
}

impl<T: DiffSource + ?Sized> DiffSource for &T {
    fn worktree_diff(&self) -> Result<String> {
        (**self).worktree_diff()
    }
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

impl StatusEntry {
    pub fn is_untracked(&self) -> bool {
        self.code == "??"
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        }
    }

    /// `Ok(false)` only when git itself reports that the workdir is outside
    /// any repository. Timeouts, a missing binary or a refused repository
    /// (for example `safe.directory`) are errors.
    pub fn is_repository(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        if out.success() {
            return Ok(true);
        }
        let stderr = out.stderr_text();
        if !out.timed_out && stderr.contains(NOT_A_REPOSITORY) {
            return Ok(false);
        }
        Err(anyhow!(
            "git rev-parse failed in {}: {}",
            self.workdir.display(),
            out.combined_text().trim()
        ))
    }

    pub fn has_head(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--verify", "--quiet", "HEAD"])?;
        if out.timed_out {
            return Err(anyhow!("git rev-parse HEAD timed out"));
        }
        Ok(out.success())
    }

    /// Get status entries (including untracked) in NUL-separated porcelain
    /// format, so paths arrive unquoted and unescaped.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-z", "-uall"])?;
        parse_status_z(&out)
    }

    /// Diff of every tracked change against HEAD (staged or not), followed by
    /// a creation diff for each untracked file. `.taskloop/` is excluded.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn diff_with_untracked(&self) -> Result<String> {
        let mut diff = if self.has_head()? {
            self.run_capture(&["diff", "HEAD", "--", ".", STATE_DIR_PATHSPEC])?
        } else {
            // Fresh repository: nothing to diff against, so combine index and worktree.
            let mut staged =
                self.run_capture(&["diff", "--cached", "--", ".", STATE_DIR_PATHSPEC])?;
            staged.push_str(&self.run_capture(&["diff", "--", ".", STATE_DIR_PATHSPEC])?);
            staged
        };

        let untracked: Vec<StatusEntry> = self
            .status_porcelain()?
            .into_iter()
            .filter(|entry| entry.is_untracked() && !is_state_path(&entry.path))
            .collect();
        for entry in &untracked {
            if diff.len() >= self.output_limit_bytes {
                break;
            }
            diff.push_str(&self.untracked_file_diff(&entry.path)?);
        }

        debug!(
            bytes = diff.len(),
            untracked = untracked.len(),
            "collected worktree diff"
        );
        Ok(clip(&diff, self.output_limit_bytes))
    }

    fn untracked_file_diff(&self, path: &str) -> Result<String> {
        let out = self.run(&["diff", "--no-index", "--", "/dev/null", path])?;
        // `--no-index` exits 1 when the files differ, which is the normal case.
        // Exit 1 without a diff means git could not read the file.
        match out.status.code() {
            Some(0) if !out.timed_out => Ok(out.stdout_text()),
            Some(1) if !out.timed_out && !out.stdout.is_empty() => Ok(out.stdout_text()),
            _ => Err(anyhow!(
                "git diff --no-index {path} failed: {}",
                out.stderr_text().trim()
            )),
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let out = self.run(args)?;
        if !out.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                out.combined_text().trim()
            ));
        }
        Ok(out.stdout_text())
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("git {}", args.join(" ")))
    }
}

impl DiffSource for Git {
    fn worktree_diff(&self) -> Result<String> {
        if !self.is_repository()? {
            warn!(
                workdir = %self.workdir.display(),
                "workdir is not a git repository; diff gate sees an empty diff"
            );
            return Ok(String::new());
        }
        self.diff_with_untracked()
    }
}

fn is_state_path(path: &str) -> bool {
    path == ".taskloop" || path.starts_with(".taskloop/")
}

/// Parse `git status --porcelain=v1 -z`. Each record is `XY path`; renames
/// and copies carry the original path as an extra NUL-terminated field.
fn parse_status_z(out: &str) -> Result<Vec<StatusEntry>> {
    let mut entries = Vec::new();
    let mut fields = out.split('\0').filter(|field| !field.is_empty());
    while let Some(record) = fields.next() {
        let entry = parse_status_record(record)?;
        if entry.code.contains(['R', 'C']) {
            fields.next();
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_status_record(record: &str) -> Result<StatusEntry> {
    match (record.get(..2), record.get(2..3), record.get(3..)) {
        (Some(code), Some(" "), Some(path)) if !path.is_empty() => Ok(StatusEntry {
            code: code.to_string(),
            path: path.to_string(),
        }),
        _ => Err(anyhow!("unexpected porcelain record: '{record}'")),
    }
}
