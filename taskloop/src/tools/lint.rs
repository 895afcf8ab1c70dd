//! `lint`: tidy, vet and format the Go package containing a file.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::Tool;
use super::fs::resolve_in_workdir;
use crate::core::types::ToolOutput;
use crate::io::process::run_command_with_timeout;

/// Steps run in order; the first failing step ends the check.
const STEPS: [&[&str]; 3] = [&["mod", "tidy"], &["vet", "."], &["fmt", "."]];

#[derive(Debug, Deserialize)]
pub struct LintArgs {
    pub path: String,
}

pub struct Lint {
    root: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Lint {
    pub fn new(root: &Path, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            root: root.to_path_buf(),
            timeout,
            output_limit_bytes,
        }
    }

    fn package_dir(&self, requested: &str) -> Result<PathBuf> {
        let path = resolve_in_workdir(&self.root, requested)?;
        if path.is_dir() {
            return Ok(path);
        }
        Ok(path.parent().map_or_else(|| self.root.clone(), Path::to_path_buf))
    }
}

impl Tool for Lint {
    type Args = LintArgs;

    fn name(&self) -> &'static str {
        "lint"
    }

    fn description(&self) -> &'static str {
        "Run `go mod tidy`, `go vet` and `go fmt` for the package containing a file. \
         Problems are reported in the error field."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Go file or package directory, relative to the working directory"
                }
            },
            "required": ["path"]
        })
    }

    fn run(&self, args: LintArgs) -> Result<ToolOutput> {
        let dir = self.package_dir(&args.path)?;
        let mut formatted = String::new();
        for step in STEPS {
            let mut cmd = Command::new("go");
            cmd.args(step).current_dir(&dir);
            let out = run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)?;
            let label = format!("go {}", step.join(" "));
            debug!(step = %label, exit_code = ?out.status.code(), "lint step finished");

            let report = out.combined_text();
            let vet_findings = step[0] == "vet" && !report.trim().is_empty();
            if !out.success() || vet_findings {
                return Ok(ToolOutput::failure(format!("{label}:\n{}", report.trim()))
                    .with_metadata("step", label));
            }
            if step[0] == "fmt" {
                formatted = out.stdout_text();
            }
        }

        let content = if formatted.trim().is_empty() {
            "No problems found".to_string()
        } else {
            format!("No problems found. Reformatted:\n{}", formatted.trim())
        };
        Ok(ToolOutput::ok(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_dir_is_parent_of_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = std::fs::canonicalize(temp.path()).expect("canonicalize");
        std::fs::create_dir_all(root.join("cmd")).expect("mkdir");
        std::fs::write(root.join("cmd/main.go"), "package main\n").expect("write");

        let lint = Lint::new(&root, Duration::from_secs(1), 1024);
        assert_eq!(lint.package_dir("cmd/main.go").expect("dir"), root.join("cmd"));
        assert_eq!(lint.package_dir("cmd").expect("dir"), root.join("cmd"));
        assert!(lint.package_dir("../elsewhere.go").is_err());
    }
}
