//! CLI tests for the `taskloop` binary.
//!
//! Spawns the binary and checks exit codes and output for commands that do
//! not reach a provider.

use std::fs;
use std::process::Command;

use serde_json::Value;
use taskloop::exit_codes;

fn taskloop() -> Command {
    Command::new(env!("CARGO_BIN_EXE_taskloop"))
}

#[test]
fn tools_prints_declared_surface() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = taskloop()
        .arg("tools")
        .arg(temp.path())
        .output()
        .expect("taskloop tools");
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let specs: Value = serde_json::from_slice(&output.stdout).expect("json");
    let names: Vec<&str> = specs
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|spec| spec["name"].as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "list_directory",
            "read_file",
            "write_file",
            "lint",
            "visit_web_page",
            "web_page_search",
            "finished",
            "continue",
        ]
    );
}

#[test]
fn run_without_credential_fails_before_any_work() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("INPUT.md"), "Add a health-check endpoint").expect("write");
    let output = taskloop()
        .arg("run")
        .arg(temp.path())
        .env_remove("OPENAI_API_KEY")
        .output()
        .expect("taskloop run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("OPENAI_API_KEY"), "{stderr}");
    assert_eq!(
        fs::read_to_string(temp.path().join("INPUT.md")).expect("read"),
        "Add a health-check endpoint"
    );
}

#[test]
fn run_in_missing_directory_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = taskloop()
        .arg("run")
        .arg(temp.path().join("nope"))
        .env("OPENAI_API_KEY", "test-key")
        .status()
        .expect("taskloop run");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn init_scaffolds_once_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = taskloop()
        .arg("init")
        .arg(temp.path())
        .status()
        .expect("taskloop init");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert!(temp.path().join("INPUT.md").exists());
    assert!(temp.path().join("TASKS.md").exists());
    assert!(temp.path().join(".taskloop/config.toml").exists());

    let status = taskloop()
        .arg("init")
        .arg(temp.path())
        .status()
        .expect("taskloop init again");
    assert_eq!(status.code(), Some(exit_codes::INVALID));

    let status = taskloop()
        .args(["init", "--force"])
        .arg(temp.path())
        .status()
        .expect("taskloop init --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
}
