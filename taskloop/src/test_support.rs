//! Test-only doubles and builders: a scripted provider, oracle and diff
//! source, plus a scratch workspace.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::sentinel::{CONTINUE, FINISHED};
use crate::core::types::{CompletionRequest, CompletionResponse, ToolCall, ToolOutput};
use crate::core::verdict::{NO, Verdict, VerdictBasis, YES};
use crate::io::git::DiffSource;
use crate::io::prompt::Prompts;
use crate::io::provider::{CompletionClient, ProviderError};
use crate::io::workspace::{WIKI_DIR, WorkspacePaths};
use crate::oracle::Decide;
use crate::tools::fs::{ListDirectory, ReadFile, WriteFile};
use crate::tools::{Tool, ToolRegistry};

const PROMPT_EMBED_LIMIT: usize = 100_000;

/// Provider double: replays queued responses in order and records every
/// request it was given.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    responses: RefCell<VecDeque<Result<CompletionResponse, ProviderError>>>,
    requests: RefCell<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Result<CompletionResponse, ProviderError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }

    pub fn assert_drained(&self) {
        assert_eq!(self.remaining(), 0, "scripted responses left unused");
    }
}

impl CompletionClient for ScriptedClient {
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Transport("scripted client exhausted".into())))
    }
}

/// Oracle double answering from a queue; "no" once the queue runs dry.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    answers: RefCell<VecDeque<bool>>,
    questions: RefCell<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new(answers: Vec<bool>) -> Self {
        Self {
            answers: RefCell::new(answers.into()),
            questions: RefCell::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.borrow().clone()
    }
}

impl Decide for ScriptedOracle {
    fn decide(&self, question: &str) -> Verdict {
        self.questions.borrow_mut().push(question.to_string());
        match self.answers.borrow_mut().pop_front() {
            Some(answer) => Verdict {
                answer,
                basis: VerdictBasis::ToolCall,
            },
            None => Verdict::fallback(),
        }
    }
}

/// Diff source double; an empty diff once the queue runs dry.
#[derive(Debug, Default)]
pub struct ScriptedDiff {
    diffs: RefCell<VecDeque<String>>,
    calls: Cell<usize>,
}

impl ScriptedDiff {
    pub fn new(diffs: Vec<&str>) -> Self {
        Self {
            diffs: RefCell::new(diffs.into_iter().map(str::to_string).collect()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl DiffSource for ScriptedDiff {
    fn worktree_diff(&self) -> Result<String> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.diffs.borrow_mut().pop_front().unwrap_or_default())
    }
}

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall::new(id, name, arguments)
}

pub fn text_response(text: &str) -> Result<CompletionResponse, ProviderError> {
    tool_response(text, Vec::new())
}

pub fn tool_response(
    text: &str,
    tool_calls: Vec<ToolCall>,
) -> Result<CompletionResponse, ProviderError> {
    Ok(CompletionResponse {
        text: text.to_string(),
        tool_calls,
    })
}

/// Oracle-style answer: a single `yes` tool call.
pub fn yes() -> Result<CompletionResponse, ProviderError> {
    tool_response("", vec![call("answer", YES, json!({}))])
}

/// Oracle-style answer: a single `no` tool call.
pub fn no() -> Result<CompletionResponse, ProviderError> {
    tool_response("", vec![call("answer", NO, json!({}))])
}

#[derive(Debug, Deserialize)]
pub struct EchoArgs {
    pub text: String,
}

/// Tool double that returns its text and remembers every call.
#[derive(Debug, Default)]
pub struct EchoTool {
    seen: Rc<RefCell<Vec<String>>>,
}

impl Tool for EchoTool {
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
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    fn run(&self, args: EchoArgs) -> Result<ToolOutput> {
        self.seen.borrow_mut().push(args.text.clone());
        Ok(ToolOutput::ok(args.text))
    }
}

/// `echo` plus both sentinels. The returned log lists echoed texts in
/// dispatch order.
pub fn echo_registry() -> (ToolRegistry, Rc<RefCell<Vec<String>>>) {
    let tool = EchoTool::default();
    let seen = Rc::clone(&tool.seen);
    let mut registry = ToolRegistry::new();
    registry.register(tool).expect("register echo");
    add_sentinels(&mut registry);
    (registry, seen)
}

/// File tools rooted at `root` plus both sentinels. No network, no lint.
pub fn test_registry(root: &Path) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(ListDirectory::new(root))
        .expect("register list_directory");
    registry
        .register(ReadFile::new(root, 1000))
        .expect("register read_file");
    registry
        .register(WriteFile::new(root))
        .expect("register write_file");
    add_sentinels(&mut registry);
    registry
}

fn add_sentinels(registry: &mut ToolRegistry) {
    registry
        .register_sentinel(FINISHED, "done")
        .expect("register finished");
    registry
        .register_sentinel(CONTINUE, "next")
        .expect("register continue");
}

pub fn test_prompts() -> Prompts {
    Prompts::new(Path::new("/work"), WIKI_DIR, PROMPT_EMBED_LIMIT).expect("prompts")
}

/// Scratch working directory holding INPUT.md and TASKS.md.
pub struct TestWorkspace {
    _temp: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    pub fn new(input: &str, tasks: &str) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = fs::canonicalize(temp.path()).expect("canonicalize tempdir");
        let paths = WorkspacePaths::new(&root);
        fs::write(&paths.input_path, input).expect("write INPUT.md");
        fs::write(&paths.tasks_path, tasks).expect("write TASKS.md");
        Self { _temp: temp, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> WorkspacePaths {
        WorkspacePaths::new(&self.root)
    }

    pub fn prompts(&self) -> Prompts {
        Prompts::new(&self.root, WIKI_DIR, PROMPT_EMBED_LIMIT).expect("prompts")
    }

    pub fn input(&self) -> String {
        fs::read_to_string(self.paths().input_path).expect("read INPUT.md")
    }

    pub fn tasks(&self) -> String {
        fs::read_to_string(self.paths().tasks_path).expect("read TASKS.md")
    }
}

/// `git init` with one commit of `README.md` ("hi\n").
pub fn init_git_repo(root: &Path) {
    git(root, &["init", "--quiet"]);
    git(root, &["config", "user.email", "test@example.com"]);
    git(root, &["config", "user.name", "test"]);
    fs::write(root.join("README.md"), "hi\n").expect("write README.md");
    git(root, &["add", "README.md"]);
    git(root, &["commit", "--quiet", "-m", "chore: init"]);
}

fn git(root: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(root)
        .status()
        .unwrap_or_else(|err| panic!("git {}: {err}", args.join(" ")));
    assert!(status.success(), "git {} failed", args.join(" "));
}
