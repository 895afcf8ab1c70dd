//! End-to-end controller runs over a real git working tree with scripted
//! provider and oracle models.

use std::fs;
use std::time::Duration;

use serde_json::json;
use taskloop::cancel::CancelToken;
use taskloop::controller::{ControllerConfig, ControllerStop, CycleAction, TaskController};
use taskloop::core::sentinel::FINISHED;
use taskloop::core::types::Role;
use taskloop::io::git::Git;
use taskloop::io::provider::ProviderError;
use taskloop::oracle::Oracle;
use taskloop::orchestrator::{Orchestrator, TurnConfig};
use taskloop::session::Session;
use taskloop::test_support::{
    ScriptedClient, TestWorkspace, call, init_git_repo, no, test_registry, tool_response, yes,
};

fn controller_config(max_cycles: u32) -> ControllerConfig {
    ControllerConfig {
        max_cycles,
        run_timeout_secs: 0,
        generate_docs: false,
        marker_hint_limit: 20,
    }
}

#[test]
fn health_check_request_runs_to_completion() {
    let workspace = TestWorkspace::new("Add a health-check endpoint", "");
    init_git_repo(workspace.root());
    let tools = test_registry(workspace.root());
    let prompts = workspace.prompts();

    let provider = ScriptedClient::new(vec![
        tool_response(
            "Split into one task.",
            vec![
                call(
                    "d1",
                    "write_file",
                    json!({"path": "TASKS.md", "content": "- [ ] Add GET /health returning 200\n"}),
                ),
                call("d2", FINISHED, json!({})),
            ],
        ),
        tool_response(
            "Added GET /health.",
            vec![
                call(
                    "t1",
                    "write_file",
                    json!({
                        "path": "health.go",
                        "content": "package main\n\nfunc health() int { return 200 }\n"
                    }),
                ),
                call(
                    "t2",
                    "write_file",
                    json!({"path": "TASKS.md", "content": "- [x] Add GET /health returning 200\n"}),
                ),
                call("t3", FINISHED, json!({})),
            ],
        ),
    ]);
    let oracle_client = ScriptedClient::new(vec![yes(), no()]);

    let cancel = CancelToken::new();
    let orchestrator = Orchestrator::new(
        &provider,
        &tools,
        &prompts,
        TurnConfig::default(),
        cancel.clone(),
    );
    let git = Git::new(workspace.root(), Duration::from_secs(30), 100_000);
    let controller = TaskController::new(
        orchestrator,
        Oracle::new(&oracle_client, 0.7),
        git,
        &prompts,
        workspace.paths(),
        controller_config(5),
        cancel,
    );

    let mut session = Session::new();
    let mut actions = Vec::new();
    let outcome = controller
        .run(&mut session, |report| actions.push(report.action))
        .expect("run");

    assert_eq!(outcome.stop, ControllerStop::Completed);
    assert_eq!(actions, vec![CycleAction::Finished]);
    assert_eq!(workspace.input(), "");
    assert_eq!(workspace.tasks(), "");
    assert!(workspace.root().join("health.go").exists());
    provider.assert_drained();
    oracle_client.assert_drained();

    // The completion question saw the checklist as rewritten on disk.
    let questions = oracle_client.requests();
    let completion = &questions[0].messages[1].content;
    assert!(completion.contains("- [x] Add GET /health returning 200"), "{completion}");
    assert!(completion.contains("Added GET /health."), "{completion}");
    // The diff question saw the new, untracked file from the real worktree.
    let diff_question = &questions[1].messages[1].content;
    assert!(diff_question.contains("+func health() int"), "{diff_question}");
    assert!(!diff_question.contains(".taskloop"), "{diff_question}");

    // The persisted log never holds a system message.
    assert!(session.snapshot().iter().all(|m| m.role != Role::System));
}

#[test]
fn claimed_completion_without_checklist_progress_keeps_running() {
    let workspace = TestWorkspace::new("Write docs", "- [ ] Write README\n");
    let tools = test_registry(workspace.root());
    let prompts = workspace.prompts();

    // The provider says it is done but never updates TASKS.md.
    let provider = ScriptedClient::new(vec![
        tool_response("All tasks are done!", vec![call("a", FINISHED, json!({}))]),
        tool_response("Done, really.", vec![call("b", FINISHED, json!({}))]),
    ]);
    // First verdict is an explicit no; the second call fails and degrades to no.
    let oracle_client = ScriptedClient::new(vec![no(), Err(ProviderError::Timeout)]);

    let cancel = CancelToken::new();
    let orchestrator = Orchestrator::new(
        &provider,
        &tools,
        &prompts,
        TurnConfig::default(),
        cancel.clone(),
    );
    let git = Git::new(workspace.root(), Duration::from_secs(30), 100_000);
    let controller = TaskController::new(
        orchestrator,
        Oracle::new(&oracle_client, 0.7),
        git,
        &prompts,
        workspace.paths(),
        controller_config(2),
        cancel,
    );

    let mut reports = Vec::new();
    let outcome = controller
        .run(&mut Session::new(), |report| reports.push(report.clone()))
        .expect("run");

    assert_eq!(outcome.stop, ControllerStop::MaxCycles { max_cycles: 2 });
    assert_eq!(outcome.cycles, 2);
    assert!(reports.iter().all(|r| r.action == CycleAction::Continue));
    assert!(reports.iter().all(|r| r.progress.open == 1));
    assert_eq!(workspace.input(), "Write docs");
    assert_eq!(workspace.tasks(), "- [ ] Write README\n");

    let meta = workspace
        .root()
        .join(".taskloop/iterations")
        .join(&outcome.run_id)
        .join("2/meta.json");
    let meta: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(meta).expect("read meta")).expect("json");
    assert_eq!(meta["action"], "continue");
    assert_eq!(meta["complete"]["basis"], "default");
}
