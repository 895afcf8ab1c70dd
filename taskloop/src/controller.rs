//! Outer task loop: decompose INPUT.md, work TASKS.md item by item, and stop
//! only when the checklist is judged complete and the diff judged clean in the
//! same cycle.

use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::budget::{deadline_after, remaining_budget};
use crate::core::checklist::{Progress, progress};
use crate::core::markers::scan_added_lines;
use crate::core::verdict::Verdict;
use crate::io::config::AgentConfig;
use crate::io::git::DiffSource;
use crate::io::iteration_log::{CycleWriteRequest, new_run_id, write_cycle};
use crate::io::prompt::Prompts;
use crate::io::provider::CompletionClient;
use crate::io::workspace::{
    WorkspacePaths, ensure_task_files, read_input, read_tasks, truncate_task_files,
};
use crate::oracle::Decide;
use crate::orchestrator::{Orchestrator, TurnOutcome, TurnStop};
use crate::session::Session;

const DEFAULT_MARKER_HINTS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub max_cycles: u32,
    /// Whole-run wall-clock budget; `0` disables it.
    pub run_timeout_secs: u64,
    pub generate_docs: bool,
    /// Marker hits embedded in the diff question.
    pub marker_hint_limit: usize,
}

impl From<&AgentConfig> for ControllerConfig {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            max_cycles: cfg.looping.max_cycles,
            run_timeout_secs: cfg.looping.run_timeout_secs,
            generate_docs: cfg.looping.generate_docs,
            marker_hint_limit: DEFAULT_MARKER_HINTS,
        }
    }
}

/// Reason why [`TaskController::run`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerStop {
    /// Both gates passed; INPUT.md and TASKS.md were truncated.
    Completed,
    MaxCycles { max_cycles: u32 },
    DeadlineExceeded,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOutcome {
    pub run_id: String,
    pub cycles: u32,
    pub stop: ControllerStop,
}

/// What a cycle decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleAction {
    /// Checklist judged incomplete; run the next task.
    Continue,
    /// Checklist complete but the diff has unfinished work; tasks were added.
    GapTasks,
    /// Both gates passed.
    Finished,
}

/// Everything recorded about one cycle. Written to `meta.json`.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: String,
    pub cycle: u32,
    pub turn: TurnOutcome,
    pub progress: Progress,
    pub complete: Verdict,
    pub markers: Option<Verdict>,
    pub marker_hints: usize,
    pub gap_turn: Option<TurnOutcome>,
    pub action: CycleAction,
    pub duration_ms: u64,
}

pub struct TaskController<'a, C, O, D> {
    orchestrator: Orchestrator<'a, C>,
    oracle: O,
    diffs: D,
    prompts: &'a Prompts,
    paths: WorkspacePaths,
    config: ControllerConfig,
    cancel: CancelToken,
}

impl<'a, C, O, D> TaskController<'a, C, O, D>
where
    C: CompletionClient,
    O: Decide,
    D: DiffSource,
{
    pub fn new(
        orchestrator: Orchestrator<'a, C>,
        oracle: O,
        diffs: D,
        prompts: &'a Prompts,
        paths: WorkspacePaths,
        config: ControllerConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            orchestrator,
            oracle,
            diffs,
            prompts,
            paths,
            config,
            cancel,
        }
    }

    /// Drive the workspace until the dual gate passes or a limit stops the run.
    ///
    /// Provider failures surface as errors and leave both task files as they
    /// were. `on_cycle` sees every cycle report after it is written to disk.
    #[instrument(skip_all, fields(root = %self.paths.root.display()))]
    pub fn run<F: FnMut(&CycleReport)>(
        &self,
        session: &mut Session,
        mut on_cycle: F,
    ) -> Result<ControllerOutcome> {
        let run_id = new_run_id(&self.paths.root);
        let deadline = deadline_after(self.config.run_timeout_secs);
        let outcome = |cycles: u32, stop: ControllerStop| ControllerOutcome {
            run_id: run_id.clone(),
            cycles,
            stop,
        };

        ensure_task_files(&self.paths)?;
        let input = read_input(&self.paths)?;
        let tasks = read_tasks(&self.paths)?;
        if input.trim().is_empty() && tasks.trim().is_empty() {
            bail!(
                "nothing to do: {} and {} are both empty",
                self.paths.input_path.display(),
                self.paths.tasks_path.display()
            );
        }

        if tasks.trim().is_empty() {
            if let Some(stop) = self.interrupted(deadline) {
                return Ok(outcome(0, stop));
            }
            info!(run_id = %run_id, "decomposing INPUT.md into TASKS.md");
            let turn = self
                .orchestrator
                .run_turn(session, &self.prompts.decompose()?)
                .context("decomposition turn")?;
            if turn.stop == TurnStop::Cancelled {
                return Ok(outcome(0, ControllerStop::Cancelled));
            }
        } else {
            info!(run_id = %run_id, "resuming from existing TASKS.md");
        }

        let mut cycle = 0u32;
        loop {
            if let Some(stop) = self.interrupted(deadline) {
                return Ok(outcome(cycle, stop));
            }
            if cycle >= self.config.max_cycles {
                warn!(max_cycles = self.config.max_cycles, "cycle cap reached");
                return Ok(outcome(
                    cycle,
                    ControllerStop::MaxCycles {
                        max_cycles: self.config.max_cycles,
                    },
                ));
            }
            cycle += 1;

            let report = self.run_cycle(session, &run_id, cycle)?;
            write_cycle(&CycleWriteRequest {
                root: &self.paths.root,
                run_id: &run_id,
                cycle,
                meta: &report,
                transcript: &session.snapshot(),
            })?;
            on_cycle(&report);

            let cancelled = report.turn.stop == TurnStop::Cancelled
                || report
                    .gap_turn
                    .as_ref()
                    .is_some_and(|turn| turn.stop == TurnStop::Cancelled);
            if cancelled {
                return Ok(outcome(cycle, ControllerStop::Cancelled));
            }
            if report.action != CycleAction::Finished {
                continue;
            }

            if self.config.generate_docs {
                info!(cycle, "writing documentation");
                let docs = self
                    .orchestrator
                    .run_turn(session, &self.prompts.docs()?)
                    .context("documentation turn")?;
                if docs.stop == TurnStop::Cancelled {
                    return Ok(outcome(cycle, ControllerStop::Cancelled));
                }
            }
            truncate_task_files(&self.paths)?;
            info!(cycle, run_id = %run_id, "all tasks complete");
            return Ok(outcome(cycle, ControllerStop::Completed));
        }
    }

    #[instrument(skip_all, fields(cycle = cycle))]
    fn run_cycle(&self, session: &mut Session, run_id: &str, cycle: u32) -> Result<CycleReport> {
        let started = Instant::now();
        let turn = self
            .orchestrator
            .run_turn(session, &self.prompts.next_task()?)
            .with_context(|| format!("cycle {cycle} task turn"))?;

        let mut report = CycleReport {
            run_id: run_id.to_string(),
            cycle,
            turn,
            progress: Progress::default(),
            complete: Verdict::fallback(),
            markers: None,
            marker_hints: 0,
            gap_turn: None,
            action: CycleAction::Continue,
            duration_ms: 0,
        };
        if report.turn.stop == TurnStop::Cancelled {
            report.duration_ms = elapsed_ms(started);
            return Ok(report);
        }

        // The provider edits TASKS.md through tools; disk is the source of truth.
        let tasks = read_tasks(&self.paths)?;
        report.progress = progress(&tasks);
        report.complete = self
            .oracle
            .decide(&self.prompts.tasks_complete(&tasks, &report.turn.text)?);
        info!(
            cycle,
            open = report.progress.open,
            done = report.progress.done,
            total = report.progress.total(),
            complete = report.complete.answer,
            "checklist judged"
        );

        if report.complete.answer {
            let diff = self.diffs.worktree_diff().context("collect worktree diff")?;
            let hints = scan_added_lines(&diff, self.config.marker_hint_limit);
            report.marker_hints = hints.len();
            let markers = self
                .oracle
                .decide(&self.prompts.diff_markers(&diff, &hints)?);
            report.markers = Some(markers);

            if markers.answer {
                info!(cycle, hints = hints.len(), "diff has unfinished work; adding tasks");
                let gap = self
                    .orchestrator
                    .run_turn(session, &self.prompts.gap_tasks(&diff)?)
                    .with_context(|| format!("cycle {cycle} gap turn"))?;
                report.gap_turn = Some(gap);
                report.action = CycleAction::GapTasks;
            } else {
                report.action = CycleAction::Finished;
            }
        }

        report.duration_ms = elapsed_ms(started);
        Ok(report)
    }

    fn interrupted(&self, deadline: Option<Instant>) -> Option<ControllerStop> {
        if self.cancel.is_cancelled() {
            return Some(ControllerStop::Cancelled);
        }
        match deadline {
            Some(deadline) if remaining_budget(deadline).is_none() => {
                warn!("run deadline exceeded");
                Some(ControllerStop::DeadlineExceeded)
            }
            _ => None,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
