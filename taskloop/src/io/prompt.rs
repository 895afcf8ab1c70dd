//! Prompt rendering for provider turns and oracle questions.
//!
//! Templates live next to this file and are compiled once at startup. Text
//! pulled from disk or git (checklist, diff, turn response) is clipped to a
//! byte budget before embedding.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::markers::MarkerHit;

const TEMPLATES: [(&str, &str); 7] = [
    ("system", include_str!("prompts/system.md")),
    ("decompose", include_str!("prompts/decompose.md")),
    ("next_task", include_str!("prompts/next_task.md")),
    ("tasks_complete", include_str!("prompts/tasks_complete.md")),
    ("diff_markers", include_str!("prompts/diff_markers.md")),
    ("gap_tasks", include_str!("prompts/gap_tasks.md")),
    ("docs", include_str!("prompts/docs.md")),
];

#[derive(Debug, Serialize)]
struct HintContext<'a> {
    file: Option<&'a str>,
    line: &'a str,
}

/// Renders every prompt the agent sends.
pub struct Prompts {
    env: Environment<'static>,
    workdir: String,
    wiki_dir: String,
    embed_limit_bytes: usize,
}

impl std::fmt::Debug for Prompts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompts")
            .field("workdir", &self.workdir)
            .field("embed_limit_bytes", &self.embed_limit_bytes)
            .finish_non_exhaustive()
    }
}

impl Prompts {
    pub fn new(workdir: &Path, wiki_dir: &str, embed_limit_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("compile prompt template {name}"))?;
        }
        Ok(Self {
            env,
            workdir: workdir.display().to_string(),
            wiki_dir: wiki_dir.to_string(),
            embed_limit_bytes,
        })
    }

    /// System directive synthesized before every provider call.
    pub fn system(&self, now: &str) -> Result<String> {
        self.render("system", context! { workdir => &self.workdir, now => now })
    }

    pub fn decompose(&self) -> Result<String> {
        self.render("decompose", context! {})
    }

    pub fn next_task(&self) -> Result<String> {
        self.render("next_task", context! {})
    }

    /// Oracle question: are all checklist items done, given the last turn?
    pub fn tasks_complete(&self, tasks: &str, response: &str) -> Result<String> {
        self.render(
            "tasks_complete",
            context! {
                tasks => self.clip(tasks),
                response => self.clip(response),
            },
        )
    }

    /// Oracle question: does the diff still contain unfinished work?
    pub fn diff_markers(&self, diff: &str, hints: &[MarkerHit]) -> Result<String> {
        let hints: Vec<HintContext<'_>> = hints
            .iter()
            .map(|hit| HintContext {
                file: hit.file.as_deref(),
                line: &hit.line,
            })
            .collect();
        self.render(
            "diff_markers",
            context! { diff => self.clip(diff), hints => hints },
        )
    }

    pub fn gap_tasks(&self, diff: &str) -> Result<String> {
        self.render("gap_tasks", context! { diff => self.clip(diff) })
    }

    pub fn docs(&self) -> Result<String> {
        self.render("docs", context! { wiki_dir => &self.wiki_dir })
    }

    fn clip(&self, text: &str) -> String {
        clip(text.trim(), self.embed_limit_bytes)
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let rendered = self
            .env
            .get_template(name)
            .and_then(|template| template.render(ctx))
            .with_context(|| format!("render prompt {name}"))?;
        debug!(template = name, bytes = rendered.len(), "rendered prompt");
        Ok(rendered)
    }
}

/// Truncate `text` to at most `limit` bytes on a char boundary, noting how
/// much was cut.
pub fn clip(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n[truncated {} bytes]",
        &text[..end],
        text.len() - end
    )
}
