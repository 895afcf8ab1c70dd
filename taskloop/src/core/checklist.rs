//! Markdown checkbox counting for TASKS.md.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static CHECKBOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:[-*+]|\d+[.)])\s+\[([ xX])\]").expect("checkbox regex")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub open: usize,
    pub done: usize,
}

impl Progress {
    pub fn total(&self) -> usize {
        self.open + self.done
    }
}

pub fn progress(checklist: &str) -> Progress {
    CHECKBOX
        .captures_iter(checklist)
        .fold(Progress::default(), |mut acc, caps| {
            if &caps[1] == " " {
                acc.open += 1;
            } else {
                acc.done += 1;
            }
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_open_and_done_items() {
        let tasks = "# Tasks\n- [x] scaffold\n- [ ] add route\n  * [X] nested\n1. [ ] numbered\nplain - [ ] inline\n";
        assert_eq!(progress(tasks), Progress { open: 2, done: 2 });
    }

    #[test]
    fn empty_checklist_has_no_items() {
        assert_eq!(progress("").total(), 0);
    }
}
