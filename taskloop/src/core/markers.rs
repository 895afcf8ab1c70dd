//! Pre-scan of a diff for unfinished-work markers.
//!
//! The hits are only hints embedded in the oracle question; the oracle makes
//! the call.

use std::sync::LazyLock;

use regex::Regex;

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(TODO|FIXME|XXX|HACK|placeholder|not implemented|unimplemented!?|todo!)(?:\b|\()",
    )
    .expect("marker regex")
});

/// One added line that looks unfinished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerHit {
    pub file: Option<String>,
    pub line: String,
}

/// Added lines (`+` prefixed, excluding `+++` headers) that match a marker.
pub fn scan_added_lines(diff: &str, limit: usize) -> Vec<MarkerHit> {
    let mut file = None;
    let mut hits = Vec::new();
    for raw in diff.lines() {
        if let Some(path) = raw.strip_prefix("+++ ") {
            file = Some(path.trim_start_matches("b/").to_string());
            continue;
        }
        let Some(added) = raw.strip_prefix('+') else {
            continue;
        };
        if MARKER.is_match(added) {
            hits.push(MarkerHit {
                file: file.clone(),
                line: added.trim().to_string(),
            });
            if hits.len() >= limit {
                break;
            }
        }
    }
    hits
}
