//! Per-cycle records under `.taskloop/iterations/<run_id>/<cycle>/`.
//!
//! Written after every controller cycle regardless of `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::Message;
use crate::io::workspace::STATE_DIR;

#[derive(Debug, Clone)]
pub struct CyclePaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub transcript_path: PathBuf,
}

impl CyclePaths {
    pub fn new(root: &Path, run_id: &str, cycle: u32) -> Self {
        let dir = root
            .join(STATE_DIR)
            .join("iterations")
            .join(run_id)
            .join(cycle.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            transcript_path: dir.join("transcript.json"),
            dir,
        }
    }
}

/// Millisecond local timestamp, suffixed with a counter when an earlier run
/// under `root` already used it.
pub fn new_run_id(root: &Path) -> String {
    let stamp = chrono::Local::now().format("%Y%m%dT%H%M%S%.3f").to_string();
    unique_run_id(root, &stamp)
}

fn unique_run_id(root: &Path, stamp: &str) -> String {
    let runs = root.join(STATE_DIR).join("iterations");
    if !runs.join(stamp).exists() {
        return stamp.to_string();
    }
    (2u32..)
        .map(|n| format!("{stamp}-{n}"))
        .find(|id| !runs.join(id).exists())
        .unwrap_or_else(|| stamp.to_string())
}

pub struct CycleWriteRequest<'a, M: Serialize> {
    pub root: &'a Path,
    pub run_id: &'a str,
    pub cycle: u32,
    pub meta: &'a M,
    /// Conversation log as it stood at the end of the cycle.
    pub transcript: &'a [Message],
}

pub fn write_cycle<M: Serialize>(request: &CycleWriteRequest<'_, M>) -> Result<CyclePaths> {
    let paths = CyclePaths::new(request.root, request.run_id, request.cycle);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create cycle dir {}", paths.dir.display()))?;
    write_json(&paths.meta_path, request.meta)?;
    write_json(&paths.transcript_path, &request.transcript)?;
    Ok(paths)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn cycle_paths_are_stable() {
        let paths = CyclePaths::new(Path::new("/w"), "run-1", 3);
        assert!(paths.dir.ends_with(".taskloop/iterations/run-1/3"));
        assert!(paths.meta_path.ends_with("meta.json"));
        assert!(paths.transcript_path.ends_with("transcript.json"));
    }

    #[test]
    fn run_id_has_millisecond_resolution() {
        let temp = tempfile::tempdir().expect("tempdir");
        let id = new_run_id(temp.path());
        // 20261019T101112.345
        assert_eq!(id.len(), 19, "{id}");
        assert_eq!(&id[15..16], ".", "{id}");
    }

    #[test]
    fn run_id_collision_gets_a_counter() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stamp = "20261019T101112.345";
        assert_eq!(unique_run_id(temp.path(), stamp), stamp);

        fs::create_dir_all(CyclePaths::new(temp.path(), stamp, 1).dir).expect("mkdir");
        assert_eq!(unique_run_id(temp.path(), stamp), format!("{stamp}-2"));

        fs::create_dir_all(CyclePaths::new(temp.path(), &format!("{stamp}-2"), 1).dir)
            .expect("mkdir");
        assert_eq!(unique_run_id(temp.path(), stamp), format!("{stamp}-3"));
    }

    #[test]
    fn writes_meta_and_transcript() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transcript = vec![Message::user("do the next task")];
        let paths = write_cycle(&CycleWriteRequest {
            root: temp.path(),
            run_id: "run-9",
            cycle: 1,
            meta: &json!({"cycle": 1}),
            transcript: &transcript,
        })
        .expect("write");

        let meta: Value =
            serde_json::from_str(&fs::read_to_string(paths.meta_path).expect("read"))
                .expect("json");
        assert_eq!(meta["cycle"], 1);
        let logged: Vec<Message> =
            serde_json::from_str(&fs::read_to_string(paths.transcript_path).expect("read"))
                .expect("json");
        assert_eq!(logged, transcript);
    }
}
