//! Filesystem tools confined to the working directory.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::{Value, json};
use walkdir::WalkDir;

use super::Tool;
use crate::core::types::ToolOutput;

/// Legacy partial-patch marker. Whole-file writes containing it would erase
/// the code it stands for.
pub const EXISTING_CODE_MARKER: &str = "... existing code ...";

const MAX_LISTED_ENTRIES: usize = 2_000;
const SKIPPED_DIRS: [&str; 2] = [".git", ".taskloop"];

/// Resolve a tool-supplied path inside `root`.
///
/// Relative paths are joined onto `root`; `..` may not climb above it and
/// absolute paths must already point inside it. Existing paths are also
/// checked after resolving symlinks.
pub fn resolve_in_workdir(root: &Path, requested: &str) -> Result<PathBuf> {
    let requested = requested.trim();
    let candidate = if requested.is_empty() {
        root.to_path_buf()
    } else {
        root.join(requested)
    };

    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    bail!("path `{requested}` escapes the working directory");
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    if !normalized.starts_with(root) {
        bail!("path `{requested}` is outside the working directory");
    }

    // Symlinks: check the deepest existing ancestor.
    let mut existing = normalized.as_path();
    while !existing.exists() {
        existing = existing
            .parent()
            .ok_or_else(|| anyhow!("path `{requested}` has no existing ancestor"))?;
    }
    let real = fs::canonicalize(existing)
        .with_context(|| format!("resolve {}", existing.display()))?;
    let real_root = fs::canonicalize(root).with_context(|| format!("resolve {}", root.display()))?;
    if !real.starts_with(&real_root) {
        bail!("path `{requested}` resolves outside the working directory");
    }
    Ok(normalized)
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[derive(Debug, Deserialize)]
pub struct ListDirectoryArgs {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub depth: usize,
}

pub struct ListDirectory {
    root: PathBuf,
}

impl ListDirectory {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Tool for ListDirectory {
    type Args = ListDirectoryArgs;

    fn name(&self) -> &'static str {
        "list_directory"
    }

    fn description(&self) -> &'static str {
        "List the files in a directory. Directories end with `/`."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the working directory"
                },
                "depth": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "How many levels below the directory to descend; 0 lists only its entries"
                }
            },
            "required": ["path"]
        })
    }

    fn run(&self, args: ListDirectoryArgs) -> Result<ToolOutput> {
        let dir = resolve_in_workdir(&self.root, &args.path)?;
        if !dir.is_dir() {
            bail!("`{}` is not a directory", args.path);
        }

        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(args.depth.saturating_add(1))
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && SKIPPED_DIRS
                        .iter()
                        .any(|skip| entry.file_name() == *skip))
            });

        let mut lines = Vec::new();
        let mut truncated = false;
        for entry in walker {
            let entry = entry.context("walk directory")?;
            if lines.len() >= MAX_LISTED_ENTRIES {
                truncated = true;
                break;
            }
            let mut line = display_relative(&dir, entry.path());
            if entry.file_type().is_dir() {
                line.push('/');
            }
            lines.push(line);
        }

        let mut content = if lines.is_empty() {
            "(empty directory)".to_string()
        } else {
            lines.join("\n")
        };
        if truncated {
            content.push_str(&format!("\n[listing truncated at {MAX_LISTED_ENTRIES} entries]"));
        }
        Ok(ToolOutput::ok(content)
            .with_metadata("path", display_relative(&self.root, &dir))
            .with_metadata("entries", lines.len()))
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadFileArgs {
    pub path: String,
    #[serde(default)]
    pub offset: usize,
    /// Lines to return; 0 means as many as allowed.
    #[serde(default)]
    pub length: usize,
}

pub struct ReadFile {
    root: PathBuf,
    max_lines: usize,
}

impl ReadFile {
    pub fn new(root: &Path, max_lines: usize) -> Self {
        Self {
            root: root.to_path_buf(),
            max_lines,
        }
    }
}

impl Tool for ReadFile {
    type Args = ReadFileArgs;

    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read lines from a text file."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to read, relative to the working directory"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Zero-based line to start from"
                },
                "length": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": self.max_lines,
                    "description": format!("Number of lines to read, 0 for all (at most {})", self.max_lines)
                }
            },
            "required": ["path"]
        })
    }

    fn run(&self, args: ReadFileArgs) -> Result<ToolOutput> {
        if args.length > self.max_lines {
            return Ok(ToolOutput::failure(format!(
                "cannot read more than {} lines at once",
                self.max_lines
            )));
        }
        let path = resolve_in_workdir(&self.root, &args.path)?;
        let text = fs::read_to_string(&path)
            .with_context(|| format!("read {}", display_relative(&self.root, &path)))?;
        let lines: Vec<&str> = text.lines().collect();
        if args.offset > lines.len() {
            return Ok(ToolOutput::failure(format!(
                "file has {} lines, cannot start at line {}",
                lines.len(),
                args.offset
            )));
        }

        let length = if args.length == 0 {
            self.max_lines
        } else {
            args.length
        };
        let end = args.offset.saturating_add(length).min(lines.len());
        let content = lines[args.offset..end].join("\n");
        let content = if content.is_empty() {
            "(no content)".to_string()
        } else {
            content
        };
        Ok(ToolOutput::ok(content)
            .with_metadata("total_lines", lines.len())
            .with_metadata("offset", args.offset)
            .with_metadata("returned_lines", end - args.offset))
    }
}

#[derive(Debug, Deserialize)]
pub struct WriteFileArgs {
    pub path: String,
    pub content: String,
}

pub struct WriteFile {
    root: PathBuf,
}

impl WriteFile {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Tool for WriteFile {
    type Args = WriteFileArgs;

    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write the complete content of a file, creating parent directories. \
         Always send the whole file; partial edits with placeholder comments \
         such as `// ... existing code ...` are rejected."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to write, relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "Full new content of the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn run(&self, args: WriteFileArgs) -> Result<ToolOutput> {
        if args.content.contains(EXISTING_CODE_MARKER) {
            return Ok(ToolOutput::failure(format!(
                "content contains the partial-edit marker `{EXISTING_CODE_MARKER}`; \
                 write the complete file instead"
            )));
        }
        let path = resolve_in_workdir(&self.root, &args.path)?;
        if path.is_dir() {
            bail!("`{}` is a directory", args.path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", display_relative(&self.root, parent)))?;
        }
        let content = args.content.replace('\r', "");
        fs::write(&path, &content)
            .with_context(|| format!("write {}", display_relative(&self.root, &path)))?;

        let relative = display_relative(&self.root, &path);
        let lines = content.lines().count();
        Ok(
            ToolOutput::ok(format!("wrote {lines} lines to {relative}"))
                .with_metadata("path", relative)
                .with_metadata("bytes", content.len()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workdir() -> (tempfile::TempDir, PathBuf) {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = fs::canonicalize(temp.path()).expect("canonicalize");
        (temp, root)
    }

    #[test]
    fn resolve_rejects_escapes() {
        let (_temp, root) = workdir();
        assert!(resolve_in_workdir(&root, "../outside.txt").is_err());
        assert!(resolve_in_workdir(&root, "a/../../outside.txt").is_err());
        assert!(resolve_in_workdir(&root, "/etc/passwd").is_err());
        let inside = resolve_in_workdir(&root, "a/../b.txt").expect("inside");
        assert_eq!(inside, root.join("b.txt"));
        assert_eq!(resolve_in_workdir(&root, ".").expect("root"), root);
    }

    #[cfg(unix)]
    #[test]
    fn resolve_rejects_symlink_escape() {
        let (_temp, root) = workdir();
        let outside = tempfile::tempdir().expect("outside");
        std::os::unix::fs::symlink(outside.path(), root.join("link")).expect("symlink");
        assert!(resolve_in_workdir(&root, "link/secret.txt").is_err());
    }

    #[test]
    fn list_directory_respects_depth_and_skips_state() {
        let (_temp, root) = workdir();
        fs::create_dir_all(root.join("src/nested")).expect("mkdir");
        fs::create_dir_all(root.join(".taskloop")).expect("mkdir");
        fs::write(root.join("src/main.rs"), "").expect("write");
        fs::write(root.join("src/nested/deep.rs"), "").expect("write");
        fs::write(root.join("README.md"), "").expect("write");

        let tool = ListDirectory::new(&root);
        let shallow = tool
            .run(ListDirectoryArgs {
                path: ".".to_string(),
                depth: 0,
            })
            .expect("list");
        assert_eq!(shallow.content, "README.md\nsrc/");

        let deep = tool
            .run(ListDirectoryArgs {
                path: String::new(),
                depth: 2,
            })
            .expect("list");
        assert_eq!(
            deep.content,
            "README.md\nsrc/\nsrc/main.rs\nsrc/nested/\nsrc/nested/deep.rs"
        );
    }

    #[test]
    fn read_file_windows_lines() {
        let (_temp, root) = workdir();
        fs::write(root.join("f.txt"), "a\nb\nc\nd\n").expect("write");
        let tool = ReadFile::new(&root, 3);

        let all = tool
            .run(ReadFileArgs {
                path: "f.txt".to_string(),
                offset: 0,
                length: 0,
            })
            .expect("read");
        assert_eq!(all.content, "a\nb\nc");
        assert_eq!(all.metadata.expect("meta")["total_lines"], 4);

        let window = tool
            .run(ReadFileArgs {
                path: "f.txt".to_string(),
                offset: 2,
                length: 5,
            })
            .expect("read");
        assert_eq!(
            window.error.as_deref(),
            Some("cannot read more than 3 lines at once")
        );

        let tail = tool
            .run(ReadFileArgs {
                path: "f.txt".to_string(),
                offset: 2,
                length: 3,
            })
            .expect("read");
        assert_eq!(tail.content, "c\nd");

        let past = tool
            .run(ReadFileArgs {
                path: "f.txt".to_string(),
                offset: 9,
                length: 1,
            })
            .expect("read");
        assert_eq!(
            past.error.as_deref(),
            Some("file has 4 lines, cannot start at line 9")
        );
    }

    #[test]
    fn write_file_creates_parents_and_rejects_marker() {
        let (_temp, root) = workdir();
        let tool = WriteFile::new(&root);

        let out = tool
            .run(WriteFileArgs {
                path: "src/health.rs".to_string(),
                content: "fn health() {}\r\n".to_string(),
            })
            .expect("write");
        assert_eq!(out.content, "wrote 1 lines to src/health.rs");
        assert_eq!(
            fs::read_to_string(root.join("src/health.rs")).expect("read"),
            "fn health() {}\n"
        );

        let rejected = tool
            .run(WriteFileArgs {
                path: "src/health.rs".to_string(),
                content: "// ... existing code ...\nfn more() {}\n".to_string(),
            })
            .expect("write");
        assert!(rejected.is_error());
        assert_eq!(
            fs::read_to_string(root.join("src/health.rs")).expect("read"),
            "fn health() {}\n"
        );
    }
}
