use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

const READ_LIMIT: usize = 200_000;

/// Read/write/list under a configured root. Every path argument is resolved
/// relative to `root` and validated to stay inside it before touching disk.
pub struct FilesystemTool {
    root: PathBuf,
    /// Commands run (with the written path as `$1`, cwd = root) after a
    /// successful write, e.g. a formatter. Failures are reported but do not
    /// undo the write.
    post_edit: Vec<String>,
}

impl FilesystemTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), post_edit: Vec::new() }
    }

    pub fn with_post_edit(mut self, commands: Vec<String>) -> Self {
        self.post_edit = commands;
        self
    }

    /// Resolve `rel` against the root and reject any path that escapes it,
    /// including via `..` components or a symlink — checked lexically since
    /// the target of a write may not exist yet.
    fn resolve(&self, rel: &str) -> Result<PathBuf, String> {
        let candidate = self.root.join(rel);
        let normalized = normalize(&candidate);
        let root_normalized = normalize(&self.root);
        if !normalized.starts_with(&root_normalized) {
            return Err(format!("path escapes root: {rel}"));
        }
        Ok(normalized)
    }

    async fn run_post_edit(&self, path: &Path) -> Vec<String> {
        let mut notes = Vec::new();
        for cmd in &self.post_edit {
            let result = Command::new("bash")
                .arg("-c")
                .arg(cmd)
                .arg("--")
                .arg(path)
                .current_dir(&self.root)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await;
            match result {
                Ok(out) if out.status.success() => {}
                Ok(out) => notes.push(format!(
                    "post_edit `{cmd}` exited {}: {}",
                    out.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&out.stderr)
                )),
                Err(e) => notes.push(format!("post_edit `{cmd}` failed to spawn: {e}")),
            }
        }
        notes
    }
}

/// Lexical `..`/`.`-component collapse. Does not touch the filesystem, so it
/// works for paths that don't exist yet (write targets).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[async_trait]
impl Tool for FilesystemTool {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> &str {
        "Read, write, or list files under the configured workspace root. \
         'operation' is one of read|write|list. Paths are relative to the \
         root; attempts to escape it (via ../ or absolute paths) are rejected."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {"type": "string", "enum": ["read", "write", "list"]},
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["operation", "path"],
            "additionalProperties": false
        })
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let op = call.args.get("operation").and_then(|v| v.as_str()).unwrap_or("");
        let rel = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing required 'path' argument"),
        };
        let path = match self.resolve(rel) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        match op {
            "read" => match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    if text.len() > READ_LIMIT {
                        ToolOutput::ok(
                            &call.id,
                            format!(
                                "{}\n[truncated at {READ_LIMIT} chars; total {} chars]",
                                &text[..READ_LIMIT],
                                text.len()
                            ),
                        )
                    } else {
                        ToolOutput::ok(&call.id, text.to_string())
                    }
                }
                Err(e) => ToolOutput::err(&call.id, format!("read failed: {e}")),
            },
            "write" => {
                let content = call.args.get("content").and_then(|v| v.as_str()).unwrap_or("");
                if let Some(parent) = path.parent() {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        return ToolOutput::err(&call.id, format!("create_dir_all failed: {e}"));
                    }
                }
                if let Err(e) = tokio::fs::write(&path, content).await {
                    return ToolOutput::err(&call.id, format!("write failed: {e}"));
                }
                let notes = self.run_post_edit(&path).await;
                let mut msg = format!("wrote {} bytes to {rel}", content.len());
                if !notes.is_empty() {
                    msg.push('\n');
                    msg.push_str(&notes.join("\n"));
                }
                ToolOutput::ok(&call.id, msg)
            }
            "list" => match tokio::fs::read_dir(&path).await {
                Ok(mut rd) => {
                    let mut entries = Vec::new();
                    loop {
                        match rd.next_entry().await {
                            Ok(Some(e)) => {
                                let name = e.file_name().to_string_lossy().to_string();
                                let kind = match e.file_type().await {
                                    Ok(t) if t.is_dir() => "DIR",
                                    Ok(t) if t.is_symlink() => "LINK",
                                    _ => "FILE",
                                };
                                entries.push(format!("{kind} {name}"));
                            }
                            Ok(None) => break,
                            Err(e) => return ToolOutput::err(&call.id, format!("list failed: {e}")),
                        }
                    }
                    entries.sort();
                    ToolOutput::ok(&call.id, entries.join("\n"))
                }
                Err(e) => ToolOutput::err(&call.id, format!("list failed: {e}")),
            },
            other => ToolOutput::err(&call.id, format!("unknown operation: {other}")),
        }
    }
}
