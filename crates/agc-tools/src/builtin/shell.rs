use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Hard byte ceiling for combined stdout + stderr returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 20_000;
const HEAD_LINES: usize = 100;
const TAIL_LINES: usize = 100;

/// Optional container sandbox configuration. When set, commands run inside
/// `image` with `mounts` bind-mounted rather than directly on the host.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub image: Option<String>,
    pub mounts: Vec<String>,
}

pub struct ShellTool {
    pub timeout_secs: u64,
    pub sandbox: SandboxConfig,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self { timeout_secs: 60, sandbox: SandboxConfig::default() }
    }
}

impl ShellTool {
    pub fn with_sandbox(timeout_secs: u64, sandbox: SandboxConfig) -> Self {
        Self { timeout_secs, sandbox }
    }

    fn build_command(&self, command: &str, workdir: Option<&str>) -> Result<Command, String> {
        if let Some(image) = &self.sandbox.image {
            if self.sandbox.mounts.is_empty() {
                return Err(
                    "sandbox requested but no bind mounts configured; refusing to run without a mounted path"
                        .to_string(),
                );
            }
            let mut cmd = Command::new("docker");
            cmd.arg("run").arg("--rm").arg("-i");
            for mount in &self.sandbox.mounts {
                cmd.arg("-v").arg(mount);
            }
            if let Some(wd) = workdir {
                cmd.arg("-w").arg(wd);
            }
            cmd.arg(image).arg("bash").arg("-c").arg(command);
            Ok(cmd)
        } else {
            let mut cmd = Command::new("bash");
            cmd.arg("-c").arg(command);
            if let Some(wd) = workdir {
                cmd.current_dir(wd);
            }
            Ok(cmd)
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr. 'command' is \
         required. Output is capped at ~20 KB; when larger, the first and \
         last 100 lines are kept with an omission marker in between."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"},
                "workdir": {"type": "string"},
                "timeout_secs": {"type": "integer"}
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing required 'command' argument"),
        };
        let workdir = call.args.get("workdir").and_then(|v| v.as_str());
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);

        let mut cmd = match self.build_command(&command, workdir) {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        debug!(cmd = %command, "executing shell tool");

        let result = tokio::time::timeout(std::time::Duration::from_secs(timeout), cmd.output()).await;
        match result {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.is_empty() {
                    content.push_str(&head_tail_truncate(&stdout));
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&head_tail_truncate(&stderr));
                }
                let code = output.status.code().unwrap_or(-1);
                if content.is_empty() {
                    content = format!("[exit {code}]");
                }
                if code == 0 {
                    ToolOutput::ok(&call.id, content)
                } else if code == 1 {
                    let out = if content.is_empty() { "[exit 1]".into() } else { format!("[exit 1]\n{content}") };
                    ToolOutput::ok(&call.id, out)
                } else {
                    ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"))
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("spawn error: {e}")),
            Err(_) => ToolOutput::err(&call.id, format!("timeout after {timeout}s")),
        }
    }
}

pub(crate) fn head_tail_truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }
    let lines: Vec<&str> = s.lines().collect();
    let total = lines.len();
    if total <= HEAD_LINES + TAIL_LINES {
        let tail_start = s.len().saturating_sub(OUTPUT_LIMIT_BYTES / 2);
        let tail_str = &s[tail_start..];
        let head_end = (OUTPUT_LIMIT_BYTES / 2).min(s.len());
        let head_str = &s[..head_end];
        let omitted = s.len() - head_str.len() - tail_str.len();
        return format!("{head_str}\n...[{omitted} bytes omitted]...\n{tail_str}");
    }
    let head: Vec<&str> = lines[..HEAD_LINES].to_vec();
    let tail: Vec<&str> = lines[total - TAIL_LINES..].to_vec();
    let omitted_lines = total - HEAD_LINES - TAIL_LINES;
    format!("{}\n...[{omitted_lines} lines omitted]...\n{}", head.join("\n"), tail.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "shell".into(), args }
    }

    #[tokio::test]
    async fn executes_echo_and_returns_stdout() {
        let t = ShellTool::default();
        let out = t.execute(&call(json!({"command": "echo hello"}))).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("hello"));
    }

    #[tokio::test]
    async fn exit_1_is_not_error() {
        let t = ShellTool::default();
        let out = t.execute(&call(json!({"command": "exit 1"}))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("[exit 1]"));
    }

    #[tokio::test]
    async fn exit_2_is_error() {
        let t = ShellTool::default();
        let out = t.execute(&call(json!({"command": "exit 2"}))).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn missing_command_is_error() {
        let t = ShellTool::default();
        let out = t.execute(&call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("command"));
    }

    #[tokio::test]
    async fn timeout_returns_error() {
        let t = ShellTool { timeout_secs: 1, sandbox: SandboxConfig::default() };
        let out = t.execute(&call(json!({"command": "sleep 60"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("timeout"));
    }

    #[tokio::test]
    async fn sandbox_without_mounts_refuses() {
        let t = ShellTool::with_sandbox(
            10,
            SandboxConfig { image: Some("alpine".into()), mounts: Vec::new() },
        );
        let out = t.execute(&call(json!({"command": "ls"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("refusing"));
    }

    #[test]
    fn short_output_passes_through_unchanged() {
        let s = "hello\nworld\n";
        assert_eq!(head_tail_truncate(s), s);
    }

    #[test]
    fn large_output_is_truncated_with_omission_marker() {
        let line = "x".repeat(29);
        let content: String = (0..1000).map(|i| format!("line{i}: {line}\n")).collect();
        let result = head_tail_truncate(&content);
        assert!(result.contains("omitted"));
        assert!(result.len() < content.len());
    }
}
