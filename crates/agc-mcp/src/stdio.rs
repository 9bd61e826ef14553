use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, McpError, ToolSpec, DEFAULT_CALL_TIMEOUT_SECS, STOP_GRACE_SECS};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Speaks the MCP JSON-RPC framing (newline-delimited JSON) over a child
/// process's stdio. One reader task drains stdout and correlates responses
/// back to the caller awaiting them by request id.
pub struct StdioMcpClient {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    tools_cache: Mutex<Option<Vec<ToolSpec>>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl StdioMcpClient {
    pub async fn spawn(command: &str, args: &[String], env: &HashMap<String, String>) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        cmd.envs(env);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::Transport(format!("spawn failed: {e}")))?;
        let stdin = child.stdin.take().ok_or_else(|| McpError::Transport("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Transport("no stdout".into()))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(&line) {
                            Ok(resp) => {
                                if let Some(id) = resp.id {
                                    let mut map = reader_pending.lock().await;
                                    if let Some(tx) = map.remove(&id) {
                                        let _ = tx.send(resp);
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, line, "failed to decode MCP stdio line"),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "MCP stdio read error");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            tools_cache: Mutex::new(None),
            reader_task,
        })
    }

    async fn call_rpc(&self, method: &str, params: Option<Value>, timeout_secs: u64) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let req = JsonRpcRequest::new(id, method, params);
        let mut line = serde_json::to_string(&req).map_err(|e| McpError::Decode(e.to_string()))?;
        line.push('\n');
        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| McpError::Transport(format!("write failed: {e}")))?;
            stdin.flush().await.map_err(|e| McpError::Transport(format!("flush failed: {e}")))?;
        }

        let resp = match tokio::time::timeout(Duration::from_secs(timeout_secs), rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(McpError::Transport("reader task dropped sender".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(McpError::Timeout(timeout_secs));
            }
        };

        if let Some(err) = resp.error {
            return Err(McpError::Rpc { code: err.code, message: err.message });
        }
        resp.result.ok_or_else(|| McpError::Decode("response had neither result nor error".into()))
    }

    /// `tools/list`, cached after the first successful call.
    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        let mut cache = self.tools_cache.lock().await;
        if let Some(tools) = cache.as_ref() {
            return Ok(tools.clone());
        }
        let result = self.call_rpc("tools/list", None, DEFAULT_CALL_TIMEOUT_SECS).await?;
        let tools: Vec<ToolSpec> = serde_json::from_value(result.get("tools").cloned().unwrap_or(Value::Null))
            .map_err(|e| McpError::Decode(e.to_string()))?;
        *cache = Some(tools.clone());
        Ok(tools)
    }

    /// `tools/call`, default 60s timeout.
    pub async fn call(&self, name: &str, args: Value) -> Result<String, McpError> {
        let params = serde_json::json!({"name": name, "arguments": args});
        let result = self.call_rpc("tools/call", Some(params), DEFAULT_CALL_TIMEOUT_SECS).await?;
        Ok(extract_text(&result))
    }

    /// Close stdin and wait up to `STOP_GRACE_SECS` for the child to exit
    /// before killing it.
    pub async fn stop(&self) {
        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }
        self.reader_task.abort();
        let mut child = self.child.lock().await;
        let wait = tokio::time::timeout(Duration::from_secs(STOP_GRACE_SECS), child.wait()).await;
        if wait.is_err() {
            debug!("MCP child did not exit within grace period, killing");
            let _ = child.kill().await;
        }
    }
}

pub(crate) fn extract_text(result: &Value) -> String {
    if let Some(content) = result.get("content").and_then(|c| c.as_array()) {
        let texts: Vec<String> = content
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()).map(str::to_string))
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
    }
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_joins_text_parts() {
        let v = serde_json::json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]});
        assert_eq!(extract_text(&v), "a\nb");
    }

    #[test]
    fn extract_text_falls_back_to_raw_json() {
        let v = serde_json::json!({"other": 1});
        assert_eq!(extract_text(&v), v.to_string());
    }

    #[tokio::test]
    async fn spawn_cat_and_list_tools_with_canned_response() {
        // A minimal fake MCP server: reads one line, echoes a tools/list response.
        let script = r#"read line; echo '{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"echo","description":"d","inputSchema":{"type":"object"}}]}}'"#;
        let client = StdioMcpClient::spawn("bash", &["-c".to_string(), script.to_string()], &HashMap::new())
            .await
            .unwrap();
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        client.stop().await;
    }

    #[tokio::test]
    async fn call_times_out_when_server_never_responds() {
        let client = StdioMcpClient::spawn("bash", &["-c".to_string(), "sleep 60".to_string()], &HashMap::new())
            .await
            .unwrap();
        let result = tokio::time::timeout(
            Duration::from_millis(200),
            client.call_rpc("tools/list", None, 1),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(McpError::Timeout(_))));
        client.stop().await;
    }
}
