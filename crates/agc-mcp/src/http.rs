use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, McpError, ToolSpec, DEFAULT_CALL_TIMEOUT_SECS};

/// A persistent HTTP connection to a streaming MCP server. Requests are
/// plain JSON-RPC POSTs; the server may additionally push notifications
/// over a server-sent-events stream opened against the same endpoint,
/// which this client drains in the background and discards (the core
/// runtime does not currently act on unsolicited MCP notifications beyond
/// keeping the connection alive).
pub struct HttpMcpClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
    next_id: AtomicU64,
    tools_cache: Mutex<Option<Vec<ToolSpec>>>,
    notification_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HttpMcpClient {
    pub fn new(base_url: impl Into<String>, bearer_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            bearer_token,
            next_id: AtomicU64::new(1),
            tools_cache: Mutex::new(None),
            notification_task: Mutex::new(None),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn call_rpc(&self, method: &str, params: Option<Value>, timeout_secs: u64) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        let builder = self.request(self.client.post(&self.base_url).json(&req));
        let response = tokio::time::timeout(Duration::from_secs(timeout_secs), builder.send())
            .await
            .map_err(|_| McpError::Timeout(timeout_secs))?
            .map_err(|e| McpError::Transport(e.to_string()))?;

        let text = response.text().await.map_err(|e| McpError::Transport(e.to_string()))?;
        let resp: JsonRpcResponse = serde_json::from_str(&text).map_err(|e| McpError::Decode(e.to_string()))?;
        if let Some(err) = resp.error {
            return Err(McpError::Rpc { code: err.code, message: err.message });
        }
        resp.result.ok_or_else(|| McpError::Decode("response had neither result nor error".into()))
    }

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

    pub async fn call(&self, name: &str, args: Value) -> Result<String, McpError> {
        let params = serde_json::json!({"name": name, "arguments": args});
        let result = self.call_rpc("tools/call", Some(params), DEFAULT_CALL_TIMEOUT_SECS).await?;
        Ok(crate::stdio::extract_text(&result))
    }

    /// Open the SSE notification stream in the background. Best-effort:
    /// failures are logged, never fatal to the toolset.
    pub async fn start_notifications(self: &Arc<Self>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let builder = this.request(this.client.get(format!("{}/events", this.base_url)));
            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "MCP notification stream connect failed");
                    return;
                }
            };
            let mut stream = response.bytes_stream();
            use futures::StreamExt;
            let mut buf = String::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buf.find("\n\n") {
                            let _event: String = buf.drain(..pos + 2).collect();
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "MCP notification stream read error");
                        break;
                    }
                }
            }
        });
        *self.notification_task.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.notification_task.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_none_leaves_request_unmodified() {
        let client = HttpMcpClient::new("http://localhost", None);
        assert!(client.bearer_token.is_none());
    }
}
