use std::sync::Arc;

use agc_tools::{Tool, ToolCall, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;

use crate::http::HttpMcpClient;
use crate::stdio::StdioMcpClient;

/// Either flavor of MCP transport, unified behind one enum so a single
/// `McpTool` implementation can wrap whichever one a server's config
/// selected.
pub enum McpTransport {
    Stdio(Arc<StdioMcpClient>),
    Http(Arc<HttpMcpClient>),
}

impl McpTransport {
    async fn call(&self, name: &str, args: Value) -> Result<String, String> {
        match self {
            McpTransport::Stdio(c) => c.call(name, args).await.map_err(|e| e.to_string()),
            McpTransport::Http(c) => c.call(name, args).await.map_err(|e| e.to_string()),
        }
    }
}

/// One synthesized `Tool` per tool the remote MCP server advertises. The
/// canonical identifier the permission engine sees is
/// `mcp:<server>:<tool_name>`.
pub struct McpTool {
    server: String,
    remote_name: String,
    description: String,
    parameters: Value,
    transport: McpTransport,
}

impl McpTool {
    pub fn new(server: impl Into<String>, remote_name: impl Into<String>, description: impl Into<String>, parameters: Value, transport: McpTransport) -> Self {
        Self { server: server.into(), remote_name: remote_name.into(), description: description.into(), parameters, transport }
    }

    /// Canonical identifier for the permission engine.
    pub fn tool_id(&self) -> String {
        format!("mcp:{}:{}", self.server, self.remote_name)
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.remote_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.transport.call(&self.remote_name, call.args.clone()).await {
            Ok(text) => ToolOutput::ok(&call.id, text),
            Err(e) => ToolOutput::err(&call.id, format!("mcp call failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_id_is_namespaced_by_server() {
        let tool = McpTool::new(
            "github",
            "create_issue",
            "d",
            json!({}),
            McpTransport::Http(Arc::new(HttpMcpClient::new("http://x", None))),
        );
        assert_eq!(tool.tool_id(), "mcp:github:create_issue");
        assert_eq!(tool.name(), "create_issue");
    }
}
