use agc_tools::{Tool, ToolCall, ToolOutput};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::A2aClient;

/// One synthesized tool per configured remote peer. Calling it is
/// `message/send` to that peer; the peer's final artifact text is the
/// result.
pub struct A2aTool {
    peer: String,
    client: A2aClient,
}

impl A2aTool {
    pub fn new(peer: impl Into<String>, url: impl Into<String>) -> Self {
        Self { peer: peer.into(), client: A2aClient::new(url) }
    }

    pub fn tool_id(&self) -> String {
        format!("a2a:{}", self.peer)
    }
}

#[async_trait]
impl Tool for A2aTool {
    fn name(&self) -> &str {
        &self.peer
    }

    fn description(&self) -> &str {
        "Delegate a message to a remote peer agent and return its response."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(message) = call.args.get("message").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing required 'message' argument");
        };
        match self.client.send(message).await {
            Ok(text) => ToolOutput::ok(&call.id, text),
            Err(e) => ToolOutput::err(&call.id, format!("a2a call failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_id_is_namespaced_by_peer() {
        let tool = A2aTool::new("planner", "http://planner.local/rpc");
        assert_eq!(tool.tool_id(), "a2a:planner");
        assert_eq!(tool.name(), "planner");
    }

    #[tokio::test]
    async fn missing_message_argument_is_error() {
        let tool = A2aTool::new("planner", "http://planner.local/rpc");
        let call = ToolCall { id: "1".into(), name: "planner".into(), args: json!({}) };
        let out = tool.execute(&call).await;
        assert!(out.is_error);
    }
}
