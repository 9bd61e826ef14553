use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolOutput};

/// No-op tool that records reasoning text into the message log without
/// taking any external action. Useful for models that reason better when
/// given an explicit scratchpad tool rather than a native thinking channel.
pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Record a thought in the transcript. Has no side effects; use it to \
         reason through a problem before acting."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"thought": {"type": "string"}},
            "required": ["thought"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let thought = call.args.get("thought").and_then(|v| v.as_str()).unwrap_or("");
        ToolOutput::ok(&call.id, thought.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_thought_into_content() {
        let out = ThinkTool
            .execute(&ToolCall {
                id: "1".into(),
                name: "think".into(),
                args: json!({"thought": "consider the edge cases"}),
            })
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "consider the edge cases");
    }

    #[tokio::test]
    async fn missing_thought_defaults_to_empty() {
        let out = ThinkTool.execute(&ToolCall { id: "1".into(), name: "think".into(), args: json!({}) }).await;
        assert!(!out.is_error);
        assert_eq!(out.content, "");
    }
}
