use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// The result of executing a tool. `content` is always the plain-text
/// representation; the dispatcher frames it as `"error: <detail>"` when
/// `is_error` is set before appending it to the session log.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: content.into(), is_error: false }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: msg.into(), is_error: true }
    }
}

/// Describes the shape of a tool's output, for context-aware truncation
/// upstream in the conversation loop. Each tool declares its own category;
/// nothing above this layer hard-codes tool names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal output: keep head + tail, errors live at the end.
    HeadTail,
    /// Ordered match list: keep the leading matches.
    MatchList,
    #[default]
    Generic,
}

/// Trait every toolset backend and built-in must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}
