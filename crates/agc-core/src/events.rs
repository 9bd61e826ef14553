//! The event vocabulary emitted by `run()`/`resume()`, in the order fixed
//! by §4.1 and §5: optional `agent_info`, zero or more delta events, zero
//! or more `tool_call`/`tool_result` pairs, optional `agent_handoff` and
//! `session_title`, a `usage` per turn, and exactly one terminal
//! `done`/`error`.

use serde::{Deserialize, Serialize};

/// One event in a session's run stream. `Serialize`d verbatim across the
/// JSON-RPC surface (§6) and to any TUI/API frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// Emitted once per iteration, before any model output, naming the
    /// agent currently driving the conversation.
    AgentInfo { agent_name: String },
    /// Assistant text delta.
    Choice { agent_name: String, text: String },
    /// Opaque provider thinking delta.
    ChoiceReasoning { agent_name: String, text: String },
    /// Incremental tool-call arguments, keyed by the provider's stream
    /// index until finalized.
    PartialToolCall { agent_name: String, index: u32, args_delta: String },
    /// A finalized tool call, ready for permission evaluation.
    ToolCall { agent_name: String, id: String, name: String, arguments_json: String },
    /// The result appended to the session for a given call id.
    ToolResult { call_id: String, content: String, is_error: bool },
    /// Control transferred to a different agent via `transfer_task`.
    AgentHandoff { from_agent: String, to_agent: String, task: String },
    /// A session title was generated and persisted.
    SessionTitle { title: String },
    /// Token accounting for the just-completed provider call.
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        cache_read_tokens: u32,
        cache_write_tokens: u32,
        cost_estimate: Option<f64>,
    },
    /// The loop parked awaiting a human decision.
    AwaitingToolApproval { calls: Vec<PendingCall> },
    AwaitingElicitation { call_id: String, request: serde_json::Value },
    /// Terminal: the iteration reached a stable state.
    Done { reason: DoneReason },
    /// Terminal: the iteration failed.
    Error { kind: String, detail: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCall {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    Completed,
    Truncated,
    MaxIterations,
}

/// Kind strings from §7's taxonomy. Every `RuntimeEvent::Error` carries one
/// of these verbatim so frontends can render stably across releases.
pub mod error_kind {
    pub const CONFIG_INVALID: &str = "config_invalid";
    pub const ENV_MISSING: &str = "env_missing";
    pub const PROVIDER_TRANSIENT: &str = "provider_transient";
    pub const PROVIDER_FATAL: &str = "provider_fatal";
    pub const TOOL_TIMEOUT: &str = "tool_timeout";
    pub const TOOL_BACKEND: &str = "tool_backend";
    pub const TOOL_ARGUMENTS_INVALID: &str = "tool_arguments_invalid";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const CANCELLED: &str = "cancelled";
    pub const TITLE_GENERATING: &str = "title_generating";
    pub const SESSION_NOT_FOUND: &str = "session_not_found";
    pub const CURSOR_INVALID: &str = "cursor_invalid";
}
