//! Tool Dispatcher (§4.2): permission evaluation plus parallel execution
//! of one finalized batch of tool calls, in call order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agc_permissions::{CompiledPolicy, Decision};
use agc_tools::{ToolCall, ToolOutput, ToolRegistry};

use crate::events::error_kind;

/// The special tool name the loop recognizes but never sends to the
/// registry — handled entirely by `conversation.rs` as a handoff.
pub const TRANSFER_TASK: &str = "transfer_task";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Evaluates permissions and executes approved tool calls. Holds no
/// session state; the same dispatcher instance is reused across a
/// session's lifetime.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    /// Maps a call's dispatch name (the registry key, e.g. `create_issue`)
    /// to its canonical permission identifier (e.g.
    /// `mcp:github:create_issue`). Built-ins and A2A tools whose name
    /// already *is* their canonical id are simply absent from this map.
    tool_ids: HashMap<String, String>,
    timeout_secs: u64,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry, tool_ids: HashMap::new(), timeout_secs: DEFAULT_TIMEOUT_SECS }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Register the canonical permission identifier for a dispatch name
    /// that doesn't match it verbatim (MCP/A2A synthesized tools).
    pub fn register_tool_id(&mut self, dispatch_name: impl Into<String>, canonical_id: impl Into<String>) {
        self.tool_ids.insert(dispatch_name.into(), canonical_id.into());
    }

    pub fn canonical_id(&self, dispatch_name: &str) -> String {
        self.tool_ids.get(dispatch_name).cloned().unwrap_or_else(|| dispatch_name.to_string())
    }

    /// Evaluate every call in a batch against the policy. `transfer_task`
    /// always evaluates to `Allow` — it never reaches a toolset backend,
    /// so permission gating would only confuse the approval UI.
    pub fn evaluate(
        &self,
        calls: &[ToolCall],
        policy: &CompiledPolicy,
        yolo_or_tools_approved: bool,
    ) -> Vec<Decision> {
        calls
            .iter()
            .map(|call| {
                if call.name == TRANSFER_TASK {
                    Decision::Allow
                } else {
                    policy.decide(&self.canonical_id(&call.name), yolo_or_tools_approved)
                }
            })
            .collect()
    }

    /// Execute one batch, given the decisions already computed by
    /// `evaluate` (with any `Ask` entries already resolved by the caller —
    /// see `conversation.rs`'s suspend/resume handling). Results preserve
    /// call order regardless of completion order (§5).
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        decisions: &[Decision],
        invalid_argument_ids: &std::collections::HashSet<String>,
    ) -> Vec<ToolOutput> {
        let futures = calls.iter().zip(decisions.iter()).map(|(call, decision)| async move {
            if invalid_argument_ids.contains(&call.id) {
                return ToolOutput::err(
                    &call.id,
                    format!("error: {}: arguments could not be parsed as JSON", error_kind::TOOL_ARGUMENTS_INVALID),
                );
            }
            match decision {
                // Permission denials keep the literal "permission denied: <rule>"
                // framing (§4.1) rather than the generic "error: <kind>: ..."
                // wrapper — the model and any transcript viewer see the same
                // string a human rejection produces (see `rejection_result`).
                Decision::Deny(rule) => ToolOutput::err(&call.id, format!("permission denied: {rule}")),
                Decision::Ask => {
                    // Should not be reached: the caller must suspend before
                    // calling execute_batch when any decision is Ask.
                    ToolOutput::err(&call.id, "permission denied: awaiting approval")
                }
                Decision::Allow => self.execute_one(call).await,
            }
        });
        futures::future::join_all(futures).await
    }

    /// Synthesize the rejection result for a call the user declined during
    /// `resume(reject, reason)`.
    pub fn rejection_result(call_id: &str, reason: &str) -> ToolOutput {
        ToolOutput::err(call_id, format!("permission denied: user rejected: {reason}"))
    }

    async fn execute_one(&self, call: &ToolCall) -> ToolOutput {
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolOutput::err(&call.id, format!("error: {}: unknown tool: {}", error_kind::TOOL_BACKEND, call.name));
        };
        match tokio::time::timeout(Duration::from_secs(self.timeout_secs), tool.execute(call)).await {
            Ok(out) if out.is_error => {
                ToolOutput { content: format!("error: {}: {}", error_kind::TOOL_BACKEND, out.content), ..out }
            }
            Ok(out) => out,
            Err(_) => ToolOutput::err(
                &call.id,
                format!("error: {}: exceeded {}s deadline", error_kind::TOOL_TIMEOUT, self.timeout_secs),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agc_permissions::Policy;
    use agc_tools::Tool;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "echoed")
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never returns in time"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            tokio::time::sleep(Duration::from_secs(10)).await;
            ToolOutput::ok(&call.id, "too late")
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        reg.register(SlowTool);
        Arc::new(reg)
    }

    #[test]
    fn transfer_task_always_allowed() {
        let dispatcher = Dispatcher::new(registry());
        let policy = CompiledPolicy::compile(&Policy { deny: vec!["*".into()], allow: vec![] });
        let calls = vec![ToolCall { id: "1".into(), name: TRANSFER_TASK.into(), args: json!({}) }];
        let decisions = dispatcher.evaluate(&calls, &policy, false);
        assert_eq!(decisions[0], Decision::Allow);
    }

    #[test]
    fn canonical_id_overrides_dispatch_name() {
        let mut dispatcher = Dispatcher::new(registry());
        dispatcher.register_tool_id("create_issue", "mcp:github:create_issue");
        assert_eq!(dispatcher.canonical_id("create_issue"), "mcp:github:create_issue");
        assert_eq!(dispatcher.canonical_id("echo"), "echo");
    }

    #[tokio::test]
    async fn denied_call_is_framed_without_execution() {
        let dispatcher = Dispatcher::new(registry());
        let calls = vec![ToolCall { id: "1".into(), name: "echo".into(), args: json!({}) }];
        let decisions = vec![Decision::Deny("echo".into())];
        let out = dispatcher.execute_batch(&calls, &decisions, &Default::default()).await;
        assert!(out[0].is_error);
        assert!(out[0].content.contains("permission denied"));
    }

    #[tokio::test]
    async fn allowed_call_executes_and_preserves_order() {
        let dispatcher = Dispatcher::new(registry());
        let calls = vec![
            ToolCall { id: "1".into(), name: "echo".into(), args: json!({}) },
            ToolCall { id: "2".into(), name: "echo".into(), args: json!({}) },
        ];
        let decisions = vec![Decision::Allow, Decision::Allow];
        let out = dispatcher.execute_batch(&calls, &decisions, &Default::default()).await;
        assert_eq!(out[0].call_id, "1");
        assert_eq!(out[1].call_id, "2");
        assert!(!out[0].is_error);
    }

    #[tokio::test]
    async fn invalid_arguments_short_circuit_before_execution() {
        let dispatcher = Dispatcher::new(registry());
        let calls = vec![ToolCall { id: "1".into(), name: "echo".into(), args: json!({}) }];
        let decisions = vec![Decision::Allow];
        let mut invalid = std::collections::HashSet::new();
        invalid.insert("1".to_string());
        let out = dispatcher.execute_batch(&calls, &decisions, &invalid).await;
        assert!(out[0].is_error);
        assert!(out[0].content.contains("tool_arguments_invalid"));
    }

    #[tokio::test]
    async fn unknown_tool_is_tool_backend_error() {
        let dispatcher = Dispatcher::new(registry());
        let calls = vec![ToolCall { id: "1".into(), name: "nonexistent".into(), args: json!({}) }];
        let decisions = vec![Decision::Allow];
        let out = dispatcher.execute_batch(&calls, &decisions, &Default::default()).await;
        assert!(out[0].is_error);
        assert!(out[0].content.contains("tool_backend"));
    }

    #[tokio::test]
    async fn timeout_produces_tool_timeout_error() {
        let dispatcher = Dispatcher::new(registry()).with_timeout_secs(0);
        let calls = vec![ToolCall { id: "1".into(), name: "slow".into(), args: json!({}) }];
        let decisions = vec![Decision::Allow];
        let out = dispatcher.execute_batch(&calls, &decisions, &Default::default()).await;
        assert!(out[0].is_error);
        assert!(out[0].content.contains("tool_timeout"));
    }

    #[tokio::test]
    async fn independent_batch_failure_does_not_affect_siblings() {
        let dispatcher = Dispatcher::new(registry()).with_timeout_secs(0);
        let calls = vec![
            ToolCall { id: "1".into(), name: "slow".into(), args: json!({}) },
            ToolCall { id: "2".into(), name: "echo".into(), args: json!({}) },
        ];
        let decisions = vec![Decision::Allow, Decision::Allow];
        let out = dispatcher.execute_batch(&calls, &decisions, &Default::default()).await;
        assert!(out[0].is_error);
        assert!(!out[1].is_error);
    }
}
