use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolOutput};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    /// One of: pending, in_progress, completed.
    pub status: String,
}

/// A per-session (or, when the `Arc` is shared across agents, per-team) task
/// list. At most one item may be `in_progress` at a time.
pub struct TodoTool {
    todos: Arc<Mutex<Vec<TodoItem>>>,
}

impl TodoTool {
    pub fn new() -> Self {
        Self { todos: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Construct a handle sharing the same backing list as `other` — used
    /// to give every agent on a team the same todo list.
    pub fn shared_with(other: &TodoTool) -> Self {
        Self { todos: other.todos.clone() }
    }

    pub fn snapshot(&self) -> Vec<TodoItem> {
        self.todos.lock().unwrap().clone()
    }
}

impl Default for TodoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        "todo"
    }

    fn description(&self) -> &str {
        "Replace the current task list with the given items. Use this to \
         plan multi-step work and track progress; at most one item may be \
         in_progress at a time."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "content": {"type": "string"},
                            "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]}
                        },
                        "required": ["id", "content", "status"]
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let items: Vec<TodoItem> = match call.args.get("todos").cloned().map(serde_json::from_value) {
            Some(Ok(items)) => items,
            Some(Err(e)) => return ToolOutput::err(&call.id, format!("invalid todos: {e}")),
            None => return ToolOutput::err(&call.id, "missing required 'todos' argument"),
        };
        let in_progress = items.iter().filter(|t| t.status == "in_progress").count();
        if in_progress > 1 {
            return ToolOutput::err(&call.id, "at most one todo may be in_progress at a time");
        }
        let count = items.len();
        *self.todos.lock().unwrap() = items;
        ToolOutput::ok(&call.id, format!("updated {count} todo item(s)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(todos: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "todo".into(), args: json!({"todos": todos}) }
    }

    #[tokio::test]
    async fn replaces_todo_list() {
        let t = TodoTool::new();
        let out = t
            .execute(&call(json!([{"id": "1", "content": "a", "status": "pending"}])))
            .await;
        assert!(!out.is_error);
        assert_eq!(t.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn rejects_multiple_in_progress() {
        let t = TodoTool::new();
        let out = t
            .execute(&call(json!([
                {"id": "1", "content": "a", "status": "in_progress"},
                {"id": "2", "content": "b", "status": "in_progress"}
            ])))
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn shared_handle_sees_same_list() {
        let a = TodoTool::new();
        let b = TodoTool::shared_with(&a);
        a.execute(&call(json!([{"id": "1", "content": "x", "status": "pending"}]))).await;
        assert_eq!(b.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn missing_todos_is_error() {
        let t = TodoTool::new();
        let out = t.execute(&ToolCall { id: "1".into(), name: "todo".into(), args: json!({}) }).await;
        assert!(out.is_error);
    }
}
