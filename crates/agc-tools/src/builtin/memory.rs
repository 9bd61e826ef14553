use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Persistent key-value store backed by a single JSON file.
pub struct MemoryTool {
    path: PathBuf,
}

impl MemoryTool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> HashMap<String, String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    async fn save(&self, store: &HashMap<String, String>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(store).unwrap_or_default();
        tokio::fs::write(&self.path, text).await
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Persist and recall key-value facts across sessions. 'operation' is \
         one of set|get|delete|list."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {"type": "string", "enum": ["set", "get", "delete", "list"]},
                "key": {"type": "string"},
                "value": {"type": "string"}
            },
            "required": ["operation"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let op = call.args.get("operation").and_then(|v| v.as_str()).unwrap_or("");
        let mut store = self.load().await;
        match op {
            "set" => {
                let (Some(key), Some(value)) = (
                    call.args.get("key").and_then(|v| v.as_str()),
                    call.args.get("value").and_then(|v| v.as_str()),
                ) else {
                    return ToolOutput::err(&call.id, "set requires 'key' and 'value'");
                };
                store.insert(key.to_string(), value.to_string());
                if let Err(e) = self.save(&store).await {
                    return ToolOutput::err(&call.id, format!("save failed: {e}"));
                }
                ToolOutput::ok(&call.id, format!("stored {key}"))
            }
            "get" => {
                let Some(key) = call.args.get("key").and_then(|v| v.as_str()) else {
                    return ToolOutput::err(&call.id, "get requires 'key'");
                };
                match store.get(key) {
                    Some(v) => ToolOutput::ok(&call.id, v.clone()),
                    None => ToolOutput::err(&call.id, format!("no value for key: {key}")),
                }
            }
            "delete" => {
                let Some(key) = call.args.get("key").and_then(|v| v.as_str()) else {
                    return ToolOutput::err(&call.id, "delete requires 'key'");
                };
                let existed = store.remove(key).is_some();
                if existed {
                    if let Err(e) = self.save(&store).await {
                        return ToolOutput::err(&call.id, format!("save failed: {e}"));
                    }
                }
                ToolOutput::ok(&call.id, format!("deleted {key} (existed: {existed})"))
            }
            "list" => {
                let mut keys: Vec<&String> = store.keys().collect();
                keys.sort();
                ToolOutput::ok(&call.id, keys.into_iter().cloned().collect::<Vec<_>>().join("\n"))
            }
            other => ToolOutput::err(&call.id, format!("unknown operation: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn tmp_path() -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("agc-memory-test-{n}.json"))
    }

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "memory".into(), args }
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let t = MemoryTool::new(tmp_path());
        t.execute(&call(json!({"operation": "set", "key": "k", "value": "v"}))).await;
        let out = t.execute(&call(json!({"operation": "get", "key": "k"}))).await;
        assert_eq!(out.content, "v");
    }

    #[tokio::test]
    async fn get_missing_key_is_error() {
        let t = MemoryTool::new(tmp_path());
        let out = t.execute(&call(json!({"operation": "get", "key": "missing"}))).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let t = MemoryTool::new(tmp_path());
        t.execute(&call(json!({"operation": "set", "key": "k", "value": "v"}))).await;
        t.execute(&call(json!({"operation": "delete", "key": "k"}))).await;
        let out = t.execute(&call(json!({"operation": "get", "key": "k"}))).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn list_returns_sorted_keys() {
        let t = MemoryTool::new(tmp_path());
        t.execute(&call(json!({"operation": "set", "key": "b", "value": "1"}))).await;
        t.execute(&call(json!({"operation": "set", "key": "a", "value": "1"}))).await;
        let out = t.execute(&call(json!({"operation": "list"}))).await;
        assert_eq!(out.content, "a\nb");
    }
}
