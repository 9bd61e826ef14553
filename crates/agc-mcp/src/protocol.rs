use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool advertised by an MCP server's `tools/list` response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0", id, method: method.into(), params }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("timeout after {0}s")]
    Timeout(u64),
    #[error("response decode: {0}")]
    Decode(String),
}

pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;
pub const STOP_GRACE_SECS: u64 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_params_field_when_none() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("params").is_none());
    }

    #[test]
    fn response_decodes_error_variant() {
        let text = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"not found"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(text).unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
    }
}
