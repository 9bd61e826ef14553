use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePart {
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub parts: Vec<MessagePart>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self { role: "user".into(), parts: vec![MessagePart { kind: "text".into(), text: text.into() }] }
    }
}

#[derive(Debug, Serialize)]
pub struct SendParams {
    pub message: Message,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: SendParams,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    #[allow(dead_code)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<SendResult>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendResult {
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub parts: Vec<ArtifactPart>,
}

#[derive(Debug, Deserialize)]
pub struct ArtifactPart {
    #[allow(dead_code)]
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl SendResult {
    /// Concatenate every text part of every artifact, in order — the
    /// flattened plain-text result a synthesized tool call returns.
    pub fn text(&self) -> String {
        self.artifacts
            .iter()
            .flat_map(|a| a.parts.iter())
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn decode_sse_event(raw: &str) -> Option<Value> {
    for line in raw.lines() {
        if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            return serde_json::from_str(data.trim()).ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_result_text_concatenates_all_parts() {
        let result = SendResult {
            artifacts: vec![
                Artifact { parts: vec![ArtifactPart { kind: "text".into(), text: "a".into() }] },
                Artifact { parts: vec![ArtifactPart { kind: "text".into(), text: "b".into() }] },
            ],
        };
        assert_eq!(result.text(), "a\nb");
    }

    #[test]
    fn response_decodes_error_variant() {
        let text = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"boom"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(text).unwrap();
        assert_eq!(resp.error.unwrap().message, "boom");
    }

    #[test]
    fn decode_sse_event_parses_data_line() {
        let v = decode_sse_event("event: delta\ndata: {\"text\":\"hi\"}\n\n").unwrap();
        assert_eq!(v["text"], "hi");
    }
}
