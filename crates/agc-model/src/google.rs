use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::normalize::merge_consecutive_same_role;
use crate::provider::{ChunkStream, ModelProvider};
use crate::retry::{parse_retry_after, stream_with_retry, HttpStatusError};
use crate::types::{Chunk, CompletionRequest, FinishReason, Message, Role, Usage};

/// Native driver for Gemini's `streamGenerateContent` endpoint.
///
/// Gemini streams a JSON array of response objects over SSE (each `data:`
/// line is one complete object, not a delta fragment of a larger JSON
/// document), and represents tool calls as a single non-streamed
/// `functionCall` part rather than incremental argument deltas.
pub struct GoogleProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            model: model.into(),
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            client: reqwest::Client::new(),
        }
    }
}

fn build_contents(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    for m in messages {
        match m.role {
            Role::System => system_parts.push(m.content.clone()),
            Role::Tool => {
                contents.push(json!({
                    "role": "function",
                    "parts": [{"functionResponse": {"name": m.tool_call_id.clone().unwrap_or_default(), "response": {"result": m.content}}}],
                }));
            }
            Role::User => contents.push(json!({"role": "user", "parts": [{"text": m.content}]})),
            Role::Assistant => {
                let mut parts = Vec::new();
                if !m.content.is_empty() {
                    parts.push(json!({"text": m.content}));
                }
                for tc in &m.tool_calls {
                    let args: Value = serde_json::from_str(&tc.arguments_json).unwrap_or(json!({}));
                    parts.push(json!({"functionCall": {"name": tc.function_name, "args": args}}));
                }
                contents.push(json!({"role": "model", "parts": parts}));
            }
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, contents)
}

#[async_trait]
impl ModelProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_images(&self) -> bool {
        true
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream> {
        let merged = merge_consecutive_same_role(&req.messages);
        let (system, contents) = build_contents(&merged);

        let mut body = json!({ "contents": contents });
        if let Some(s) = system {
            body["systemInstruction"] = json!({"parts": [{"text": s}]});
        }
        if !req.tools.is_empty() {
            body["tools"] = json!([{
                "functionDeclarations": req.tools.iter().map(|t| json!({
                    "name": t.name, "description": t.description, "parameters": t.parameters,
                })).collect::<Vec<_>>(),
            }]);
        }

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("google: api key not set"))?;
        let client = self.client.clone();

        Ok(stream_with_retry(move || {
            let body = body.clone();
            let url = url.clone();
            let api_key = api_key.clone();
            let client = client.clone();
            async move {
                let resp = client
                    .post(&url)
                    .timeout(Duration::from_secs(120))
                    .header("x-goog-api-key", api_key)
                    .json(&body)
                    .send()
                    .await?;

                if !resp.status().is_success() {
                    let status = resp.status();
                    let retry_after = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_retry_after);
                    let text = resp.text().await.unwrap_or_default();
                    return Err(HttpStatusError { message: format!("google error {status}: {text}"), retry_after }.into());
                }

                let byte_stream = resp.bytes_stream();
                let event_stream = byte_stream
                    .scan(String::new(), |buf, chunk| {
                        let events = match chunk {
                            Ok(b) => {
                                buf.push_str(&String::from_utf8_lossy(&b));
                                drain_sse(buf)
                            }
                            Err(e) => vec![Err(anyhow::anyhow!(e))],
                        };
                        std::future::ready(Some(events))
                    })
                    .flat_map(futures::stream::iter);

                Ok(Box::pin(event_stream) as ChunkStream)
            }
        }))
    }
}

fn drain_sse(buf: &mut String) -> Vec<anyhow::Result<Chunk>> {
    let mut out = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        let Some(data) = line.strip_prefix("data: ") else { continue };
        if data.trim().is_empty() {
            continue;
        }
        let Ok(v) = serde_json::from_str::<Value>(data) else { continue };
        out.extend(parse_candidate(&v));
    }
    out
}

fn parse_candidate(v: &Value) -> Vec<anyhow::Result<Chunk>> {
    let mut events = Vec::new();
    let mut index = 0u32;
    if let Some(candidate) = v["candidates"].get(0) {
        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    if !text.is_empty() {
                        events.push(Ok(Chunk::TextDelta(text.to_string())));
                    }
                } else if let Some(fc) = part.get("functionCall") {
                    let name = fc["name"].as_str().unwrap_or("").to_string();
                    let args = fc.get("args").cloned().unwrap_or(json!({}));
                    events.push(Ok(Chunk::ToolCallDelta {
                        index,
                        id: Some(format!("gemini-call-{index}")),
                        name: Some(name),
                        args_delta: Some(args.to_string()),
                    }));
                    index += 1;
                }
            }
        }
        if let Some(reason) = candidate.get("finishReason").and_then(|r| r.as_str()) {
            let finish = match reason {
                "STOP" if index > 0 => FinishReason::ToolCalls,
                "MAX_TOKENS" => FinishReason::Length,
                _ => FinishReason::Stop,
            };
            events.push(Ok(Chunk::Finish(finish)));
        }
    }
    if let Some(usage) = v.get("usageMetadata") {
        events.push(Ok(Chunk::Usage(Usage {
            input_tokens: usage["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
            cache_read_tokens: usage["cachedContentTokenCount"].as_u64().unwrap_or(0) as u32,
            cache_write_tokens: 0,
            cost_estimate: None,
        })));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_part() {
        let v = json!({"candidates": [{"content": {"parts": [{"text": "hi"}]}}]});
        let events = parse_candidate(&v);
        assert!(matches!(events[0], Ok(Chunk::TextDelta(ref t)) if t == "hi"));
    }

    #[test]
    fn parses_function_call_part() {
        let v = json!({"candidates": [{"content": {"parts": [{"functionCall": {"name": "shell", "args": {"cmd": "ls"}}}]}}]});
        let events = parse_candidate(&v);
        assert!(matches!(events[0], Ok(Chunk::ToolCallDelta { name: Some(ref n), .. }) if n == "shell"));
    }

    #[test]
    fn parses_usage_metadata() {
        let v = json!({"usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5}});
        let events = parse_candidate(&v);
        assert!(matches!(events[0], Ok(Chunk::Usage(u)) if u.input_tokens == 10 && u.output_tokens == 5));
    }

    #[test]
    fn build_contents_splits_system_instruction() {
        let msgs = vec![Message::system("be terse"), Message::user("hi")];
        let (system, contents) = build_contents(&msgs);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");
    }
}
