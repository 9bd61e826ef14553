use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::normalize::merge_consecutive_same_role;
use crate::provider::{ChunkStream, ModelProvider};
use crate::retry::{parse_retry_after, stream_with_retry, HttpStatusError};
use crate::types::{Chunk, CompletionRequest, FinishReason, Message, Role, ThinkingBudget, Usage};

/// Native driver for Anthropic's Messages API.
///
/// Unlike the OpenAI wire format, Anthropic requires a single top-level
/// `system` string (not a message in the array), strict user/assistant
/// alternation, and streams `content_block_delta` events tagged by a
/// `content_block_start` that carries the block's type and index.
pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            model: model.into(),
            api_key,
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

fn split_system(messages: &[Message]) -> (Option<String>, Vec<Message>) {
    let mut system_parts = Vec::new();
    let mut rest = Vec::new();
    for m in messages {
        if m.role == Role::System {
            system_parts.push(m.content.clone());
        } else {
            rest.push(m.clone());
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, rest)
}

fn build_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::Assistant => "assistant",
                Role::Tool => "user",
                _ => "user",
            };
            if m.role == Role::Tool {
                let call_id = m.tool_call_id.clone().unwrap_or_default();
                return json!({
                    "role": "user",
                    "content": [{"type": "tool_result", "tool_use_id": call_id, "content": m.content}],
                });
            }
            if !m.tool_calls.is_empty() {
                let mut blocks = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": m.content}));
                }
                for tc in &m.tool_calls {
                    let input: Value =
                        serde_json::from_str(&tc.arguments_json).unwrap_or(json!({}));
                    blocks.push(json!({
                        "type": "tool_use", "id": tc.id, "name": tc.function_name, "input": input,
                    }));
                }
                return json!({"role": role, "content": blocks});
            }
            json!({"role": role, "content": m.content})
        })
        .collect()
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_reasoning(&self) -> bool {
        true
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream> {
        let merged = merge_consecutive_same_role(&req.messages);
        let (system, rest) = split_system(&merged);

        let mut body = json!({
            "model": self.model,
            "messages": build_messages(&rest),
            "max_tokens": 8192,
            "stream": true,
        });
        if let Some(s) = system {
            body["system"] = json!(s);
        }
        if !req.tools.is_empty() {
            body["tools"] = json!(req
                .tools
                .iter()
                .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.parameters}))
                .collect::<Vec<_>>());
        }
        if let Some(ThinkingBudget::Tokens(n)) = &req.thinking_budget {
            body["thinking"] = json!({"type": "enabled", "budget_tokens": n});
        }

        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("anthropic: api key not set"))?;
        let client = self.client.clone();
        let url = self.base_url.clone();

        Ok(stream_with_retry(move || {
            let body = body.clone();
            let client = client.clone();
            let url = url.clone();
            let api_key = api_key.clone();
            async move {
                let resp = client
                    .post(&url)
                    .timeout(Duration::from_secs(120))
                    .header("x-api-key", api_key)
                    .header("anthropic-version", "2023-06-01")
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
                    return Err(HttpStatusError { message: format!("anthropic error {status}: {text}"), retry_after }.into());
                }

                let byte_stream = resp.bytes_stream();
                let event_stream = byte_stream
                    .scan(
                        (String::new(), HashMap::<u32, String>::new()),
                        |(buf, block_types), chunk| {
                            let events = match chunk {
                                Ok(b) => {
                                    buf.push_str(&String::from_utf8_lossy(&b));
                                    drain_sse(buf, block_types)
                                }
                                Err(e) => vec![Err(anyhow::anyhow!(e))],
                            };
                            std::future::ready(Some(events))
                        },
                    )
                    .flat_map(futures::stream::iter);

                Ok(Box::pin(event_stream) as ChunkStream)
            }
        }))
    }
}

fn drain_sse(
    buf: &mut String,
    block_types: &mut HashMap<u32, String>,
) -> Vec<anyhow::Result<Chunk>> {
    let mut out = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        let Some(data) = line.strip_prefix("data: ") else { continue };
        if data.trim().is_empty() {
            continue;
        }
        let Ok(v) = serde_json::from_str::<Value>(data) else { continue };
        if let Some(chunk) = parse_event(&v, block_types) {
            out.push(chunk);
        }
    }
    out
}

fn parse_event(v: &Value, block_types: &mut HashMap<u32, String>) -> Option<anyhow::Result<Chunk>> {
    match v.get("type").and_then(|t| t.as_str())? {
        "content_block_start" => {
            let index = v["index"].as_u64()? as u32;
            let block = &v["content_block"];
            let block_type = block["type"].as_str().unwrap_or("text").to_string();
            if block_type == "tool_use" {
                let id = block["id"].as_str().map(str::to_string);
                let name = block["name"].as_str().map(str::to_string);
                block_types.insert(index, block_type);
                return Some(Ok(Chunk::ToolCallDelta { index, id, name, args_delta: None }));
            }
            block_types.insert(index, block_type);
            None
        }
        "content_block_delta" => {
            let index = v["index"].as_u64()? as u32;
            let delta = &v["delta"];
            match delta["type"].as_str()? {
                "text_delta" => Some(Ok(Chunk::TextDelta(delta["text"].as_str()?.to_string()))),
                "thinking_delta" => {
                    Some(Ok(Chunk::ReasoningDelta(delta["thinking"].as_str()?.to_string())))
                }
                "input_json_delta" => Some(Ok(Chunk::ToolCallDelta {
                    index,
                    id: None,
                    name: None,
                    args_delta: Some(delta["partial_json"].as_str()?.to_string()),
                })),
                _ => None,
            }
        }
        "message_delta" => {
            let stop_reason = v["delta"]["stop_reason"].as_str()?;
            let reason = match stop_reason {
                "tool_use" => FinishReason::ToolCalls,
                "max_tokens" => FinishReason::Length,
                _ => FinishReason::Stop,
            };
            Some(Ok(Chunk::Finish(reason)))
        }
        "message_stop" => None,
        "message_start" => {
            let usage = &v["message"]["usage"];
            let input = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
            let cache_read = usage["cache_read_input_tokens"].as_u64().unwrap_or(0) as u32;
            let cache_write = usage["cache_creation_input_tokens"].as_u64().unwrap_or(0) as u32;
            if input == 0 && cache_read == 0 && cache_write == 0 {
                return None;
            }
            Some(Ok(Chunk::Usage(Usage {
                input_tokens: input,
                output_tokens: 0,
                cache_read_tokens: cache_read,
                cache_write_tokens: cache_write,
                cost_estimate: None,
            })))
        }
        _ => None,
    }
}
