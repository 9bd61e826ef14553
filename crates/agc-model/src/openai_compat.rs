use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::normalize::drop_additional_properties;
use crate::provider::{ChunkStream, ModelProvider};
use crate::retry::{parse_retry_after, stream_with_retry, HttpStatusError};
use crate::types::{Chunk, CompletionRequest, FinishReason, Message, Role, ThinkingBudget, Usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    Bearer,
    None,
}

/// Shared implementation for every backend that speaks the OpenAI Chat
/// Completions wire format: OpenAI itself, Mistral (same shape), and the
/// local DMR runtime (llama.cpp-server-compatible).
///
/// Keeping one generic struct instead of one type per backend means new
/// OpenAI-wire-compatible backends are a constructor, not a new impl.
pub struct OpenAICompatProvider {
    driver_name: String,
    model: String,
    chat_url: String,
    api_key: Option<String>,
    auth_style: AuthStyle,
    client: reqwest::Client,
    supports_images: bool,
    supports_reasoning: bool,
}

impl OpenAICompatProvider {
    pub fn new(
        driver_name: impl Into<String>,
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        auth_style: AuthStyle,
    ) -> Self {
        Self::with_full_chat_url(
            driver_name,
            format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            api_key,
            auth_style,
        )
    }

    pub fn with_full_chat_url(
        driver_name: impl Into<String>,
        chat_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        auth_style: AuthStyle,
    ) -> Self {
        Self {
            driver_name: driver_name.into(),
            model: model.into(),
            chat_url: chat_url.into(),
            api_key,
            auth_style,
            client: reqwest::Client::new(),
            supports_images: false,
            supports_reasoning: false,
        }
    }

    pub fn with_vision(mut self) -> Self {
        self.supports_images = true;
        self
    }

    pub fn with_reasoning(mut self) -> Self {
        self.supports_reasoning = true;
        self
    }
}

fn build_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let mut obj = json!({ "role": role, "content": m.content });
            if let Some(id) = &m.tool_call_id {
                obj["tool_call_id"] = json!(id);
            }
            if !m.tool_calls.is_empty() {
                obj["tool_calls"] = json!(m
                    .tool_calls
                    .iter()
                    .map(|tc| json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.function_name, "arguments": tc.arguments_json },
                    }))
                    .collect::<Vec<_>>());
            }
            obj
        })
        .collect()
}

fn thinking_effort_field(budget: &ThinkingBudget) -> Value {
    match budget {
        ThinkingBudget::Effort(level) => json!(level),
        ThinkingBudget::Tokens(n) => json!(n),
    }
}

#[async_trait]
impl ModelProvider for OpenAICompatProvider {
    fn name(&self) -> &str {
        &self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_images(&self) -> bool {
        self.supports_images
    }

    fn supports_reasoning(&self) -> bool {
        self.supports_reasoning
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream> {
        let mut tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                let mut params = t.parameters.clone();
                drop_additional_properties(&mut params);
                json!({
                    "type": "function",
                    "function": { "name": t.name, "description": t.description, "parameters": params },
                })
            })
            .collect();
        if tools.is_empty() {
            tools.clear();
        }

        let mut body = json!({
            "model": self.model,
            "messages": build_messages(&req.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["parallel_tool_calls"] = json!(req.parallel_tool_calls());
        }
        if let Some(budget) = &req.thinking_budget {
            if self.supports_reasoning {
                body["reasoning_effort"] = thinking_effort_field(budget);
            }
        }

        let chat_url = self.chat_url.clone();
        let api_key = self.api_key.clone();
        let auth_style = self.auth_style;
        let client = self.client.clone();
        let driver_name = self.driver_name.clone();

        Ok(stream_with_retry(move || {
            let body = body.clone();
            let chat_url = chat_url.clone();
            let api_key = api_key.clone();
            let client = client.clone();
            let driver_name = driver_name.clone();
            async move {
                let mut http_req = client
                    .post(&chat_url)
                    .timeout(Duration::from_secs(120))
                    .json(&body);
                if auth_style == AuthStyle::Bearer {
                    let key = api_key
                        .as_deref()
                        .ok_or_else(|| anyhow::anyhow!("{driver_name}: api key not set"))?;
                    http_req = http_req.bearer_auth(key);
                }

                let resp = http_req.send().await?;
                if !resp.status().is_success() {
                    let status = resp.status();
                    let retry_after = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_retry_after);
                    let text = resp.text().await.unwrap_or_default();
                    return Err(HttpStatusError { message: format!("{driver_name} error {status}: {text}"), retry_after }.into());
                }

                let byte_stream = resp.bytes_stream();
                let event_stream = byte_stream
                    .scan(String::new(), |buf, chunk| {
                        let events: Vec<anyhow::Result<Chunk>> = match chunk {
                            Ok(b) => {
                                buf.push_str(&String::from_utf8_lossy(&b));
                                drain_complete_sse_lines(buf)
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

/// SSE events can be split across TCP packets; buffer partial lines.
fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<Chunk>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<Chunk>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let v: Value = serde_json::from_str(data).ok()?;
    parse_sse_chunk(&v)
}

fn parse_sse_chunk(v: &Value) -> Option<anyhow::Result<Chunk>> {
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let cache_read_tokens = usage
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0) as u32;
        return Some(Ok(Chunk::Usage(Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            cache_read_tokens,
            cache_write_tokens: 0,
            cost_estimate: None,
        })));
    }

    let choice = v.get("choices")?.get(0)?;

    if choice["finish_reason"].as_str() == Some("length") {
        return Some(Ok(Chunk::Finish(FinishReason::Length)));
    }
    if choice["finish_reason"].as_str() == Some("tool_calls") {
        return Some(Ok(Chunk::Finish(FinishReason::ToolCalls)));
    }
    if choice["finish_reason"].as_str() == Some("stop") {
        return Some(Ok(Chunk::Finish(FinishReason::Stop)));
    }

    let delta = choice.get("delta")?;

    if let Some(tool_calls) = delta.get("tool_calls") {
        if let Some(tc) = tool_calls.get(0) {
            let index = tc["index"].as_u64().unwrap_or(0) as u32;
            let id = tc.get("id").and_then(|v| v.as_str()).map(str::to_string);
            let name = tc["function"]
                .get("name")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let args_delta = tc["function"]
                .get("arguments")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            return Some(Ok(Chunk::ToolCallDelta { index, id, name, args_delta }));
        }
    }

    let reasoning = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(r) = reasoning {
        if !r.is_empty() {
            return Some(Ok(Chunk::ReasoningDelta(r.to_string())));
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            return Some(Ok(Chunk::TextDelta(text.to_string())));
        }
    }

    None
}
