use serde::{Deserialize, Serialize};

/// One segment of a possibly-multipart message body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
    /// Inline base64 payload: `data:<mime>;base64,<data>`.
    EmbeddedData { mime: String, data: String },
}

impl ContentPart {
    pub fn text(s: impl Into<String>) -> Self {
        ContentPart::Text { text: s.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl { url: url.into() }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentPart::ImageUrl { .. } | ContentPart::EmbeddedData { .. })
    }
}

/// Split a `data:<mime>;base64,<payload>` URL into its parts.
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?.to_string();
    Some((mime, data.to_string()))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single tool invocation requested by the model.
///
/// `index` is only meaningful while a call is still being streamed; once
/// finalized it is dropped from persisted records (see [`crate::ToolCall`]
/// vs. the accumulator in `agc-core`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    pub arguments_json: String,
}

/// An ordered record in a session's conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub parts: Vec<ContentPart>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `tool` messages: the call this message answers.
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Opaque provider-specific thinking summary. Persisted for transcript
    /// fidelity; never forwarded to sub-tools or counted toward downstream
    /// context unless the provider protocol requires it back verbatim.
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Name of the agent that produced this message, for transcripts shared
    /// across a handoff.
    #[serde(default)]
    pub agent_name: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: text.into(),
            parts: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            reasoning: None,
            agent_name: None,
        }
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            parts: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            reasoning: None,
            agent_name: None,
        }
    }

    pub fn as_text(&self) -> &str {
        &self.content
    }

    pub fn image_urls(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ImageUrl { url } => Some(url.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Cheap token estimate (4 chars per token), used when the provider
    /// doesn't report usage directly and budget decisions need a number.
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.len();
        for p in &self.parts {
            if let ContentPart::Text { text } = p {
                chars += text.len();
            }
        }
        chars / 4 + self.tool_calls.len() * 16
    }
}

/// JSON-schema description of a single callable tool, as presented to a
/// provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Effort-level or raw-token-budget control for providers that support
/// extended/chain-of-thought reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThinkingBudget {
    Effort(String),
    Tokens(u32),
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
    pub thinking_budget: Option<ThinkingBudget>,
    /// Stable key used by providers that support prompt caching pinned to a
    /// conversation (e.g. OpenRouter's `prompt_cache_key`).
    pub cache_key: Option<String>,
}

impl CompletionRequest {
    pub fn parallel_tool_calls(&self) -> bool {
        !self.tools.is_empty()
    }
}

/// One normalized chunk of a provider's streaming response.
///
/// This is the uniform wire format every provider adapter converts its
/// native SSE/JSON shape into. See `agc-core::agent` for how chunks are
/// assembled into finalized messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    TextDelta(String),
    ReasoningDelta(String),
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        args_delta: Option<String>,
    },
    Finish(FinishReason),
    Usage(Usage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_write_tokens: u32,
    pub cost_estimate: Option<f64>,
}
