use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{CompletionRequest, Chunk};

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<Chunk>> + Send>>;

/// Uniform streaming interface implemented by every backend (OpenAI,
/// Anthropic, Gemini, Mistral, DMR). The conversation loop never branches on
/// provider identity; it only calls `stream`.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable backend name (`"openai"`, `"anthropic"`, ...).
    fn name(&self) -> &str;

    /// Model identifier as configured.
    fn model_name(&self) -> &str;

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream>;

    /// Returns `true` if this provider/model accepts image input. Used by
    /// the normalization layer to decide whether to drop image parts.
    fn supports_images(&self) -> bool {
        false
    }

    /// Returns `true` if this provider supports a dedicated reasoning
    /// channel (separate from plain text).
    fn supports_reasoning(&self) -> bool {
        false
    }
}
