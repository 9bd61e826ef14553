use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::provider::ChunkStream;
use crate::types::{Chunk, CompletionRequest, Role, Usage};

/// Deterministic provider for tests: echoes the last user message back as
/// the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.as_text().to_string())
            .unwrap_or_else(|| "[no input]".to_string());

        let events: Vec<anyhow::Result<Chunk>> = vec![
            Ok(Chunk::TextDelta(format!("MOCK: {reply}"))),
            Ok(Chunk::Usage(Usage { input_tokens: 10, output_tokens: 10, ..Default::default() })),
            Ok(Chunk::Finish(crate::types::FinishReason::Stop)),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// Pre-scripted provider: each call to `stream` pops the next response
/// script from the front of the queue, so tests can specify exact chunk
/// sequences (including tool calls) without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<Chunk>>>>,
    name: String,
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedMockProvider {
    pub fn new(scripts: Vec<Vec<Chunk>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            name: "scripted-mock".into(),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![
            Chunk::TextDelta(reply.into()),
            Chunk::Usage(Usage { input_tokens: 5, output_tokens: 5, ..Default::default() }),
            Chunk::Finish(crate::types::FinishReason::Stop),
        ]])
    }

    /// A tool call followed by a text reply once the tool result comes back.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                Chunk::ToolCallDelta {
                    index: 0,
                    id: Some(tool_id.into()),
                    name: Some(tool_name.into()),
                    args_delta: Some(args_json.into()),
                },
                Chunk::Finish(crate::types::FinishReason::ToolCalls),
            ],
            vec![Chunk::TextDelta(final_text.into()), Chunk::Finish(crate::types::FinishReason::Stop)],
        ])
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        &self.name
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream> {
        *self.last_request.lock().unwrap() = Some(req);
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec![Chunk::TextDelta("[no more scripts]".into()), Chunk::Finish(crate::types::FinishReason::Stop)]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<Chunk>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::{CompletionRequest, Message, ModelProvider};

    fn empty_req() -> CompletionRequest {
        CompletionRequest { messages: vec![Message::user("hi")], stream: true, ..Default::default() }
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let p = MockProvider;
        let mut stream = p.stream(empty_req()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, Chunk::TextDelta(t) if t.contains("MOCK: hi")));
    }

    #[tokio::test]
    async fn scripted_tool_then_text_two_rounds() {
        let p = ScriptedMockProvider::tool_then_text("call-1", "shell", r#"{"command":"ls"}"#, "done");
        let req = empty_req();

        let mut stream = p.stream(req.clone()).await.unwrap();
        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev.unwrap());
        }
        assert!(events.iter().any(|e| matches!(e, Chunk::ToolCallDelta { name: Some(n), .. } if n == "shell")));

        let mut stream2 = p.stream(req).await.unwrap();
        let mut events2 = Vec::new();
        while let Some(ev) = stream2.next().await {
            events2.push(ev.unwrap());
        }
        assert!(events2.iter().any(|e| matches!(e, Chunk::TextDelta(t) if t == "done")));
    }

    #[tokio::test]
    async fn scripted_records_last_request() {
        let p = ScriptedMockProvider::always_text("hi");
        let _ = p.stream(empty_req()).await.unwrap();
        assert!(p.last_request.lock().unwrap().is_some());
    }
}
