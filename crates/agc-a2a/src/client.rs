use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::protocol::{decode_sse_event, JsonRpcRequest, JsonRpcResponse, Message, SendParams};

#[derive(Debug, thiserror::Error)]
pub enum A2aError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode: {0}")]
    Decode(String),
}

/// JSON-RPC client for one remote agent's `message/send` / `message/stream`
/// endpoint.
pub struct A2aClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl A2aClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into(), next_id: AtomicU64::new(1) }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// `message/send`: blocks until the peer returns its final artifact.
    pub async fn send(&self, text: &str) -> Result<String, A2aError> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id(),
            method: "message/send",
            params: SendParams { message: Message::user_text(text) },
        };
        let response = self
            .client
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| A2aError::Transport(e.to_string()))?;
        let body = response.text().await.map_err(|e| A2aError::Transport(e.to_string()))?;
        let resp: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| A2aError::Decode(e.to_string()))?;
        if let Some(err) = resp.error {
            return Err(A2aError::Rpc { code: err.code, message: err.message });
        }
        Ok(resp.result.map(|r| r.text()).unwrap_or_default())
    }

    /// `message/stream`: server-sent-events of intermediate deltas followed
    /// by a final artifact event. Yields plain-text chunks over a bounded
    /// channel; the background task that owns the HTTP response exits when
    /// the receiver is dropped.
    pub fn stream(&self, text: &str) -> ReceiverStream<String> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id(),
            method: "message/stream",
            params: SendParams { message: Message::user_text(text) },
        };
        let client = self.client.clone();
        let url = self.url.clone();
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move {
            let response = match client.post(&url).json(&req).send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "a2a stream connect failed");
                    return;
                }
            };
            let mut byte_stream = response.bytes_stream();
            use futures::StreamExt;
            let mut buf = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, "a2a stream read error");
                        break;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buf.find("\n\n") {
                    let event: String = buf.drain(..pos + 2).collect();
                    if let Some(value) = decode_sse_event(&event) {
                        if let Some(text) = value.get("text").and_then(|v| v.as_str()) {
                            if tx.send(text.to_string()).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });
        ReceiverStream::new(rx)
    }

    #[allow(dead_code)]
    fn timeout(&self) -> Duration {
        Duration::from_secs(120)
    }
}
