use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::provider::ChunkStream;
use crate::types::Chunk;

const MAX_ATTEMPTS: u32 = 3;

/// A non-success HTTP response from a provider, carrying the `Retry-After`
/// delay when the server sent one so `stream_with_retry` can honor it
/// instead of falling back to exponential backoff (§4.4: "honor
/// `Retry-After`").
#[derive(Debug)]
pub struct HttpStatusError {
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HttpStatusError {}

/// Parse a `Retry-After` header value per RFC 7231: either a delay in
/// seconds or an HTTP-date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let target = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    (target.with_timezone(&chrono::Utc) - chrono::Utc::now()).to_std().ok()
}

fn retry_after_of(err: &anyhow::Error) -> Option<Duration> {
    err.downcast_ref::<HttpStatusError>().and_then(|e| e.retry_after)
}

/// Whether a transport-level failure should be retried by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network error, 429, or 5xx — worth another attempt.
    Transient,
    /// 4xx validation, auth failure, context-length exceeded — retrying
    /// would fail identically.
    Fatal,
}

/// Classify an HTTP status code the way every provider adapter in this
/// crate does it before deciding to retry.
pub fn classify_status(status: u16) -> ErrorClass {
    if status == 429 || (500..600).contains(&status) {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> ErrorClass {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ErrorClass::Transient
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16())
    } else {
        ErrorClass::Transient
    }
}

fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(d) = retry_after {
        return d;
    }
    // Exponential backoff with jitter: base 500ms, doubling, +/- 100ms.
    let base_ms = 500u64 * 2u64.pow(attempt.saturating_sub(1));
    let jitter_ms = (attempt as u64 * 37) % 100;
    Duration::from_millis(base_ms + jitter_ms)
}

/// Drive a sequence of connection attempts, retrying transient failures
/// that occur *before* any text has been produced by the stream.
///
/// `attempt` is called once per try and must establish the HTTP connection
/// and return a stream of raw chunks (or an error classified by the
/// returned `ErrorClass`). Once a `Chunk::TextDelta` has been forwarded to
/// the caller, no further retry is attempted even if the underlying stream
/// later errors — duplicating user-visible text is worse than truncating.
pub fn stream_with_retry<F, Fut>(attempt: F) -> ChunkStream
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<ChunkStream>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<anyhow::Result<Chunk>>(64);

    tokio::spawn(async move {
        use futures::StreamExt;

        let mut text_seen = false;
        let mut attempt_no = 0u32;

        loop {
            attempt_no += 1;
            let stream_result = attempt().await;
            let mut stream = match stream_result {
                Ok(s) => s,
                Err(e) => {
                    if !text_seen && attempt_no < MAX_ATTEMPTS {
                        let retry_after = retry_after_of(&e);
                        warn!(attempt = attempt_no, error = %e, retry_after_secs = retry_after.map(|d| d.as_secs()), "provider connection failed, retrying");
                        tokio::time::sleep(backoff_delay(attempt_no, retry_after)).await;
                        continue;
                    }
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            let mut broke_for_retry = false;
            let mut mid_stream_retry_after = None;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => {
                        if matches!(chunk, Chunk::TextDelta(_)) {
                            text_seen = true;
                        }
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        if !text_seen && attempt_no < MAX_ATTEMPTS {
                            debug!(attempt = attempt_no, error = %e, "mid-stream error before text, retrying");
                            mid_stream_retry_after = retry_after_of(&e);
                            broke_for_retry = true;
                            break;
                        }
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            if broke_for_retry {
                tokio::time::sleep(backoff_delay(attempt_no, mid_stream_retry_after)).await;
                continue;
            }
            return;
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn classify_status_429_and_5xx_are_transient() {
        assert_eq!(classify_status(429), ErrorClass::Transient);
        assert_eq!(classify_status(503), ErrorClass::Transient);
        assert_eq!(classify_status(500), ErrorClass::Transient);
    }

    #[test]
    fn classify_status_4xx_is_fatal() {
        assert_eq!(classify_status(400), ErrorClass::Fatal);
        assert_eq!(classify_status(401), ErrorClass::Fatal);
        assert_eq!(classify_status(404), ErrorClass::Fatal);
    }

    #[test]
    fn parse_retry_after_accepts_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after("not-a-date"), None);
    }

    #[test]
    fn backoff_delay_honors_retry_after_over_exponential() {
        assert_eq!(backoff_delay(1, Some(Duration::from_secs(30))), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retry_after_header_is_read_from_the_failed_attempt() {
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempts2 = attempts.clone();

        let stream = stream_with_retry(move || {
            let attempts = attempts2.clone();
            async move {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n == 0 {
                    return Err(HttpStatusError {
                        message: "rate limited".into(),
                        retry_after: Some(Duration::from_millis(5)),
                    }
                    .into());
                }
                let events: Vec<anyhow::Result<Chunk>> = vec![Ok(Chunk::TextDelta("ok".into()))];
                Ok(Box::pin(futures::stream::iter(events)) as ChunkStream)
            }
        });

        let collected: Vec<_> = stream.collect().await;
        assert!(matches!(collected[0], Ok(Chunk::TextDelta(ref t)) if t == "ok"));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempts2 = attempts.clone();

        let stream = stream_with_retry(move || {
            let attempts = attempts2.clone();
            async move {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n == 0 {
                    anyhow::bail!("simulated transient failure")
                }
                let events: Vec<anyhow::Result<Chunk>> =
                    vec![Ok(Chunk::TextDelta("ok".into()))];
                Ok(Box::pin(futures::stream::iter(events)) as ChunkStream)
            }
        });

        let collected: Vec<_> = stream.collect().await;
        assert_eq!(collected.len(), 1);
        assert!(matches!(collected[0], Ok(Chunk::TextDelta(ref t)) if t == "ok"));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn never_retries_after_text_delta_observed() {
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempts2 = attempts.clone();

        let stream = stream_with_retry(move || {
            let attempts = attempts2.clone();
            async move {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let events: Vec<anyhow::Result<Chunk>> = vec![
                    Ok(Chunk::TextDelta("partial".into())),
                    Err(anyhow::anyhow!("stream dropped mid-flight")),
                ];
                Ok(Box::pin(futures::stream::iter(events)) as ChunkStream)
            }
        });

        let collected: Vec<_> = stream.collect().await;
        // text delta + the terminal error, and exactly one connection attempt
        assert_eq!(collected.len(), 2);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
