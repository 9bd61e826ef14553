use std::time::Duration;

use tracing::{debug, warn};

use crate::openai_compat::{AuthStyle, OpenAICompatProvider};

/// Loopback/bridge addresses tried, in order, when the configured DMR
/// (local model runtime) host does not answer. Covers the common
/// container-network topologies: localhost, Docker's default bridge
/// gateway, and the Linux `host.docker.internal` alias some runtimes add.
const FALLBACK_HOSTS: &[&str] = &[
    "http://localhost:12434",
    "http://127.0.0.1:12434",
    "http://host.docker.internal:12434",
    "http://172.17.0.1:12434",
];

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const CONFIGURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe a list of candidate base URLs and return the first one that
/// answers, trying the configured host first.
pub async fn discover_base_url(configured_host: Option<&str>) -> String {
    let client = reqwest::Client::new();
    let mut candidates: Vec<String> = Vec::new();
    if let Some(h) = configured_host {
        candidates.push(h.trim_end_matches('/').to_string());
    }
    for h in FALLBACK_HOSTS {
        if !candidates.iter().any(|c| c == h) {
            candidates.push(h.to_string());
        }
    }

    for base in &candidates {
        let probe_url = format!("{base}/engines/llama.cpp/v1/models");
        match client.get(&probe_url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(base = %base, "DMR endpoint reachable");
                return base.clone();
            }
            _ => continue,
        }
    }

    warn!("no DMR endpoint reachable; defaulting to first candidate (requests will fail until it's up)");
    candidates.into_iter().next().unwrap_or_else(|| FALLBACK_HOSTS[0].to_string())
}

/// Best-effort runtime configuration (temperature, top-p, context size).
/// Failure is logged and non-fatal: the model may already be configured
/// correctly, or the runtime may not expose this endpoint.
pub async fn try_configure(base_url: &str, model: &str, context_size: u32) {
    let client = reqwest::Client::new();
    let url = format!("{base_url}/_configure");
    let body = serde_json::json!({ "model": model, "context_size": context_size });
    match client.post(&url).timeout(CONFIGURE_TIMEOUT).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => {
            debug!(base = %base_url, "DMR runtime configured");
        }
        Ok(resp) => warn!(status = %resp.status(), "DMR configure endpoint rejected request"),
        Err(e) => warn!(error = %e, "DMR configure endpoint unreachable, continuing with defaults"),
    }
}

/// Build the provider after endpoint discovery and best-effort configure.
pub async fn build(model: impl Into<String>, configured_host: Option<&str>) -> OpenAICompatProvider {
    let model = model.into();
    let base = discover_base_url(configured_host).await;
    try_configure(&base, &model, 8192).await;
    OpenAICompatProvider::with_full_chat_url(
        "dmr",
        format!("{base}/engines/llama.cpp/v1/chat/completions"),
        model,
        None,
        AuthStyle::None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_list_is_non_empty() {
        assert!(!FALLBACK_HOSTS.is_empty());
    }

    #[tokio::test]
    async fn discover_prefers_configured_host_order() {
        // No server is actually listening in the test environment, so this
        // only checks that discovery doesn't panic and returns some URL.
        let url = discover_base_url(Some("http://127.0.0.1:1")).await;
        assert!(url.starts_with("http://"));
    }
}
