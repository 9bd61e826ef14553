use std::time::Duration;

use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tracing::debug;
use url::Url;

const CALLBACK_TIMEOUT_SECS: u64 = 180;

/// Endpoints for an OAuth authorization server, discovered or synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationEndpoints {
    pub authorize: String,
    pub token: String,
    pub register: String,
}

/// Probe the well-known discovery documents in order; fall back to
/// synthesizing the conventional paths under `base` when none respond.
pub async fn discover(client: &reqwest::Client, base: &str) -> AuthorizationEndpoints {
    const WELL_KNOWN: &[&str] = &[
        "/.well-known/oauth-protected-resource",
        "/.well-known/oauth-authorization-server",
        "/.well-known/openid-configuration",
    ];
    for suffix in WELL_KNOWN {
        let url = format!("{}{}", base.trim_end_matches('/'), suffix);
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                if let Ok(doc) = resp.json::<serde_json::Value>().await {
                    if let Some(endpoints) = endpoints_from_document(&doc) {
                        debug!(url, "discovered oauth endpoints");
                        return endpoints;
                    }
                }
            }
        }
    }
    synthesize(base)
}

fn endpoints_from_document(doc: &serde_json::Value) -> Option<AuthorizationEndpoints> {
    let authorize = doc.get("authorization_endpoint")?.as_str()?.to_string();
    let token = doc.get("token_endpoint")?.as_str()?.to_string();
    let register = doc
        .get("registration_endpoint")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}/register", base_of(&authorize)));
    Some(AuthorizationEndpoints { authorize, token, register })
}

fn base_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| format!("{}://{}", u.scheme(), u.host_str().unwrap_or("")))
        .unwrap_or_default()
}

fn synthesize(base: &str) -> AuthorizationEndpoints {
    let base = base.trim_end_matches('/');
    AuthorizationEndpoints {
        authorize: format!("{base}/authorize"),
        token: format!("{base}/token"),
        register: format!("{base}/register"),
    }
}

/// A PKCE code verifier/challenge pair and the `state` nonce used to
/// correlate the loopback callback with the request that opened it.
pub struct PkceFlow {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

impl PkceFlow {
    pub fn generate() -> Self {
        let verifier = random_url_safe_string(64);
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize());
        let state = random_url_safe_string(24);
        Self { verifier, challenge, state }
    }

    pub fn authorize_url(&self, endpoints: &AuthorizationEndpoints, client_id: &str, redirect_uri: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
            endpoints.authorize, client_id, redirect_uri, self.state, self.challenge
        )
    }
}

fn random_url_safe_string(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// Bind a loopback TCP listener, open the system browser at `authorize_url`,
/// and wait for the redirect carrying `code`+`state`. Returns the
/// authorization code once `state` is verified to match `expected_state`.
pub async fn run_loopback_callback(authorize_url: &str, expected_state: &str) -> Result<String, String> {
    let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| format!("bind failed: {e}"))?;
    let port = listener.local_addr().map_err(|e| e.to_string())?.port();
    debug!(port, "listening for oauth callback");

    if webbrowser::open(authorize_url).is_err() {
        debug!("failed to open browser automatically; user must navigate manually");
    }

    let accept = tokio::time::timeout(Duration::from_secs(CALLBACK_TIMEOUT_SECS), listener.accept());
    let (mut socket, _) = accept.await.map_err(|_| "callback timed out".to_string())?.map_err(|e| e.to_string())?;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut buf = vec![0u8; 8192];
    let n = socket.read(&mut buf).await.map_err(|e| e.to_string())?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let first_line = request.lines().next().unwrap_or("");
    let path = first_line.split_whitespace().nth(1).unwrap_or("");

    let url = Url::parse(&format!("http://localhost{path}")).map_err(|e| e.to_string())?;
    let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
    let state = params.get("state").cloned().unwrap_or_default();
    let code = params.get("code").cloned();

    let _ = socket.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;

    if state != expected_state {
        return Err("state mismatch".to_string());
    }
    code.ok_or_else(|| "no code in callback".to_string())
}
