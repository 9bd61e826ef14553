use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolOutput};

const CHAR_LIMIT: usize = 50_000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP GET with a configurable timeout. HTML is converted to readable
/// plain text; JSON is pretty-printed; anything else is returned verbatim.
pub struct FetchTool {
    client: reqwest::Client,
}

impl FetchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(3))
            .user_agent("agentcore/0.1")
            .build()
            .expect("reqwest client config is valid");
        Self { client }
    }
}

impl Default for FetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch the contents of a URL via HTTP GET. HTML is converted to \
         plain text; 'timeout_secs' overrides the default 30s timeout."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"},
                "timeout_secs": {"type": "integer"}
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(url) = call.args.get("url").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing required 'url' argument");
        };
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let response = match self.client.get(url).timeout(Duration::from_secs(timeout)).send().await {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("fetch failed: {e}")),
        };
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return ToolOutput::err(&call.id, format!("reading body failed: {e}")),
        };
        if !status.is_success() {
            return ToolOutput::err(&call.id, format!("http {status}: {}", truncate(&body)));
        }

        let text = if content_type.contains("html") {
            html_to_text(&body)
        } else if content_type.contains("json") {
            serde_json::from_str::<Value>(&body)
                .map(|v| serde_json::to_string_pretty(&v).unwrap_or(body.clone()))
                .unwrap_or(body)
        } else {
            body
        };
        ToolOutput::ok(&call.id, truncate(&text))
    }
}

fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100)
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= CHAR_LIMIT {
        return s.to_string();
    }
    let head: String = s.chars().take(CHAR_LIMIT).collect();
    format!("{head}\n[truncated at {CHAR_LIMIT} chars; total {} chars]", s.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_to_text_strips_tags() {
        let out = html_to_text("<html><body><p>Hello <b>world</b></p></body></html>");
        assert!(out.contains("Hello"));
        assert!(out.contains("world"));
        assert!(!out.contains("<p>"));
    }

    #[test]
    fn schema_requires_url() {
        let t = FetchTool::new();
        let schema = t.parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v.as_str() == Some("url")));
    }

    #[tokio::test]
    async fn missing_url_is_error() {
        let t = FetchTool::new();
        let out = t.execute(&ToolCall { id: "1".into(), name: "fetch".into(), args: json!({}) }).await;
        assert!(out.is_error);
    }

    #[test]
    fn truncate_leaves_short_text_untouched() {
        assert_eq!(truncate("short"), "short");
    }
}
