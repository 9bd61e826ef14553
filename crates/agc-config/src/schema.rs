use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_max_iterations() -> u32 {
    20
}

fn default_num_history_items() -> u32 {
    0
}

fn default_tool_timeout_secs() -> u64 {
    60
}

/// A custom provider endpoint (self-hosted gateway, on-prem proxy, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// One of: openai, anthropic, google, mistral, dmr, mock.
    pub kind: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// A named model binding: which provider, which model id, sampling, and
/// thinking-budget defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub thinking_budget: Option<String>,
    /// Only meaningful for the `dmr` provider.
    #[serde(default)]
    pub local_host: Option<String>,
}

/// A single retrieval source. Indexing/retrieval internals are out of
/// scope for the core runtime — it only needs enough to resolve the source
/// at agent-load time and hand the external `retrieve(query)` collaborator
/// its configured root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSourceConfig {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsetRef {
    /// `"filesystem"`, `"shell"`, `"todo"`, `"memory"`, `"fetch"`, `"think"`,
    /// `"mcp:<name>"`, or `"a2a:<name>"`.
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub instruction: String,
    pub model: String,
    #[serde(default)]
    pub toolsets: Vec<String>,
    #[serde(default)]
    pub sub_agents: Vec<String>,
    #[serde(default)]
    pub handoffs: Vec<String>,
    #[serde(default)]
    pub commands: HashMap<String, String>,
    #[serde(default)]
    pub welcome_message: Option<String>,
    #[serde(default)]
    pub structured_output_schema: Option<serde_json::Value>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_num_history_items")]
    pub num_history_items: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub allow: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPServerConfig {
    pub name: String,
    /// `"stdio"` or `"http"`.
    pub transport: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2APeerConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub filesystem_root: Option<String>,
    #[serde(default)]
    pub memory_file: Option<String>,
    #[serde(default)]
    pub use_sandbox: bool,
    #[serde(default)]
    pub sandbox_image: Option<String>,
    #[serde(default)]
    pub sandbox_mounts: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
            filesystem_root: None,
            memory_file: None,
            use_sandbox: false,
            sandbox_image: None,
            sandbox_mounts: Vec::new(),
        }
    }
}

/// The resolved configuration object the runtime consumes. Versioning
/// (vN→vN+1 migration) and the original YAML parse happen in the external
/// agent-file loader; by the time `Config` reaches the runtime, `${VAR}`
/// expansion has already been applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    #[serde(default)]
    pub rag_sources: Vec<RagSourceConfig>,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub mcp_servers: Vec<MCPServerConfig>,
    #[serde(default)]
    pub a2a_peers: Vec<A2APeerConfig>,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub root_agent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_yaml() {
        let yaml = r#"
root_agent: root
models:
  fast:
    provider: openai
    name: gpt-4o-mini
agents:
  root:
    name: root
    instruction: "be helpful"
    model: fast
    toolsets: ["shell"]
permissions:
  allow: ["shell:ls"]
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.root_agent.as_deref(), Some("root"));
        assert_eq!(cfg.agents["root"].model, "fast");
        assert_eq!(cfg.permissions.allow, vec!["shell:ls"]);
    }

    #[test]
    fn default_config_has_no_agents() {
        let cfg = Config::default();
        assert!(cfg.agents.is_empty());
        assert_eq!(cfg.tools.timeout_secs, 60);
    }

    #[test]
    fn agent_config_defaults_max_iterations() {
        let yaml = r#"
name: a
instruction: "x"
model: fast
"#;
        let a: AgentConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(a.max_iterations, 20);
    }
}
