//! Agent-file schema, layered YAML configuration loading, and `${VAR}`
//! environment expansion.

pub mod env;
pub mod loader;
pub mod schema;

pub use env::{DotEnvProvider, EnvProvider, EnvResolver, ExpansionError, ProcessEnvProvider};
pub use loader::load;
pub use schema::{
    A2APeerConfig, AgentConfig, Config, MCPServerConfig, ModelConfig, PermissionsConfig,
    ProviderConfig, RagSourceConfig, ToolsConfig, ToolsetRef,
};
