//! MCP client toolsets: stdio and streaming-HTTP transports, tool
//! synthesis, and OAuth discovery for remote servers that require auth.

pub mod http;
pub mod oauth;
pub mod protocol;
pub mod stdio;
pub mod tool;

pub use http::HttpMcpClient;
pub use oauth::{discover, run_loopback_callback, AuthorizationEndpoints, PkceFlow};
pub use protocol::{McpError, ToolSpec};
pub use stdio::StdioMcpClient;
pub use tool::{McpTool, McpTransport};
