//! Built-in tool implementations and the registry that maps tool names to
//! executable handlers. MCP- and A2A-backed toolsets (`agc-mcp`, `agc-a2a`)
//! implement the same [`Tool`] trait and register into the same
//! [`ToolRegistry`] so the dispatcher in `agc-core` never distinguishes
//! built-in from remote tools.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use builtin::{FetchTool, FilesystemTool, MemoryTool, SandboxConfig, ShellTool, ThinkTool, TodoItem, TodoTool};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{OutputCategory, Tool, ToolCall, ToolOutput};
