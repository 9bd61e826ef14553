//! Facade crate re-exporting the core agent runtime.
//!
//! This crate has no CLI, TUI, or server surface of its own — those are
//! external collaborators. It exists to give downstream embedders a single
//! dependency that wires the runtime, provider adapters, tool dispatcher,
//! and session store together.

pub use agc_config as config;
pub use agc_core as core;
pub use agc_mcp as mcp;
pub use agc_a2a as a2a;
pub use agc_model as model;
pub use agc_permissions as permissions;
pub use agc_session as session;
pub use agc_tools as tools;

pub use agc_core::runtime::Runtime;
pub use agc_core::events::RuntimeEvent;
