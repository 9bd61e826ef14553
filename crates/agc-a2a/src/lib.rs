//! Agent-to-agent JSON-RPC client. Each configured peer becomes one
//! synthesized tool whose body is `message/send` to that peer.

pub mod client;
pub mod protocol;
pub mod tool;

pub use client::{A2aClient, A2aError};
pub use protocol::{Artifact, ArtifactPart, Message, MessagePart, SendResult};
pub use tool::A2aTool;
