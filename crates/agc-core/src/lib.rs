//! The conversation loop, tool dispatcher, event fan-out, and runtime
//! entry point (§4.1/§4.2/§4.8): the part of the stack that turns a user
//! message plus a Team definition into a driven, streamed, resumable
//! agent session.

pub mod assemble;
pub mod conversation;
pub mod dispatcher;
pub mod events;
pub mod fanout;
pub mod runtime;
pub mod types;

pub use conversation::{LoopOutcome, ResumeAction, RunContext};
pub use dispatcher::Dispatcher;
pub use events::RuntimeEvent;
pub use fanout::{Fanout, FanoutSender};
pub use runtime::{Runtime, RuntimeError};
pub use types::{Agent, SessionSettings, Team};
