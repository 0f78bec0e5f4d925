//! Core logic including the agent turn loop, tool sessions, the
//! conversation store and configurations.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod config;
pub mod conversation;
mod error;
pub mod mcp;
mod model_client;
mod session;
#[cfg(test)]
mod testing;
pub mod tool;
pub mod transport;

pub use agent::{Agent, AgentBuilder, AgentEvent};
pub use config::{AgentConfig, BusyPolicy};
pub use conversation::{Checkpoint, ConversationStore, ConversationThread};
pub use error::{AgentError, CheckpointError};
pub use session::Session;
