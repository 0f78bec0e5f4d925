//! An out-of-the-box database agent that assembles an MCP tool server and
//! an OpenAI-compatible model provider.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring agent functionality into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod config;
mod session;

pub use config::{CliConfig, ConfigError};
pub use session::{Session, SessionBuilder};

/// Re-exports of [`toolloop_core`] crate.
pub mod core {
    pub use toolloop_core::*;
}
