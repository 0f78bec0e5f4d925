//! A client for MCP (Model Context Protocol) tool servers.
//!
//! Only the stdio transport is supported: the server is a child process
//! exchanging newline-delimited JSON-RPC 2.0 messages over its standard
//! streams.

mod protocol;
mod stdio;

pub use protocol::PROTOCOL_VERSION;
pub use stdio::{StdioServerConfig, StdioTransport};
