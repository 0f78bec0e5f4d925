//! The boundary to tool servers.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::tool::ToolDescriptor;

/// Errors raised by a tool transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server process could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// The command that failed.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The server did not complete the protocol handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connection is gone.
    #[error("connection closed")]
    Closed,

    /// No response arrived in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A message could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The server answered with a protocol-level error.
    #[error("server error {code}: {message}")]
    Server {
        /// The JSON-RPC error code.
        code: i64,
        /// The error message.
        message: String,
    },

    /// The tool ran and reported a failure.
    #[error("{0}")]
    ToolFailed(String),
}

impl From<serde_json::Error> for TransportError {
    #[inline]
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// An established connection to a tool server.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Lists the tools the server exposes.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError>;

    /// Calls a tool and returns its payload verbatim.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Value, TransportError>;

    /// Returns `true` if several calls may be in flight at once.
    fn supports_concurrent_calls(&self) -> bool {
        false
    }

    /// Releases the connection. Dropping the transport must release it as
    /// well, this only lets callers wait for the release.
    async fn close(&self) {}
}

/// Something that can establish a [`ToolTransport`].
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// A human-readable name used in diagnostics.
    fn name(&self) -> &str;

    /// Starts or connects to the server and completes the handshake.
    async fn connect(&self) -> Result<Box<dyn ToolTransport>, TransportError>;
}
