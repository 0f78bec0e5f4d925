//! Tool sessions: discovery and invocation against one tool server
//! connection.

use std::time::Duration;

use tokio::time::{Instant, timeout, timeout_at};
use toolloop_model::ToolCallRequest;
use tracing::Instrument;

use crate::error::AgentError;
use crate::tool::{Error as ToolError, ToolCatalog, ToolResult};
use crate::transport::{ToolServer, ToolTransport, TransportError};

/// A live connection to a tool server together with its tool catalog.
///
/// The connection is released by [`Session::close`], or when the session is
/// dropped (for example when the query owning it is cancelled).
pub struct Session {
    server_name: String,
    catalog: ToolCatalog,
    transport: Box<dyn ToolTransport>,
    call_timeout: Duration,
}

impl Session {
    /// Connects to the server and fetches its tool catalog.
    ///
    /// Nothing is retried here. The whole attempt, connection and listing,
    /// is bounded by `call_timeout`.
    pub async fn discover(
        server: &dyn ToolServer,
        call_timeout: Duration,
    ) -> Result<Self, AgentError> {
        let server_name = server.name().to_owned();
        let connection_error = |reason: String| AgentError::Connection {
            server: server.name().to_owned(),
            reason,
        };

        let deadline = Instant::now() + call_timeout;
        let transport = match timeout_at(deadline, server.connect()).await {
            Ok(Ok(transport)) => transport,
            Ok(Err(err)) => return Err(connection_error(err.to_string())),
            Err(_) => {
                return Err(connection_error(format!(
                    "no handshake after {call_timeout:?}"
                )));
            }
        };

        let tools = match timeout_at(deadline, transport.list_tools()).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(
                err @ (TransportError::Malformed(_)
                | TransportError::Server { .. }),
            )) => {
                transport.close().await;
                return Err(AgentError::Protocol {
                    server: server_name,
                    reason: err.to_string(),
                });
            }
            Ok(Err(err)) => {
                transport.close().await;
                return Err(connection_error(err.to_string()));
            }
            Err(_) => {
                transport.close().await;
                return Err(connection_error(format!(
                    "no tool listing after {call_timeout:?}"
                )));
            }
        };

        let catalog = match ToolCatalog::new(tools) {
            Ok(catalog) => catalog,
            Err(reason) => {
                transport.close().await;
                return Err(AgentError::Protocol {
                    server: server_name,
                    reason,
                });
            }
        };
        info!("discovered {} tools from `{server_name}`", catalog.len());

        Ok(Self {
            server_name,
            catalog,
            transport,
            call_timeout,
        })
    }

    /// Returns the name of the tool server.
    #[inline]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Returns the tools discovered for this session.
    #[inline]
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Returns `true` if calls may run concurrently on this connection.
    #[inline]
    pub fn supports_concurrent_calls(&self) -> bool {
        self.transport.supports_concurrent_calls()
    }

    /// Executes one tool call.
    ///
    /// Every failure is reported as a [`ToolError`]: unknown tool names
    /// are rejected without contacting the server, and transport faults
    /// and timeouts become execution errors.
    pub async fn invoke(&self, req: &ToolCallRequest) -> ToolResult {
        if !self.catalog.contains(&req.name) {
            warn!("tool not found: {}", req.name);
            return Err(ToolError::invalid_tool()
                .with_reason(format!("unknown tool `{}`", req.name)));
        }

        trace!("calling tool ({}) with args: {:?}", req.id, req.arguments);
        let call = self.transport.call_tool(&req.name, req.arguments.clone());
        let res = timeout(self.call_timeout, call)
            .instrument(debug_span!("tool call", tool = %req.name))
            .await;
        match res {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(TransportError::ToolFailed(reason))) => {
                Err(ToolError::execution_error().with_reason(reason))
            }
            Ok(Err(err)) => Err(ToolError::execution_error()
                .with_reason(format!("`{}` failed: {err}", req.name))),
            Err(_) => Err(ToolError::timeout().with_reason(format!(
                "`{}` did not finish within {:?}",
                req.name, self.call_timeout
            ))),
        }
    }

    /// Releases the connection.
    pub async fn close(self) {
        debug!("closing session with `{}`", self.server_name);
        self.transport.close().await;
    }
}
