mod builder;
mod run;

use std::sync::Arc;

use toolloop_model::{ToolCallRequest, ToolCallResult};

use crate::config::AgentConfig;
use crate::conversation::ConversationStore;
use crate::model_client::ModelClient;
use crate::tool::ToolDescriptor;
use crate::transport::ToolServer;
pub use builder::AgentBuilder;

type EventHandler = Arc<dyn Fn(AgentEvent<'_>) + Send + Sync>;

/// Progress of a query, reported to the callback set by
/// [`AgentBuilder::on_event`].
#[derive(Clone, Copy, Debug)]
pub enum AgentEvent<'a> {
    /// The tool catalog of the query's session is known.
    ToolsDiscovered(&'a [ToolDescriptor]),
    /// A piece of assistant text was received.
    Transcript(&'a str),
    /// A tool call is about to be sent.
    ToolCallStarted(&'a ToolCallRequest),
    /// A tool call produced a result, possibly an error.
    ToolCallFinished(&'a ToolCallResult),
}

/// An agent answering queries by alternating between a model and the tools
/// of a tool server.
///
/// An agent holds no per-query state and can serve many threads at once.
/// Conversations live in the [`ConversationStore`], which can be shared by
/// several agents.
pub struct Agent {
    model_client: ModelClient,
    tool_server: Arc<dyn ToolServer>,
    store: Arc<ConversationStore>,
    config: AgentConfig,
    on_event: Option<EventHandler>,
}

impl Agent {
    /// Returns the store holding this agent's conversations.
    #[inline]
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Returns the configuration of this agent.
    #[inline]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn emit(&self, event: AgentEvent<'_>) {
        if let Some(on_event) = &self.on_event {
            on_event(event);
        }
    }
}
