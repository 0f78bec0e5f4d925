use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use toolloop_model::ModelProvider;

use super::{Agent, AgentEvent, EventHandler};
use crate::config::{AgentConfig, BusyPolicy};
use crate::conversation::ConversationStore;
use crate::model_client::ModelClient;
use crate::tool::ToolDescriptor;
use crate::transport::{ToolServer, ToolTransport, TransportError};

/// [`Agent`] builder.
pub struct AgentBuilder {
    model_client: ModelClient,
    tool_server: Arc<dyn ToolServer>,
    store: Option<Arc<ConversationStore>>,
    config: AgentConfig,
    on_event: Option<EventHandler>,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    ///
    /// Until a tool server is set, the agent offers no tools to the model.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            tool_server: Arc::new(NoToolServer),
            store: None,
            config: AgentConfig::default(),
            on_event: None,
        }
    }

    /// Sets the tool server connected to at the start of every query.
    #[inline]
    pub fn with_tool_server<S: ToolServer + 'static>(
        mut self,
        server: S,
    ) -> Self {
        self.tool_server = Arc::new(server);
        self
    }

    /// Shares an existing conversation store. A fresh one is created
    /// otherwise.
    #[inline]
    pub fn with_store(mut self, store: Arc<ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the whole configuration.
    #[inline]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the system instructions.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    /// Sets the cap on completion rounds per query.
    #[inline]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Sets the timeout of discovery, completions and tool calls.
    #[inline]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.config.call_timeout = call_timeout;
        self
    }

    /// Sets what happens to a query for a thread that is already busy.
    #[inline]
    pub fn with_busy_policy(mut self, busy_policy: BusyPolicy) -> Self {
        self.config.busy_policy = busy_policy;
        self
    }

    /// Attaches a callback receiving the progress of every query.
    ///
    /// The callback runs inline on the query's task, so it should return
    /// quickly.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(AgentEvent<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.on_event = Some(Arc::new(on_event));
        self
    }

    /// Builds the agent.
    pub fn build(self) -> Agent {
        let Self {
            model_client,
            tool_server,
            store,
            mut config,
            on_event,
        } = self;

        if config.max_iterations == 0 {
            warn!("`max_iterations` must be positive, using 1");
            config.max_iterations = 1;
        }

        Agent {
            model_client,
            tool_server,
            store: store.unwrap_or_default(),
            config,
            on_event,
        }
    }
}

struct NoToolServer;

#[async_trait]
impl ToolServer for NoToolServer {
    fn name(&self) -> &str {
        "none"
    }

    async fn connect(&self) -> Result<Box<dyn ToolTransport>, TransportError> {
        Ok(Box::new(NoToolServer))
    }
}

#[async_trait]
impl ToolTransport for NoToolServer {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        Ok(vec![])
    }

    async fn call_tool(
        &self,
        _name: &str,
        _arguments: Value,
    ) -> Result<Value, TransportError> {
        Err(TransportError::Closed)
    }
}
