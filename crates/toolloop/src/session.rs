use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::future::retry;
use toolloop_core::transport::ToolServer;
use toolloop_core::{
    Agent, AgentBuilder, AgentConfig, AgentError, AgentEvent, Checkpoint,
    CheckpointError, ConversationStore,
};
use toolloop_model::ModelProvider;

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_MAX_RETRY_TIME: Duration = Duration::from_secs(30);

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    retry_interval: Duration,
    max_retry_time: Duration,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        Self {
            agent_builder: AgentBuilder::with_model_provider(provider),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_retry_time: DEFAULT_MAX_RETRY_TIME,
        }
    }

    /// Sets the tool server used by every query.
    #[inline]
    pub fn with_tool_server<S: ToolServer + 'static>(
        mut self,
        server: S,
    ) -> Self {
        self.agent_builder = self.agent_builder.with_tool_server(server);
        self
    }

    /// Sets the turn loop configuration.
    #[inline]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.agent_builder = self.agent_builder.with_config(config);
        self
    }

    /// Sets the system prompt for the agent.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.agent_builder = self.agent_builder.with_system_prompt(prompt);
        self
    }

    /// Sets how long a query keeps being retried when the tool server
    /// cannot be reached, and the first delay between attempts.
    #[inline]
    pub fn with_retry(
        mut self,
        interval: Duration,
        max_time: Duration,
    ) -> Self {
        self.retry_interval = interval;
        self.max_retry_time = max_time;
        self
    }

    /// Attaches a callback receiving the progress of every query.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(AgentEvent<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_event(on_event);
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Session {
        Session {
            agent: self.agent_builder.build(),
            retry_interval: self.retry_interval,
            max_retry_time: self.max_retry_time,
        }
    }
}

/// A chat session, asking queries on conversation threads.
///
/// The session holds a fully configured agent, and it is basically a
/// wrapper around [`Agent`] that retries queries whose tool server could
/// not be reached.
pub struct Session {
    agent: Agent,
    retry_interval: Duration,
    max_retry_time: Duration,
}

impl Session {
    /// Returns the underlying agent.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Returns the store holding the conversations.
    #[inline]
    pub fn store(&self) -> &Arc<ConversationStore> {
        self.agent.store()
    }

    /// Asks a query on a thread and returns the answer.
    ///
    /// Connection failures are retried with an exponential backoff, since
    /// a failed query leaves no trace on the thread. Other errors are
    /// returned right away.
    pub async fn ask(
        &self,
        thread_id: &str,
        query: &str,
    ) -> Result<String, AgentError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_interval)
            .with_max_elapsed_time(Some(self.max_retry_time))
            .build();
        retry(policy, move || async move {
            self.agent.query(thread_id, query).await.map_err(|err| {
                if matches!(err, AgentError::Connection { .. }) {
                    warn!("query failed, will retry: {err}");
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        })
        .await
    }

    /// Installs a serialized thread and returns its message count.
    ///
    /// The thread's current history must be a prefix of the serialized one,
    /// and no query may be running on it.
    #[inline]
    pub fn load_checkpoint(
        &self,
        raw: String,
    ) -> Result<usize, CheckpointError> {
        let thread = self.store().import(&Checkpoint::from_string(raw))?;
        Ok(thread.len())
    }

    /// Serializes a thread.
    #[inline]
    pub fn save_checkpoint(
        &self,
        thread_id: &str,
    ) -> Result<String, CheckpointError> {
        Ok(self.store().snapshot(thread_id)?.into_string())
    }
}
