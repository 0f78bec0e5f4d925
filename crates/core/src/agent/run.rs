use tokio::time::timeout;
use toolloop_model::{ErrorKind as ModelErrorKind, ModelMessage, ModelRequest};
use tracing::Instrument;

use super::{Agent, AgentEvent};
use crate::config::BusyPolicy;
use crate::conversation::ThreadLease;
use crate::error::AgentError;
use crate::model_client::ModelClientResponse;
use crate::session::Session;
use crate::tool::Executor as ToolExecutor;

/// Messages produced by a successful run, and the final answer.
struct Turn {
    messages: Vec<ModelMessage>,
    answer: String,
}

impl Agent {
    /// Answers `input` on the thread `thread_id` and returns the final
    /// answer text.
    ///
    /// A new connection to the tool server is made for each query and
    /// released before returning. The user message, every intermediate
    /// message and the final answer are committed to the thread at once,
    /// and only if the query succeeds.
    ///
    /// # Cancel safety
    ///
    /// Dropping the returned future aborts the query. The connection and
    /// the thread are released, and nothing is committed.
    pub async fn query(
        &self,
        thread_id: &str,
        input: impl Into<String>,
    ) -> Result<String, AgentError> {
        let input = input.into();
        self.run(thread_id, input)
            .instrument(info_span!("agent run", thread_id))
            .await
    }

    async fn run(
        &self,
        thread_id: &str,
        input: String,
    ) -> Result<String, AgentError> {
        let lease = self.acquire(thread_id).await?;

        let session = Session::discover(
            self.tool_server.as_ref(),
            self.config.call_timeout,
        )
        .await?;
        self.emit(AgentEvent::ToolsDiscovered(session.catalog().descriptors()));

        let res = self.drive(&session, thread_id, input).await;
        session.close().await;

        let Turn { messages, answer } = res?;
        self.store.commit(&lease, messages);
        Ok(answer)
    }

    async fn acquire(
        &self,
        thread_id: &str,
    ) -> Result<ThreadLease, AgentError> {
        match self.config.busy_policy {
            BusyPolicy::Reject => {
                self.store.try_lease(thread_id).ok_or_else(|| {
                    warn!("rejecting query, thread is busy");
                    AgentError::ThreadBusy(thread_id.to_owned())
                })
            }
            BusyPolicy::Queue => Ok(self.store.lease(thread_id).await),
        }
    }

    async fn drive(
        &self,
        session: &Session,
        thread_id: &str,
        input: String,
    ) -> Result<Turn, AgentError> {
        let history = self.store.get(thread_id).into_messages();
        let tools = session.catalog().definitions();
        let executor = ToolExecutor::new(session);
        let mut turn = vec![ModelMessage::User(input)];

        for round in 1..=self.config.max_iterations {
            let req = ModelRequest {
                messages: self.request_messages(&history, &turn),
                tools: tools.clone(),
            };
            let resp = self.complete(round, req).await?;
            trace!("round {round} finished: {:?}", resp.finish_reason);
            let msg = resp.into_message();

            if msg.is_final() {
                info!("final answer after {round} rounds");
                let answer = msg.content.clone();
                turn.push(ModelMessage::Assistant(msg));
                return Ok(Turn {
                    messages: turn,
                    answer,
                });
            }

            debug!(
                "round {round}: model requested {} tools",
                msg.tool_calls.len()
            );
            for req in &msg.tool_calls {
                self.emit(AgentEvent::ToolCallStarted(req));
            }
            let results = executor
                .run_all(&msg.tool_calls, |result| {
                    self.emit(AgentEvent::ToolCallFinished(result));
                })
                .await;

            turn.push(ModelMessage::Assistant(msg));
            turn.extend(results.into_iter().map(ModelMessage::Tool));
        }

        warn!("no final answer after {} rounds", self.config.max_iterations);
        Err(AgentError::LoopExceeded {
            max_iterations: self.config.max_iterations,
        })
    }

    /// System instructions, the stored history, then this turn's messages.
    fn request_messages(
        &self,
        history: &[ModelMessage],
        turn: &[ModelMessage],
    ) -> Vec<ModelMessage> {
        let system_prompt = &self.config.system_prompt;
        let mut messages =
            Vec::with_capacity(history.len() + turn.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(ModelMessage::System(system_prompt.clone()));
        }
        messages.extend_from_slice(history);
        messages.extend_from_slice(turn);
        messages
    }

    async fn complete(
        &self,
        round: usize,
        req: ModelRequest,
    ) -> Result<ModelClientResponse, AgentError> {
        let on_event = self.on_event.clone();
        let on_transcript = move |delta: String| {
            if let Some(on_event) = &on_event {
                on_event(AgentEvent::Transcript(&delta));
            }
        };

        let call_timeout = self.config.call_timeout;
        let send = self.model_client.send_request(req, on_transcript);
        match timeout(call_timeout, send).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(err)) => Err(AgentError::Completion {
                round,
                kind: err.kind(),
                reason: err.to_string(),
            }),
            Err(_) => Err(AgentError::Completion {
                round,
                kind: ModelErrorKind::Timeout,
                reason: format!("no response after {call_timeout:?}"),
            }),
        }
    }
}
