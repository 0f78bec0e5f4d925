use std::pin::Pin;
use std::task::{self, Poll};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::ModelProviderError;

/// The streamed outcome of one completion round.
///
/// Text arrives as [`ModelResponseEvent::MessageDelta`]s to be
/// concatenated, requested tools as complete
/// [`ModelResponseEvent::ToolCall`]s, and the stream ends with a single
/// [`ModelResponseEvent::Completed`] telling whether the round is a final
/// answer ([`ModelFinishReason::Stop`]) or waits for tool results
/// ([`ModelFinishReason::ToolCalls`]).
pub trait ModelResponse: Sized + Send + 'static {
    /// The error type of the round, shared with the provider.
    type Error: ModelProviderError;

    /// Attempts to pull out the next event.
    ///
    /// - `Poll::Pending`: no event yet, the task is woken when one may be
    ///   ready.
    /// - `Poll::Ready(Ok(Some(event)))`: an event, more may follow.
    /// - `Poll::Ready(Ok(None))`: the stream is over. Calling again keeps
    ///   returning `None`.
    /// - `Poll::Ready(Err(error))`: the round failed, no usable answer
    ///   follows.
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>>;
}

/// How a completion round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFinishReason {
    /// The model waits for the results of the tool calls it requested.
    ToolCalls,
    /// The text is the final answer.
    Stop,
}

/// A tool invocation requested by the model, answered by a tool result
/// carrying the same `id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Identifier pairing the request with its result.
    pub id: String,
    /// The name of the tool to call.
    pub name: String,
    /// The arguments to pass to the tool, usually a JSON object.
    pub arguments: Value,
}

/// An event of a streamed round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelResponseEvent {
    /// The round is over.
    Completed(ModelFinishReason),
    /// A piece of the answer text.
    MessageDelta(String),
    /// A tool call, with its arguments complete.
    ToolCall(ToolCallRequest),
}
