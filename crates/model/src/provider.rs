use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// Errors of a completion service, classified by [`ErrorKind`] so callers
/// can tell timeouts and rate limits apart from other failures.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A completion service.
///
/// Each call to [`send_request`](ModelProvider::send_request) is one
/// completion round: the whole conversation and the offered tools go in,
/// a streamed [`ModelResponse`] comes out. Providers keep no conversation
/// state between rounds, the caller resends the history every time.
///
/// A round whose response carries no tool call is the final answer of the
/// turn. Otherwise the caller runs the requested tools and starts another
/// round with their results appended.
pub trait ModelProvider: Send + Sync {
    /// The error type of failed rounds.
    type Error: ModelProviderError;

    /// The streamed response of a round.
    type Response: ModelResponse<Error = Self::Error>;

    /// Starts a completion round. The returned future resolves once the
    /// service accepted the request; the content arrives through the
    /// response.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>>
    + Send
    + 'static;
}
