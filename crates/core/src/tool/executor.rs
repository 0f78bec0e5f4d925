use futures_util::future::join_all;
use toolloop_model::{ToolCallRequest, ToolCallResult};
use tracing::Instrument;

use crate::session::Session;

/// An executor that handles tool call requests from the model.
pub struct Executor<'s> {
    session: &'s Session,
}

impl<'s> Executor<'s> {
    #[inline]
    pub fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Runs every request and returns one result per request, in request
    /// order.
    ///
    /// Requests run concurrently when the connection allows it. Failures,
    /// including unknown tools, are folded into error results.
    pub async fn run_all<F>(
        &self,
        requests: &[ToolCallRequest],
        on_finished: F,
    ) -> Vec<ToolCallResult>
    where
        F: Fn(&ToolCallResult) + Sync,
    {
        let span = debug_span!("tool executor", count = requests.len());
        async {
            if self.session.supports_concurrent_calls() && requests.len() > 1 {
                let calls =
                    requests.iter().map(|req| self.run_one(req, &on_finished));
                join_all(calls).await
            } else {
                let mut results = Vec::with_capacity(requests.len());
                for req in requests {
                    results.push(self.run_one(req, &on_finished).await);
                }
                results
            }
        }
        .instrument(span)
        .await
    }

    async fn run_one<F>(
        &self,
        req: &ToolCallRequest,
        on_finished: &F,
    ) -> ToolCallResult
    where
        F: Fn(&ToolCallResult) + Sync,
    {
        let result = match self.session.invoke(req).await {
            Ok(payload) => ToolCallResult::success(req, payload),
            Err(err) => {
                debug!("tool ({}) failed: {err}", req.id);
                ToolCallResult::failure(req, err.to_string())
            }
        };
        on_finished(&result);
        result
    }
}
