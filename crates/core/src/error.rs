use thiserror::Error;
use toolloop_model::ErrorKind as ModelErrorKind;

/// Errors that abort a query.
///
/// None of these leave partial history behind: the thread's persisted
/// messages are exactly what they were before the query started.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The tool server could not be started, the handshake failed, or the
    /// connection was lost while listing tools.
    #[error("cannot connect to tool server `{server}`: {reason}")]
    Connection {
        /// The tool server that failed.
        server: String,
        /// What went wrong.
        reason: String,
    },

    /// The tool server answered with a malformed tool listing.
    #[error("tool server `{server}` sent a malformed tool listing: {reason}")]
    Protocol {
        /// The tool server that failed.
        server: String,
        /// What went wrong.
        reason: String,
    },

    /// The completion service failed or timed out.
    #[error("completion service failed in round {round} ({kind}): {reason}")]
    Completion {
        /// The 1-based round of the turn loop.
        round: usize,
        /// The provider's error classification.
        kind: ModelErrorKind,
        /// What went wrong.
        reason: String,
    },

    /// The turn loop reached its iteration cap without a final answer.
    #[error("no final answer after {max_iterations} rounds")]
    LoopExceeded {
        /// The configured cap.
        max_iterations: usize,
    },

    /// Another query is running on the same thread.
    #[error("thread `{0}` is busy with another query")]
    ThreadBusy(String),
}

/// Errors raised while converting checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The checkpoint is not a valid document.
    #[error("malformed checkpoint: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The checkpoint was written by an unknown format version.
    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),

    /// The stored history is not a prefix of the checkpoint's history.
    #[error("checkpoint for thread `{0}` conflicts with stored history")]
    Conflict(String),

    /// A query is running on the thread.
    #[error("thread `{0}` is busy")]
    Busy(String),
}
