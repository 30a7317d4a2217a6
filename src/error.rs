/// Failure talking to the backend. Every non-2xx status is one kind.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{context}: server returned {status}")]
    Status { status: u16, context: &'static str },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A send that was rejected before the transcript was touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    #[error("no conversation selected")]
    NoActiveConversation,
    #[error("a message is already being processed")]
    SendInFlight,
    #[error("the previous failed send has not been rolled back")]
    RollbackPending,
    #[error("message is empty")]
    EmptyMessage,
}

/// Why a send did not complete.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error("transport failed: {0}")]
    Transport(#[from] ApiError),
    #[error("council failed: {0}")]
    Stage(String),
    #[error("stream ended before the council finished")]
    StreamEnded,
}

impl SendError {
    /// Whether the optimistic user/assistant pair was appended and then removed.
    ///
    /// Precondition failures never reach the transcript.
    pub fn rolled_back(&self) -> bool {
        !matches!(self, SendError::Precondition(_))
    }
}
