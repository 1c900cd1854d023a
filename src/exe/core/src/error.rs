use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryLimitError {
    #[error("history limit must be at least {min} (one system slot plus two content slots), got {got}")]
    TooSmall { got: usize, min: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("LLM response had no content or tool_calls")]
    EmptyTurn,
}

/// Failure reported by a model transport. The turn is aborted; history keeps
/// the inbound messages.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn request(err: impl std::fmt::Display) -> Self {
        Self::Request(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}
