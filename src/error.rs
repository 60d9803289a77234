use thiserror::Error;

/// Everything that can go wrong on the chat path.
///
/// `Decode` and `Cancelled` are not failures of a turn: undecodable lines are
/// skipped, and cancellation is a normal way for a turn to end. They exist so
/// the streaming code can name what happened when it logs.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Network(#[from] reqwest::Error),

    #[error("API request failed with status {code} {reason}")]
    Status { code: u16, reason: String },

    #[error("unexpected response body: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("undecodable stream line: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("generation stopped by user")]
    Cancelled,

    #[error("no model selected")]
    NoModel,

    #[error("message is empty")]
    EmptyMessage,

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("could not serialize data: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ChatError {
    pub fn status(status: reqwest::StatusCode) -> Self {
        ChatError::Status {
            code: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        }
    }
}
