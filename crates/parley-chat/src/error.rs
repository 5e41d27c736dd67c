use thiserror::Error;

/// Error taxonomy for the coordination core. Everything caller-facing is
/// eventually wrapped into a single `exception` event carrying the status
/// marker from [`ChatError::status`] plus the display message.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed inbound payload. The connection stays open.
    #[error("{0}")]
    Protocol(String),

    /// Bad, expired, or missing credential. The connection is closed.
    #[error("{0}")]
    Auth(String),

    /// Referenced room or message does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Actor lacks rights: not a participant, not the author, not the creator.
    #[error("{0}")]
    Forbidden(String),

    /// Room-shape rule violation.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    pub fn status(&self) -> &'static str {
        match self {
            ChatError::Protocol(_) => "protocol",
            ChatError::Auth(_) => "auth",
            ChatError::NotFound(_) => "not_found",
            ChatError::Forbidden(_) => "forbidden",
            ChatError::Validation(_) => "validation",
            ChatError::Internal(_) => "internal",
        }
    }
}
