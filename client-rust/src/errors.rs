use crate::ConversationId;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// The request could not be sent, or the connection dropped while the
    /// response body was being read.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered with a non-OK status code. The message is the
    /// server's `message` field when present.
    #[error("Request failed: {1} (Status {0})")]
    RequestFailed(reqwest::StatusCode, String),
    /// The access token could not be refreshed. The session has been
    /// signed out by the time this is returned.
    #[error("Session expired: {0}")]
    AuthExpired(String),
    /// The server sent an `error` record on the response stream.
    #[error("Stream error: {0}")]
    Stream(String),
    /// A stream record was not valid UTF-8, not valid JSON, or not a known
    /// record kind.
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Stream for conversation {0} exceeded {1:?}")]
    StreamTimeout(ConversationId, Duration),
    #[error("Stream for conversation {0} was cancelled")]
    Cancelled(ConversationId),
    #[error("Conversation {0} is already streaming a response")]
    AlreadyStreaming(ConversationId),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ClientError {
    /// Whether the error terminated a response stream (as opposed to failing
    /// before the stream started).
    #[must_use]
    pub fn is_stream_error(&self) -> bool {
        matches!(
            self,
            Self::Stream(_) | Self::Parse(_) | Self::StreamTimeout(..) | Self::Cancelled(_)
        ) || matches!(self, Self::Transport(error) if error.is_body() || error.is_decode())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Failure of a [`crate::CredentialStorage`] backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid stored credential: {0}")]
    Format(#[from] serde_json::Error),
}
