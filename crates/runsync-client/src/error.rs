use thiserror::Error;

use runsync_core::error::ProtocolError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The event stream failed to open, failed mid-read, or was aborted by
    /// the server.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The job-submission request failed.
    #[error("Trigger failed: {0}")]
    Trigger(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Run not found: {0}")]
    NotFound(String),

    #[error("Run {0} has not finished")]
    NotTerminal(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
