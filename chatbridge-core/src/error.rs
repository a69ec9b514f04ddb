use thiserror::Error;

use crate::models::AgentVariant;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Argument error: {0}")]
    Argument(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Agent HTTP error ({status}): {body}")]
    AgentHttp { status: u16, body: String },

    #[error("Agent protocol error: {0}")]
    AgentProtocol(String),

    #[error("Unsupported agent type: {0}")]
    UnsupportedAgentType(AgentVariant),

    #[error("Unhandled content kind: {0}")]
    UnhandledContentKind(String),

    #[error("Agent request timed out")]
    AgentTimeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BridgeError::AgentTimeout
        } else {
            BridgeError::Transport(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
