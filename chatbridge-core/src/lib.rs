pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sessions;
pub mod stream;

pub use agent::{AgentClient, AgentRegistry, AgentReply, AgentRequest};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use models::{AgentConfig, AgentVariant, ConversationSession};
pub use sessions::{
    MemorySessionRepository, SessionRepository, SessionStore, SqliteSessionRepository,
};
pub use stream::{StreamParser, StreamState};
