pub mod agent;
pub mod session;

pub use agent::{AgentConfig, AgentVariant, ResponseMode};
pub use session::{ConversationSession, SessionRecord, DEFAULT_AGENT_KEY};
