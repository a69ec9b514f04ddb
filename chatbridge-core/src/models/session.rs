use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent key every session starts with; it must always resolve to a config.
pub const DEFAULT_AGENT_KEY: &str = "default";

fn default_agent_key() -> String {
    DEFAULT_AGENT_KEY.to_string()
}

/// Per-user conversation state carried across turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_agent_key")]
    pub agent_key: String,
    pub state: Option<String>,
}

impl ConversationSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self::fresh(user_id, Utc::now())
    }

    /// A default session for `user_id` stamped at `now`.
    pub fn fresh(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: None,
            updated_at: now,
            agent_key: default_agent_key(),
            state: None,
        }
    }
}

/// Stored row: the session plus its soft-expiry mark.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SessionRecord {
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub is_expired: bool,
    pub agent_key: String,
    pub state: Option<String>,
}

impl SessionRecord {
    pub fn from_session(session: &ConversationSession) -> Self {
        Self {
            user_id: session.user_id.clone(),
            conversation_id: session.conversation_id.clone(),
            updated_at: session.updated_at,
            is_expired: false,
            agent_key: session.agent_key.clone(),
            state: session.state.clone(),
        }
    }

    pub fn into_session(self) -> ConversationSession {
        ConversationSession {
            user_id: self.user_id,
            conversation_id: self.conversation_id,
            updated_at: self.updated_at,
            agent_key: self.agent_key,
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_has_defaults() {
        let session = ConversationSession::new("U1");
        assert_eq!(session.user_id, "U1");
        assert!(session.conversation_id.is_none());
        assert_eq!(session.agent_key, DEFAULT_AGENT_KEY);
        assert!(session.state.is_none());
    }

    #[test]
    fn test_serde_round_trip_with_null_fields() {
        let session = ConversationSession::new("U1");
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"conversation_id\":null"));
        assert!(json.contains("\"state\":null"));

        let back: ConversationSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn test_serde_round_trip_with_values() {
        let mut session = ConversationSession::new("U2");
        session.conversation_id = Some("conv-9".to_string());
        session.agent_key = "support".to_string();
        session.state = Some("selecting_agent".to_string());

        let value = serde_json::to_value(&session).unwrap();
        let back: ConversationSession = serde_json::from_value(value).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn test_missing_agent_key_deserializes_to_default() {
        let json = r#"{"user_id":"U3","conversation_id":null,"updated_at":"2024-05-01T10:00:00Z","state":null}"#;
        let session: ConversationSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.agent_key, "default");
    }
}
