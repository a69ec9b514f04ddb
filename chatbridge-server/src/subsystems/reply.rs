//! Reply synthesis: turning agent output into outbound messages.

use std::sync::Arc;

use chatbridge_core::{AgentRegistry, ConversationSession};
use serde_json::Value;

use super::hooks::ReplyBuilder;
use crate::line::{ReplyMessage, Sender};

pub const ERROR_REPLY_TEXT: &str =
    "Sorry, something went wrong while handling your message. Please try again in a little while.";

/// One text message carrying `text`; nothing when the agent answered with an empty string.
pub fn default_reply(
    text: &str,
    _metadata: Option<&Value>,
    _session: &ConversationSession,
) -> Vec<ReplyMessage> {
    if text.is_empty() {
        return Vec::new();
    }
    vec![ReplyMessage::text(text)]
}

pub fn error_reply() -> Vec<ReplyMessage> {
    vec![ReplyMessage::text(ERROR_REPLY_TEXT)]
}

/// Reply builder that speaks as the agent selected by `session.agent_key`,
/// using its configured display name and icon.
pub fn persona_reply(agents: AgentRegistry) -> ReplyBuilder {
    Arc::new(
        move |text: &str, metadata: Option<&Value>, session: &ConversationSession| {
            let config = agents.resolve(&session.agent_key).config();
            if config.display_name.is_none() && config.icon_url.is_none() {
                return default_reply(text, metadata, session);
            }
            let sender = Sender {
                name: config.display_name.clone(),
                icon_url: config.icon_url.clone(),
            };
            default_reply(text, metadata, session)
                .into_iter()
                .map(|message| message.with_sender(sender.clone()))
                .collect()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbridge_core::{AgentClient, AgentConfig, AgentVariant};
    use std::collections::HashMap;

    fn registry() -> AgentRegistry {
        let client = reqwest::Client::new();
        let agent = |name: Option<&str>| AgentConfig {
            api_key: "k".to_string(),
            base_url: "http://localhost".to_string(),
            user: "u".to_string(),
            display_name: name.map(str::to_string),
            icon_url: name.map(|n| format!("https://example.com/{}.png", n)),
        };
        let mut clients = HashMap::new();
        clients.insert(
            "default".to_string(),
            AgentClient::with_client(client.clone(), agent(None), AgentVariant::Chatbot, false),
        );
        clients.insert(
            "tutor".to_string(),
            AgentClient::with_client(client, agent(Some("Tutor")), AgentVariant::Chatbot, false),
        );
        AgentRegistry::new(clients).unwrap()
    }

    #[test]
    fn test_default_reply() {
        let session = ConversationSession::new("U1");
        assert_eq!(
            default_reply("hi", None, &session),
            vec![ReplyMessage::text("hi")]
        );
        assert!(default_reply("", None, &session).is_empty());
    }

    #[test]
    fn test_persona_reply_uses_session_agent() {
        let build = persona_reply(registry());

        let mut session = ConversationSession::new("U1");
        session.agent_key = "tutor".to_string();
        let replies = build("hello", None, &session);
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            ReplyMessage::Text { sender, .. } => {
                let sender = sender.as_ref().unwrap();
                assert_eq!(sender.name.as_deref(), Some("Tutor"));
                assert_eq!(
                    sender.icon_url.as_deref(),
                    Some("https://example.com/Tutor.png")
                );
            }
        }

        // No persona configured for the default agent
        session.agent_key = "default".to_string();
        assert_eq!(build("hello", None, &session), vec![ReplyMessage::text("hello")]);
    }
}
