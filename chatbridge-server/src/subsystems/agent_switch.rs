//! Agent switching menu built on the session `state` field.
//!
//! Sending the trigger phrase puts the session into `selecting_agent` and
//! answers with one quick-reply button per named agent. The next text picks
//! the agent, or the menu is shown again when it names no configured agent.
//! Everything else falls through to the regular message flow.

use std::sync::Arc;

use chatbridge_core::ConversationSession;
use futures::FutureExt;

use super::hooks::{EventHandler, HandlerError, HandlerResult};
use super::pipeline::Bridge;
use crate::line::{ContentKind, InboundEvent, ReplyMessage};

pub const SELECTING_AGENT: &str = "selecting_agent";

/// Message-event handler that intercepts `trigger` and menu answers.
pub fn handler(trigger: impl Into<String>) -> EventHandler {
    let trigger = Arc::new(trigger.into());
    Arc::new(move |bridge: Arc<Bridge>, event: InboundEvent| {
        let trigger = Arc::clone(&trigger);
        async move { handle(bridge, event, &trigger).await }.boxed()
    })
}

async fn handle(bridge: Arc<Bridge>, event: InboundEvent, trigger: &str) -> HandlerResult {
    let text = event
        .message
        .as_ref()
        .filter(|message| message.content_kind() == ContentKind::Text)
        .map(|message| message.text.as_deref().unwrap_or_default().trim().to_string());
    let user_id = event.user_id().map(str::to_string);
    let (Some(text), Some(user_id)) = (text, user_id) else {
        return Bridge::handle_message_event(bridge, event).await;
    };

    let mut session = bridge.sessions().get(&user_id).await?;

    if text == trigger {
        session.state = Some(SELECTING_AGENT.to_string());
        save(&bridge, &mut session).await?;
        tracing::info!(user_id = %user_id, "Agent selection started");
        return Ok(vec![menu(&bridge, "Which agent would you like to talk to?")]);
    }

    if session.state.as_deref() != Some(SELECTING_AGENT) {
        return Bridge::handle_message_event(bridge, event).await;
    }

    if !bridge.agents().contains(&text) {
        return Ok(vec![menu(
            &bridge,
            "That agent does not exist. Please choose again.",
        )]);
    }

    // Continuity tokens belong to the agent that issued them.
    if session.agent_key != text {
        session.conversation_id = None;
    }
    session.agent_key = text.clone();
    session.state = None;
    save(&bridge, &mut session).await?;
    tracing::info!(user_id = %user_id, agent_key = %text, "Agent switched");

    let name = bridge
        .agents()
        .resolve(&text)
        .config()
        .display_name
        .clone()
        .unwrap_or_else(|| text.clone());
    Ok(vec![ReplyMessage::text(format!("Switched to '{}'.", name))])
}

async fn save(bridge: &Bridge, session: &mut ConversationSession) -> Result<(), HandlerError> {
    let result = bridge.sessions().set(session).await;
    result.map_err(|e| HandlerError::with_session(e, session))
}

fn menu(bridge: &Bridge, prompt: &str) -> ReplyMessage {
    ReplyMessage::text(prompt).with_quick_replies(bridge.agents().named_keys())
}
