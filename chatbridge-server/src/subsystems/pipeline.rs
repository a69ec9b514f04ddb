//! Pipeline orchestrator.
//!
//! Each inbound event moves through
//! `Decoded → Validated → Routed → Handled → Concluded(Replied | Errored)`.
//! Events of one delivery run strictly in order, and each event's replies are
//! sent before the next event starts.
//!
//! Error isolation:
//! - a failure from validation onward produces exactly one call to the error
//!   reply hook, with the session if the handler had loaded one
//! - a failure inside that hook is logged and the event gets no reply
//! - sending is a separate step; a send failure is logged and never fed back
//!   into error handling

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chatbridge_core::{
    AgentRegistry, AgentReply, AgentRequest, BridgeError, ConversationSession, SessionStore,
};
use futures::FutureExt;
use uuid::Uuid;

use super::hooks::{HandlerError, HandlerResult, Hooks, ParsedContent};
use super::locks::UserLocks;
use crate::line::{parse_webhook, InboundEvent, MessagingClient, MessagingError, ReplyMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Decoded,
    Validated,
    Routed,
    Handled,
    Replied,
    Errored,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Decoded => "decoded",
            Stage::Validated => "validated",
            Stage::Routed => "routed",
            Stage::Handled => "handled",
            Stage::Replied => "replied",
            Stage::Errored => "errored",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Bridge {
    channel_secret: String,
    messaging: MessagingClient,
    agents: AgentRegistry,
    sessions: SessionStore,
    hooks: Hooks,
    locks: Option<UserLocks>,
    verbose: bool,
}

impl Bridge {
    pub fn new(
        channel_secret: impl Into<String>,
        messaging: MessagingClient,
        agents: AgentRegistry,
        sessions: SessionStore,
        hooks: Hooks,
    ) -> Self {
        Self {
            channel_secret: channel_secret.into(),
            messaging,
            agents,
            sessions,
            hooks,
            locks: Some(UserLocks::new()),
            verbose: false,
        }
    }

    /// Hold a per-user lock around each event's handler so that two deliveries
    /// for the same user cannot interleave their session read and write.
    pub fn serialize_per_user(mut self, enabled: bool) -> Self {
        self.locks = enabled.then(UserLocks::new);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn messaging(&self) -> &MessagingClient {
        &self.messaging
    }

    pub fn channel_secret(&self) -> &str {
        &self.channel_secret
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Verify and decode one webhook delivery, then run and answer each event in order.
    /// Returns the number of events processed.
    pub async fn process_request(
        self: &Arc<Self>,
        body: &[u8],
        signature: &str,
    ) -> Result<usize, MessagingError> {
        let events = parse_webhook(&self.channel_secret, body, signature)?;
        let count = events.len();
        self.process_events(events).await;
        Ok(count)
    }

    pub async fn process_events(self: &Arc<Self>, events: Vec<InboundEvent>) {
        let delivery_id = Uuid::new_v4();
        tracing::info!(%delivery_id, events = events.len(), "Processing webhook delivery");

        for event in events {
            tracing::debug!(
                %delivery_id,
                event_kind = %event.kind,
                stage = %Stage::Decoded,
                "Event decoded"
            );
            let replies = self.process_event(event.clone()).await;
            self.send_replies(&event, &replies).await;
        }
    }

    /// Run one event through validation, routing and handling. Never fails:
    /// errors are turned into replies by the error hook.
    pub async fn process_event(self: &Arc<Self>, event: InboundEvent) -> Vec<ReplyMessage> {
        let kind = event.event_kind();

        match (self.hooks.validate_event)(event.clone()).await {
            Ok(replies) if !replies.is_empty() => {
                tracing::debug!(event_kind = %kind, "Validation answered the event");
                return replies;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(event_kind = %kind, error = %e, "Event validation failed");
                return self.error_replies(&event, &e, None);
            }
        }
        tracing::debug!(event_kind = %kind, stage = %Stage::Validated, "Event validated");

        let _guard = match (&self.locks, event.user_id()) {
            (Some(locks), Some(user_id)) => Some(locks.acquire(user_id).await),
            _ => None,
        };

        let handler = self.hooks.handler_for(&kind);
        tracing::debug!(event_kind = %kind, stage = %Stage::Routed, "Event routed");

        let outcome = AssertUnwindSafe(handler(Arc::clone(self), event.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(replies)) => {
                tracing::debug!(
                    event_kind = %kind,
                    stage = %Stage::Handled,
                    replies = replies.len(),
                    "Event handled"
                );
                replies
            }
            Ok(Err(HandlerError { error, session })) => {
                tracing::error!(
                    event_kind = %kind,
                    user_id = event.user_id().unwrap_or_default(),
                    session_loaded = session.is_some(),
                    error = %error,
                    "Event handler failed"
                );
                self.error_replies(&event, &error, session.as_ref())
            }
            Err(_) => {
                tracing::error!(event_kind = %kind, "Event handler panicked");
                let error = BridgeError::Other("event handler panicked".to_string());
                self.error_replies(&event, &error, None)
            }
        }
    }

    // ========================================================================
    // Built-in message handler
    // ========================================================================

    /// Default handler for message events: parse content, load the session,
    /// converse with the agent, persist the continuity token, build replies.
    pub async fn handle_message_event(self: Arc<Self>, event: InboundEvent) -> HandlerResult {
        if self.verbose {
            tracing::info!(
                event = %serde_json::to_string(&event).unwrap_or_default(),
                "Request from platform"
            );
        }

        let message = event.message.clone().ok_or_else(|| {
            BridgeError::Argument("message event carries no message".to_string())
        })?;
        let user_id = event
            .user_id()
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Argument("event source has no user id".to_string()))?;

        let content_kind = message.content_kind();
        let parser = self
            .hooks
            .parser_for(&content_kind)
            .ok_or_else(|| BridgeError::UnhandledContentKind(content_kind.to_string()))?;
        let parsed = parser(message).await?;

        let mut session = self.sessions.get(&user_id).await?;

        let result = self.converse(&mut session, parsed).await;
        let reply = result.map_err(|e| HandlerError::with_session(e, &session))?;

        let replies = (self.hooks.to_reply_message)(&reply.text, reply.metadata.as_ref(), &session);
        if self.verbose {
            tracing::info!(
                user_id = %user_id,
                replies = %serde_json::to_string(&replies).unwrap_or_default(),
                "Response to platform"
            );
        }
        Ok(replies)
    }

    /// Invoke the agent selected by the session and store the continuity token it returns.
    pub async fn converse(
        &self,
        session: &mut ConversationSession,
        parsed: ParsedContent,
    ) -> Result<AgentReply, BridgeError> {
        let inputs = (self.hooks.make_inputs)(session);
        let agent = self.agents.resolve(&session.agent_key);

        let reply = agent
            .invoke(AgentRequest {
                conversation_id: session.conversation_id.clone(),
                query: parsed.text,
                attachment: parsed.attachment,
                inputs,
                start_as_new: false,
            })
            .await?;

        session.conversation_id = reply.conversation_id.clone();
        self.sessions.set(session).await?;
        Ok(reply)
    }

    // ========================================================================
    // Conclusion
    // ========================================================================

    fn error_replies(
        &self,
        event: &InboundEvent,
        error: &BridgeError,
        session: Option<&ConversationSession>,
    ) -> Vec<ReplyMessage> {
        let hook = &self.hooks.to_error_message;
        match std::panic::catch_unwind(AssertUnwindSafe(|| hook(event, error, session))) {
            Ok(Ok(replies)) => {
                tracing::debug!(stage = %Stage::Errored, replies = replies.len(), "Error replies built");
                replies
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, original = %error, "Error reply hook failed");
                Vec::new()
            }
            Err(_) => {
                tracing::error!(original = %error, "Error reply hook panicked");
                Vec::new()
            }
        }
    }

    /// Send `replies` with the event's reply token. Returns whether anything was delivered.
    pub async fn send_replies(&self, event: &InboundEvent, replies: &[ReplyMessage]) -> bool {
        if replies.is_empty() {
            return false;
        }
        let Some(reply_token) = event.reply_token.as_deref() else {
            tracing::debug!(event_kind = %event.kind, "Event has no reply token, dropping replies");
            return false;
        };

        match self.messaging.reply(reply_token, replies).await {
            Ok(()) => {
                tracing::debug!(stage = %Stage::Replied, count = replies.len(), "Replies sent");
                true
            }
            Err(e) => {
                tracing::error!(
                    event_kind = %event.kind,
                    user_id = event.user_id().unwrap_or_default(),
                    error = %e,
                    "Failed to send replies"
                );
                false
            }
        }
    }
}
