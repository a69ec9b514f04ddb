//! Extension points of the pipeline.
//!
//! Every hook is a function-valued field with a working default, so a
//! `Hooks::defaults(..)` value runs the full message flow untouched and a
//! caller overrides only what it needs through the `with_*` / `on_*` setters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chatbridge_core::{BridgeError, ConversationSession};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};

use super::pipeline::Bridge;
use super::reply;
use crate::line::{ContentKind, EventKind, InboundEvent, MessageContent, MessagingClient, ReplyMessage};

/// A failure while handling an event, carrying the session if one had been loaded.
#[derive(Debug)]
pub struct HandlerError {
    pub error: BridgeError,
    pub session: Option<ConversationSession>,
}

impl HandlerError {
    pub fn with_session(error: BridgeError, session: &ConversationSession) -> Self {
        Self {
            error,
            session: Some(session.clone()),
        }
    }
}

impl From<BridgeError> for HandlerError {
    fn from(error: BridgeError) -> Self {
        Self {
            error,
            session: None,
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// Output of a message parser: the query text and an optional binary attachment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedContent {
    pub text: String,
    pub attachment: Option<Bytes>,
}

impl ParsedContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }
}

pub type HandlerResult = Result<Vec<ReplyMessage>, HandlerError>;

pub type Validator =
    Arc<dyn Fn(InboundEvent) -> BoxFuture<'static, Result<Vec<ReplyMessage>, BridgeError>> + Send + Sync>;
pub type EventHandler =
    Arc<dyn Fn(Arc<Bridge>, InboundEvent) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
pub type MessageParser =
    Arc<dyn Fn(MessageContent) -> BoxFuture<'static, Result<ParsedContent, BridgeError>> + Send + Sync>;
pub type InputsBuilder = Arc<dyn Fn(&ConversationSession) -> Map<String, Value> + Send + Sync>;
pub type ReplyBuilder =
    Arc<dyn Fn(&str, Option<&Value>, &ConversationSession) -> Vec<ReplyMessage> + Send + Sync>;
pub type ErrorReplyBuilder = Arc<
    dyn Fn(&InboundEvent, &BridgeError, Option<&ConversationSession>) -> Result<Vec<ReplyMessage>, BridgeError>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct Hooks {
    pub(crate) validate_event: Validator,
    pub(crate) event_handlers: HashMap<EventKind, EventHandler>,
    pub(crate) default_handler: EventHandler,
    pub(crate) message_parsers: HashMap<ContentKind, MessageParser>,
    pub(crate) make_inputs: InputsBuilder,
    pub(crate) to_reply_message: ReplyBuilder,
    pub(crate) to_error_message: ErrorReplyBuilder,
}

impl Hooks {
    /// Built-in behavior. `messaging` downloads image content for the image parser.
    pub fn defaults(messaging: MessagingClient) -> Self {
        let mut event_handlers: HashMap<EventKind, EventHandler> = HashMap::new();
        event_handlers.insert(
            EventKind::Message,
            Arc::new(|bridge: Arc<Bridge>, event: InboundEvent| {
                Bridge::handle_message_event(bridge, event).boxed()
            }),
        );

        let mut message_parsers: HashMap<ContentKind, MessageParser> = HashMap::new();
        message_parsers.insert(
            ContentKind::Text,
            Arc::new(|content: MessageContent| async move { parse_text(&content) }.boxed()),
        );
        message_parsers.insert(ContentKind::Image, image_parser(messaging));
        message_parsers.insert(
            ContentKind::Sticker,
            Arc::new(|content: MessageContent| async move { Ok::<_, BridgeError>(parse_sticker(&content)) }.boxed()),
        );
        message_parsers.insert(
            ContentKind::Location,
            Arc::new(|content: MessageContent| async move { Ok::<_, BridgeError>(parse_location(&content)) }.boxed()),
        );

        Self {
            validate_event: Arc::new(|_: InboundEvent| async { Ok::<_, BridgeError>(Vec::new()) }.boxed()),
            event_handlers,
            default_handler: Arc::new(|_: Arc<Bridge>, event: InboundEvent| {
                async move {
                    tracing::debug!(event_kind = %event.kind, "No handler for event kind");
                    Ok::<_, HandlerError>(Vec::new())
                }
                .boxed()
            }),
            message_parsers,
            make_inputs: Arc::new(|_: &ConversationSession| Map::new()),
            to_reply_message: Arc::new(reply::default_reply),
            to_error_message: Arc::new(
                |_: &InboundEvent, _: &BridgeError, _: Option<&ConversationSession>| {
                    Ok(reply::error_reply())
                },
            ),
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validate_event = validator;
        self
    }

    pub fn on_event(mut self, kind: EventKind, handler: EventHandler) -> Self {
        self.event_handlers.insert(kind, handler);
        self
    }

    /// Handler for event kinds without a dedicated entry.
    pub fn with_default_handler(mut self, handler: EventHandler) -> Self {
        self.default_handler = handler;
        self
    }

    pub fn on_content(mut self, kind: ContentKind, parser: MessageParser) -> Self {
        self.message_parsers.insert(kind, parser);
        self
    }

    pub fn with_inputs(mut self, builder: InputsBuilder) -> Self {
        self.make_inputs = builder;
        self
    }

    pub fn with_reply_builder(mut self, builder: ReplyBuilder) -> Self {
        self.to_reply_message = builder;
        self
    }

    pub fn with_error_builder(mut self, builder: ErrorReplyBuilder) -> Self {
        self.to_error_message = builder;
        self
    }

    pub(crate) fn handler_for(&self, kind: &EventKind) -> EventHandler {
        self.event_handlers
            .get(kind)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_handler))
    }

    pub(crate) fn parser_for(&self, kind: &ContentKind) -> Option<MessageParser> {
        self.message_parsers.get(kind).cloned()
    }
}

// ============================================================================
// Default message parsers
// ============================================================================

pub fn parse_text(content: &MessageContent) -> Result<ParsedContent, BridgeError> {
    Ok(ParsedContent::text(content.text.clone().unwrap_or_default()))
}

pub fn parse_sticker(content: &MessageContent) -> ParsedContent {
    let described = if content.keywords.is_empty() {
        content.sticker_id.clone().unwrap_or_default()
    } else {
        content.keywords.join(", ")
    };
    ParsedContent::text(format!("You received a sticker: {}", described))
}

pub fn parse_location(content: &MessageContent) -> ParsedContent {
    ParsedContent::text(format!(
        "My location: {} ({}, {})",
        content.address.as_deref().unwrap_or_default(),
        content.latitude.unwrap_or_default(),
        content.longitude.unwrap_or_default()
    ))
}

fn image_parser(messaging: MessagingClient) -> MessageParser {
    Arc::new(move |content: MessageContent| {
        let messaging = messaging.clone();
        async move {
            let bytes = messaging
                .fetch_content(&content.id)
                .await
                .map_err(BridgeError::from)?;
            Ok::<_, BridgeError>(ParsedContent {
                text: String::new(),
                attachment: Some(bytes),
            })
        }
        .boxed()
    })
}
