//! Chat platform collaborators: webhook decoding, signature checks, and the
//! messaging API used to answer events.

pub mod events;
pub mod messaging;
pub mod signature;

use chatbridge_core::BridgeError;
use thiserror::Error;

pub use events::{
    ContentKind, EventKind, EventSource, InboundEvent, MessageContent, Postback, WebhookPayload,
};
pub use messaging::{MessagingClient, QuickReply, QuickReplyItem, ReplyMessage, Sender};
pub use signature::{sign, verify_signature, SIGNATURE_HEADER};

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Webhook decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Messaging transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Messaging API error {status}: {body}")]
    Api { status: u16, body: String },
}

impl From<MessagingError> for BridgeError {
    fn from(e: MessagingError) -> Self {
        BridgeError::Messaging(e.to_string())
    }
}

/// Verify `signature` against the raw body, then decode the events it carries.
pub fn parse_webhook(
    channel_secret: &str,
    body: &[u8],
    signature: &str,
) -> Result<Vec<InboundEvent>, MessagingError> {
    if !verify_signature(channel_secret, body, signature) {
        return Err(MessagingError::InvalidSignature);
    }
    let payload: WebhookPayload = serde_json::from_slice(body)?;
    Ok(payload.events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_webhook_checks_signature_first() {
        let body = br#"{"destination":"U0","events":[{"type":"follow","timestamp":1,"source":{"type":"user","userId":"U1"},"replyToken":"r"}]}"#;
        let sig = sign("secret", body).unwrap();

        let events = parse_webhook("secret", body, &sig).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_kind(), EventKind::Follow);

        assert!(matches!(
            parse_webhook("other", body, &sig),
            Err(MessagingError::InvalidSignature)
        ));
    }

    #[test]
    fn test_parse_webhook_rejects_malformed_body() {
        let body = b"not json";
        let sig = sign("secret", body).unwrap();
        assert!(matches!(
            parse_webhook("secret", body, &sig),
            Err(MessagingError::Decode(_))
        ));
    }

    #[test]
    fn test_messaging_error_converts_to_bridge_error() {
        let err: BridgeError = MessagingError::Api {
            status: 400,
            body: "bad".to_string(),
        }
        .into();
        assert!(matches!(err, BridgeError::Messaging(msg) if msg.contains("400")));
    }
}
