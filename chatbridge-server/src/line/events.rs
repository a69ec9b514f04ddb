//! Inbound webhook event model.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<InboundEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Postback,
    Follow,
    Unfollow,
    Join,
    Leave,
    Other(String),
}

impl EventKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "message" => EventKind::Message,
            "postback" => EventKind::Postback,
            "follow" => EventKind::Follow,
            "unfollow" => EventKind::Unfollow,
            "join" => EventKind::Join,
            "leave" => EventKind::Leave,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Message => f.write_str("message"),
            EventKind::Postback => f.write_str("postback"),
            EventKind::Follow => f.write_str("follow"),
            EventKind::Unfollow => f.write_str("unfollow"),
            EventKind::Join => f.write_str("join"),
            EventKind::Leave => f.write_str("leave"),
            EventKind::Other(kind) => f.write_str(kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Image,
    Sticker,
    Location,
    Video,
    Audio,
    File,
    Other(String),
}

impl ContentKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "text" => ContentKind::Text,
            "image" => ContentKind::Image,
            "sticker" => ContentKind::Sticker,
            "location" => ContentKind::Location,
            "video" => ContentKind::Video,
            "audio" => ContentKind::Audio,
            "file" => ContentKind::File,
            other => ContentKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Text => f.write_str("text"),
            ContentKind::Image => f.write_str("image"),
            ContentKind::Sticker => f.write_str("sticker"),
            ContentKind::Location => f.write_str("location"),
            ContentKind::Video => f.write_str("video"),
            ContentKind::Audio => f.write_str("audio"),
            ContentKind::File => f.write_str("file"),
            ContentKind::Other(kind) => f.write_str(kind),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type", default)]
    pub source_type: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub source: EventSource,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub webhook_event_id: Option<String>,
    #[serde(default)]
    pub message: Option<MessageContent>,
    #[serde(default)]
    pub postback: Option<Postback>,
}

impl InboundEvent {
    pub fn event_kind(&self) -> EventKind {
        EventKind::parse(&self.kind)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.source.user_id.as_deref()
    }

    /// Build a text message event, mostly useful for tests and replays.
    pub fn text_message(user_id: &str, reply_token: &str, text: &str) -> Self {
        Self {
            kind: "message".to_string(),
            reply_token: Some(reply_token.to_string()),
            source: EventSource {
                source_type: "user".to_string(),
                user_id: Some(user_id.to_string()),
                ..Default::default()
            },
            timestamp: 0,
            webhook_event_id: None,
            message: Some(MessageContent::text("m-0", text)),
            postback: None,
        }
    }
}

/// Message body. Which optional fields are set depends on `kind`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl MessageContent {
    pub fn content_kind(&self) -> ContentKind {
        ContentKind::parse(&self.kind)
    }

    pub fn text(id: &str, text: &str) -> Self {
        Self {
            kind: "text".to_string(),
            id: id.to_string(),
            text: Some(text.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Postback {
    pub data: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "destination": "Uxxxxxxxx",
        "events": [
            {
                "type": "message",
                "mode": "active",
                "timestamp": 1462629479859,
                "webhookEventId": "01FZ74A0TDDPYRVKNK77XKC3ZR",
                "replyToken": "nHuyWiB7yP5Zw52FIkcQobQuGDXCTA",
                "source": {"type": "user", "userId": "U4af4980629"},
                "message": {"id": "444573844083572737", "type": "text", "text": "Hello"}
            },
            {
                "type": "message",
                "replyToken": "r2",
                "timestamp": 1,
                "source": {"type": "user", "userId": "U2"},
                "message": {
                    "id": "3", "type": "sticker", "packageId": "446", "stickerId": "1988",
                    "stickerResourceType": "STATIC", "keywords": ["happy", "smile"]
                }
            },
            {
                "type": "message",
                "replyToken": "r3",
                "timestamp": 2,
                "source": {"type": "user", "userId": "U3"},
                "message": {
                    "id": "4", "type": "location", "title": "Office",
                    "address": "1-1 Chiyoda", "latitude": 35.68, "longitude": 139.76
                }
            },
            {
                "type": "postback",
                "replyToken": "r4",
                "timestamp": 3,
                "source": {"type": "user", "userId": "U4"},
                "postback": {"data": "action=menu"}
            },
            {
                "type": "unsend",
                "timestamp": 4,
                "source": {"type": "group", "groupId": "G1", "userId": "U5"},
                "unsend": {"messageId": "325708"}
            }
        ]
    }"#;

    #[test]
    fn test_decode_mixed_payload() {
        let payload: WebhookPayload = serde_json::from_str(PAYLOAD).unwrap();
        assert_eq!(payload.events.len(), 5);

        let text = &payload.events[0];
        assert_eq!(text.event_kind(), EventKind::Message);
        assert_eq!(text.user_id(), Some("U4af4980629"));
        assert_eq!(text.reply_token.as_deref(), Some("nHuyWiB7yP5Zw52FIkcQobQuGDXCTA"));
        let message = text.message.as_ref().unwrap();
        assert_eq!(message.content_kind(), ContentKind::Text);
        assert_eq!(message.text.as_deref(), Some("Hello"));

        let sticker = payload.events[1].message.as_ref().unwrap();
        assert_eq!(sticker.content_kind(), ContentKind::Sticker);
        assert_eq!(sticker.keywords, vec!["happy", "smile"]);

        let location = payload.events[2].message.as_ref().unwrap();
        assert_eq!(location.latitude, Some(35.68));

        assert_eq!(payload.events[3].event_kind(), EventKind::Postback);
        assert_eq!(payload.events[3].postback.as_ref().unwrap().data, "action=menu");

        let unsend = &payload.events[4];
        assert_eq!(unsend.event_kind(), EventKind::Other("unsend".to_string()));
        assert!(unsend.reply_token.is_none());
    }

    #[test]
    fn test_unknown_content_kind_is_preserved() {
        let content: MessageContent =
            serde_json::from_str(r#"{"id":"9","type":"video","duration":1000}"#).unwrap();
        assert_eq!(content.content_kind(), ContentKind::Video);
        let content: MessageContent =
            serde_json::from_str(r#"{"id":"9","type":"hologram"}"#).unwrap();
        assert_eq!(
            content.content_kind(),
            ContentKind::Other("hologram".to_string())
        );
        assert_eq!(content.content_kind().to_string(), "hologram");
    }
}
