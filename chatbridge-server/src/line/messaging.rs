//! Messaging API client: reply delivery and message content download.

use std::time::Duration;

use bytes::Bytes;
use chatbridge_core::config::LineConfig;
use reqwest::Client;
use serde::Serialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use super::MessagingError;

/// Most quick-reply buttons the platform accepts on one message.
pub const MAX_QUICK_REPLY_ITEMS: usize = 13;

// ============================================================================
// Outbound message model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReplyMessage {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sender: Option<Sender>,
        #[serde(rename = "quickReply", skip_serializing_if = "Option::is_none")]
        quick_reply: Option<QuickReply>,
    },
}

impl ReplyMessage {
    pub fn text(text: impl Into<String>) -> Self {
        ReplyMessage::Text {
            text: text.into(),
            sender: None,
            quick_reply: None,
        }
    }

    pub fn with_sender(self, new_sender: Sender) -> Self {
        match self {
            ReplyMessage::Text {
                text, quick_reply, ..
            } => ReplyMessage::Text {
                text,
                sender: Some(new_sender),
                quick_reply,
            },
        }
    }

    /// Attach quick-reply buttons, one per label, truncated to the platform limit.
    pub fn with_quick_replies<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: Vec<QuickReplyItem> = labels
            .into_iter()
            .take(MAX_QUICK_REPLY_ITEMS)
            .map(|label| QuickReplyItem::message(label.into()))
            .collect();
        match self {
            ReplyMessage::Text { text, sender, .. } => ReplyMessage::Text {
                text,
                sender,
                quick_reply: Some(QuickReply { items }),
            },
        }
    }

    pub fn text_body(&self) -> &str {
        match self {
            ReplyMessage::Text { text, .. } => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuickReply {
    pub items: Vec<QuickReplyItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuickReplyItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: MessageAction,
}

impl QuickReplyItem {
    /// A button that sends `label` back as a text message.
    pub fn message(label: String) -> Self {
        Self {
            kind: "action".to_string(),
            action: MessageAction {
                kind: "message".to_string(),
                text: label.clone(),
                label,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: &'a [ReplyMessage],
}

// ============================================================================
// MessagingClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct MessagingClient {
    client: Client,
    access_token: String,
    api_base: String,
    data_api_base: String,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl MessagingClient {
    pub fn new(config: &LineConfig) -> Result<Self, MessagingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            access_token: config.channel_access_token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            data_api_base: config.data_api_base.trim_end_matches('/').to_string(),
            max_retries: 3,
            retry_delay_ms: 200,
        })
    }

    /// Client pointed at a single base URL for both APIs (for testing / integration)
    pub fn with_base_url(access_token: &str, base_url: &str) -> Result<Self, MessagingError> {
        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(Self {
            client,
            access_token: access_token.to_string(),
            api_base: base_url.trim_end_matches('/').to_string(),
            data_api_base: base_url.trim_end_matches('/').to_string(),
            max_retries: 1,
            retry_delay_ms: 10,
        })
    }

    /// Send `messages` against a one-shot reply token. Never retried: a token is consumed on first use.
    pub async fn reply(
        &self,
        reply_token: &str,
        messages: &[ReplyMessage],
    ) -> Result<(), MessagingError> {
        let url = format!("{}/v2/bot/message/reply", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&ReplyRequest {
                reply_token,
                messages,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, "Reply API error");
            return Err(MessagingError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Download the binary content of a user-sent message (image, file, ...).
    pub async fn fetch_content(&self, message_id: &str) -> Result<Bytes, MessagingError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries);

        Retry::spawn(retry_strategy, || self.fetch_content_once(message_id))
            .await
            .inspect_err(|e| {
                tracing::error!(message_id, error = %e, "Content download failed");
            })
    }

    async fn fetch_content_once(&self, message_id: &str) -> Result<Bytes, MessagingError> {
        let url = format!("{}/v2/bot/message/{}/content", self.data_api_base, message_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MessagingError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?)
    }
}
