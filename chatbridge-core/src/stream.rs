//! Incremental parser for the agent's `data:` event stream.
//!
//! Fed one line at a time. Each `data:` line holds a JSON fragment whose
//! `event` field selects what happens:
//! - `message`: append `answer`, adopt `conversation_id` when present
//! - `message_end`: capture `metadata`
//! - `error`: fail the whole parse with the remote `message`
//! - anything else: ignored
//!
//! `data: [DONE]` ends the stream. Lines without the `data:` prefix (blank
//! separators, `event:` names, comments) are skipped. A parser is created per
//! response and consumed by `finish`.

use serde::Deserialize;

use crate::agent::AgentReply;
use crate::error::{BridgeError, Result};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Accumulating,
    Ended,
    Errored,
}

/// What the caller should do after feeding a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Continue,
    Done,
}

#[derive(Debug, Deserialize)]
struct StreamFragment {
    event: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug)]
pub struct StreamParser {
    state: StreamState,
    text: String,
    conversation_id: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            state: StreamState::Accumulating,
            text: String::new(),
            conversation_id: None,
            metadata: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn feed_line(&mut self, line: &str) -> Result<Feed> {
        match self.state {
            StreamState::Accumulating => {}
            StreamState::Ended => return Ok(Feed::Done),
            StreamState::Errored => {
                return Err(BridgeError::AgentProtocol(
                    "stream already failed".to_string(),
                ))
            }
        }

        let Some(payload) = line.trim().strip_prefix(DATA_PREFIX) else {
            return Ok(Feed::Continue);
        };
        let payload = payload.trim();

        if payload == DONE_SENTINEL {
            self.state = StreamState::Ended;
            return Ok(Feed::Done);
        }
        if payload.is_empty() {
            return Ok(Feed::Continue);
        }

        let fragment: StreamFragment = match serde_json::from_str(payload) {
            Ok(f) => f,
            Err(e) => {
                return Err(self.fail(format!("invalid stream fragment: {}", e)));
            }
        };

        match fragment.event.as_deref() {
            Some("message") => {
                if let Some(answer) = fragment.answer {
                    self.text.push_str(&answer);
                }
                if let Some(id) = fragment.conversation_id.filter(|id| !id.is_empty()) {
                    self.conversation_id = Some(id);
                }
            }
            Some("message_end") => {
                if fragment.metadata.is_some() {
                    self.metadata = fragment.metadata;
                }
            }
            Some("error") => {
                let message = fragment
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string());
                return Err(self.fail(message));
            }
            other => {
                tracing::trace!(event = ?other, "Ignoring stream event");
            }
        }

        Ok(Feed::Continue)
    }

    /// Consume the parser. A stream that closed without `[DONE]` still yields what arrived.
    pub fn finish(self) -> Result<AgentReply> {
        match self.state {
            StreamState::Errored => Err(BridgeError::AgentProtocol(
                "stream failed".to_string(),
            )),
            StreamState::Accumulating | StreamState::Ended => Ok(AgentReply {
                conversation_id: self.conversation_id,
                text: self.text,
                metadata: self.metadata,
            }),
        }
    }

    fn fail(&mut self, message: String) -> BridgeError {
        self.state = StreamState::Errored;
        self.text.clear();
        self.metadata = None;
        BridgeError::AgentProtocol(message)
    }
}
