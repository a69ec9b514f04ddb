//! Client for the remote conversational agent.
//!
//! One `invoke` is: optional attachment upload (`POST /files/upload`), then
//! `POST /chat-messages`, then response parsing chosen by the configured
//! `AgentVariant`:
//! - **Agent** streams `data:` events, parsed by [`StreamParser`]
//! - **Chatbot** answers with a single JSON document
//! - **TextGenerator** / **Workflow** are rejected with `UnsupportedAgentType`
//!
//! Non-2xx answers become `AgentHttp` before any shape parsing.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::models::{AgentConfig, AgentVariant, ResponseMode, DEFAULT_AGENT_KEY};
use crate::stream::{Feed, StreamParser};

/// Query sent when the user only sent an attachment; the agent rejects an empty query.
pub const PLACEHOLDER_QUERY: &str = ".";

/// Longest single stream line accepted before the response is rejected.
const MAX_STREAM_LINE: usize = 1024 * 1024;

// ============================================================================
// Request / reply types
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub conversation_id: Option<String>,
    pub query: String,
    pub attachment: Option<Bytes>,
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// Ignore `conversation_id` and open a new remote conversation.
    pub start_as_new: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AgentReply {
    pub conversation_id: Option<String>,
    pub text: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ChatMessagePayload {
    pub inputs: serde_json::Map<String, serde_json::Value>,
    pub query: String,
    pub response_mode: ResponseMode,
    pub user: String,
    pub auto_generate_name: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileReference>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReference {
    #[serde(rename = "type")]
    pub kind: String,
    pub transfer_method: String,
    pub upload_file_id: String,
}

impl FileReference {
    pub fn uploaded_image(upload_file_id: String) -> Self {
        Self {
            kind: "image".to_string(),
            transfer_method: "local_file".to_string(),
            upload_file_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BlockingResponse {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

// ============================================================================
// AgentClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client,
    config: AgentConfig,
    variant: AgentVariant,
    verbose: bool,
}

impl AgentClient {
    pub fn new(
        config: AgentConfig,
        variant: AgentVariant,
        timeout: Duration,
        verbose: bool,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, config, variant, verbose))
    }

    pub fn with_client(
        client: Client,
        mut config: AgentConfig,
        variant: AgentVariant,
        verbose: bool,
    ) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            client,
            config,
            variant,
            verbose,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn variant(&self) -> AgentVariant {
        self.variant
    }

    /// Build the `/chat-messages` body. `upload_file_id` is the result of a prior upload.
    pub fn build_payload(
        &self,
        request: &AgentRequest,
        upload_file_id: Option<String>,
    ) -> ChatMessagePayload {
        let mut query = request.query.clone();
        let files = match upload_file_id {
            Some(id) => {
                if query.is_empty() {
                    query = PLACEHOLDER_QUERY.to_string();
                }
                vec![FileReference::uploaded_image(id)]
            }
            None => Vec::new(),
        };

        let conversation_id = if request.start_as_new {
            None
        } else {
            request
                .conversation_id
                .clone()
                .filter(|id| !id.is_empty())
        };

        ChatMessagePayload {
            inputs: request.inputs.clone(),
            query,
            response_mode: self.variant.response_mode(),
            user: self.config.user.clone(),
            auto_generate_name: false,
            conversation_id,
            files,
        }
    }

    pub async fn invoke(&self, request: AgentRequest) -> Result<AgentReply> {
        if matches!(
            self.variant,
            AgentVariant::TextGenerator | AgentVariant::Workflow
        ) {
            tracing::warn!(variant = %self.variant, "Agent variant is not supported");
            return Err(BridgeError::UnsupportedAgentType(self.variant));
        }

        let upload_file_id = match &request.attachment {
            Some(bytes) => Some(self.upload(bytes.clone()).await?),
            None => None,
        };

        let payload = self.build_payload(&request, upload_file_id);
        if self.verbose {
            tracing::info!(
                payload = %serde_json::to_string(&payload).unwrap_or_default(),
                "Request to agent"
            );
        }

        let url = format!("{}/chat-messages", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        let response = self.check_status(response).await?;

        match self.variant {
            AgentVariant::Agent => self.read_stream(response).await,
            AgentVariant::Chatbot => self.read_document(response).await,
            AgentVariant::TextGenerator | AgentVariant::Workflow => {
                Err(BridgeError::UnsupportedAgentType(self.variant))
            }
        }
    }

    /// Upload an image attachment and return the agent's file id.
    pub async fn upload(&self, image: Bytes) -> Result<String> {
        let part = Part::bytes(image.to_vec())
            .file_name("image.png")
            .mime_str("image/png")
            .map_err(|e| BridgeError::Upload(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("user", self.config.user.clone());

        let url = format!("{}/files/upload", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BridgeError::Upload(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::Upload(e.to_string()))?;
        if self.verbose {
            tracing::info!(status = status.as_u16(), body = %body, "File upload response");
        }
        if !status.is_success() {
            return Err(BridgeError::Upload(format!(
                "upload returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let upload: UploadResponse = serde_json::from_str(&body)
            .map_err(|e| BridgeError::Upload(format!("invalid upload response: {}", e)))?;
        Ok(upload.id)
    }

    async fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string));
        tracing::error!(
            status = status.as_u16(),
            message = detail.as_deref().unwrap_or(""),
            body = %body,
            "Error response from agent"
        );
        Err(BridgeError::AgentHttp {
            status: status.as_u16(),
            body,
        })
    }

    async fn read_document(&self, response: Response) -> Result<AgentReply> {
        let body = response.text().await?;
        if self.verbose {
            tracing::info!(body = %body, "Response from agent");
        }
        let doc: BlockingResponse = serde_json::from_str(&body)
            .map_err(|e| BridgeError::AgentProtocol(format!("invalid response document: {}", e)))?;
        Ok(AgentReply {
            conversation_id: doc.conversation_id.filter(|id| !id.is_empty()),
            text: doc.answer.unwrap_or_default(),
            metadata: doc.metadata,
        })
    }

    async fn read_stream(&self, response: Response) -> Result<AgentReply> {
        let body = response.bytes_stream().map_err(|e| {
            if e.is_timeout() {
                std::io::Error::new(std::io::ErrorKind::TimedOut, e)
            } else {
                std::io::Error::other(e)
            }
        });
        let mut lines = FramedRead::new(
            StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_STREAM_LINE),
        );

        let mut parser = StreamParser::new();
        while let Some(line) = lines.next().await {
            let line = line.map_err(stream_error)?;
            if self.verbose {
                tracing::debug!(line = %line, "Chunk from agent");
            }
            if parser.feed_line(&line)? == Feed::Done {
                break;
            }
        }
        parser.finish()
    }
}

fn stream_error(e: LinesCodecError) -> BridgeError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            BridgeError::AgentProtocol("stream line too long".to_string())
        }
        LinesCodecError::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            BridgeError::AgentTimeout
        }
        LinesCodecError::Io(io) => BridgeError::Transport(io.to_string()),
    }
}

// ============================================================================
// AgentRegistry
// ============================================================================

/// Agent clients keyed by `agent_key`, with a guaranteed `"default"` entry.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    default: AgentClient,
    named: HashMap<String, AgentClient>,
}

impl AgentRegistry {
    pub fn new(mut clients: HashMap<String, AgentClient>) -> Result<Self> {
        let default = clients.remove(DEFAULT_AGENT_KEY).ok_or_else(|| {
            BridgeError::Argument(format!("agent '{}' must be configured", DEFAULT_AGENT_KEY))
        })?;
        Ok(Self {
            default,
            named: clients,
        })
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.agent.timeout_seconds))
            .build()?;
        let clients = config
            .agents
            .iter()
            .map(|(key, agent)| {
                (
                    key.clone(),
                    AgentClient::with_client(
                        client.clone(),
                        agent.clone(),
                        config.agent.variant,
                        config.agent.verbose,
                    ),
                )
            })
            .collect();
        Self::new(clients)
    }

    /// Client for `agent_key`, falling back to `"default"` for unknown keys.
    pub fn resolve(&self, agent_key: &str) -> &AgentClient {
        if agent_key == DEFAULT_AGENT_KEY {
            return &self.default;
        }
        match self.named.get(agent_key) {
            Some(client) => client,
            None => {
                tracing::debug!(agent_key, "Unknown agent key, using default");
                &self.default
            }
        }
    }

    /// Configured keys other than `"default"`, sorted.
    pub fn named_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.named.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, agent_key: &str) -> bool {
        agent_key == DEFAULT_AGENT_KEY || self.named.contains_key(agent_key)
    }
}

// ============================================================================
// TESTS
// ============================================================================
