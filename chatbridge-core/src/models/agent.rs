use std::fmt;

use serde::{Deserialize, Serialize};

/// Response protocol the remote agent endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentVariant {
    /// Incremental `data:` event stream.
    #[default]
    Agent,
    /// One JSON document per request.
    Chatbot,
    TextGenerator,
    Workflow,
}

impl AgentVariant {
    pub fn response_mode(self) -> ResponseMode {
        match self {
            AgentVariant::Agent => ResponseMode::Streaming,
            _ => ResponseMode::Blocking,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentVariant::Agent => "agent",
            AgentVariant::Chatbot => "chatbot",
            AgentVariant::TextGenerator => "text_generator",
            AgentVariant::Workflow => "workflow",
        }
    }
}

impl fmt::Display for AgentVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Streaming,
    Blocking,
}

/// Credentials and endpoint for one named agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    pub api_key: String,
    pub base_url: String,
    /// Logical user id sent to the agent on every request.
    pub user: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
}
