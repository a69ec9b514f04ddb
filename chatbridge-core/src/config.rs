use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::models::{AgentConfig, AgentVariant, DEFAULT_AGENT_KEY};

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub line: LineConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    pub agents: HashMap<String, AgentConfig>,
    #[serde(default)]
    pub agent_switch: AgentSwitchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub webhook_path: String,
    pub admin_enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            webhook_path: "/linebot".to_string(),
            admin_enabled: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LineConfig {
    pub channel_access_token: String,
    pub channel_secret: String,
    #[serde(default = "default_line_api_base")]
    pub api_base: String,
    #[serde(default = "default_line_data_api_base")]
    pub data_api_base: String,
    #[serde(default = "default_line_timeout")]
    pub timeout_seconds: u64,
}

fn default_line_api_base() -> String {
    "https://api.line.me".to_string()
}

fn default_line_data_api_base() -> String {
    "https://api-data.line.me".to_string()
}

fn default_line_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub database_url: String,
    /// Idle seconds before a session soft-expires; `<= 0` disables time expiry.
    pub timeout_seconds: f64,
    pub serialize_per_user: bool,
    pub max_connections: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://sessions.db".to_string(),
            timeout_seconds: 3600.0,
            serialize_per_user: true,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentSettings {
    pub variant: AgentVariant,
    pub verbose: bool,
    pub timeout_seconds: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            variant: AgentVariant::Agent,
            verbose: false,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentSwitchConfig {
    pub enabled: bool,
    pub trigger: String,
}

impl Default for AgentSwitchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger: "switch agent".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load `path` (TOML) layered under `CHATBRIDGE__SECTION__KEY` env vars.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CHATBRIDGE").separator("__"))
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.agents.contains_key(DEFAULT_AGENT_KEY) {
            return Err(ConfigError::Message(format!(
                "agents.{} must be configured",
                DEFAULT_AGENT_KEY
            )));
        }
        Ok(())
    }
}
