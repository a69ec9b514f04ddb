pub mod http;
pub mod line;
pub mod subsystems;

use std::sync::Arc;

use chatbridge_core::{
    AgentRegistry, BridgeConfig, BridgeError, SessionStore, SqliteSessionRepository,
};
use sqlx::SqlitePool;

use line::{EventKind, MessagingClient};
use subsystems::hooks::Hooks;
use subsystems::{agent_switch, reply};

pub use subsystems::pipeline::Bridge;

/// Assemble a bridge from configuration over an already migrated pool.
///
/// Installs the default hooks, the persona reply builder, and the agent
/// switch handler when `agent_switch.enabled` is set.
pub fn build_bridge(config: &BridgeConfig, pool: SqlitePool) -> Result<Bridge, BridgeError> {
    let messaging = MessagingClient::new(&config.line)?;
    let agents = AgentRegistry::from_config(config)?;
    let sessions = SessionStore::new(
        Arc::new(SqliteSessionRepository::new(pool)),
        config.session.timeout_seconds,
    );

    let mut hooks = Hooks::defaults(messaging.clone())
        .with_reply_builder(reply::persona_reply(agents.clone()));
    if config.agent_switch.enabled {
        hooks = hooks.on_event(
            EventKind::Message,
            agent_switch::handler(config.agent_switch.trigger.clone()),
        );
    }

    tracing::info!(
        variant = %config.agent.variant,
        agents = config.agents.len(),
        serialize_per_user = config.session.serialize_per_user,
        agent_switch = config.agent_switch.enabled,
        "Bridge configured"
    );

    Ok(Bridge::new(
        config.line.channel_secret.clone(),
        messaging,
        agents,
        sessions,
        hooks,
    )
    .serialize_per_user(config.session.serialize_per_user)
    .verbose(config.agent.verbose))
}
