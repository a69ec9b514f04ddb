//! chatbridge-cli: inspect a running bridge over its HTTP admin endpoints
//!
//! # Subcommands
//! - `status`                                 show server health
//! - `session show <user>`                    current session for a user
//! - `session expire <user>`                  start the user's next message in a new conversation
//! - `session history <user> [-n <count>]`    stored sessions, oldest first
//!
//! Session commands need `http.admin_enabled = true` on the server.

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
const DEFAULT_HISTORY: u32 = 10;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "chatbridge-cli",
    version,
    about = "Inspect and expire conversation sessions on a running chatbridge server"
)]
struct Cli {
    /// Chatbridge HTTP server URL (overrides CHATBRIDGE_HTTP_URL env var)
    #[arg(long, env = "CHATBRIDGE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print raw JSON instead of the human-readable summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server status
    Status,

    /// Inspect or expire a user's session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Debug, Subcommand)]
enum SessionAction {
    /// Show the user's current session
    Show { user_id: String },

    /// Expire the user's session
    Expire { user_id: String },

    /// List stored sessions for the user
    History {
        user_id: String,

        /// Maximum number of sessions to list
        #[arg(short = 'n', long, default_value_t = DEFAULT_HISTORY)]
        count: u32,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionView {
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub updated_at: String,
    #[serde(default)]
    pub agent_key: String,
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryView {
    pub user_id: String,
    pub count: usize,
    pub sessions: Vec<SessionView>,
}

/// One-line summary of a session.
pub fn format_session(s: &SessionView) -> String {
    format!(
        "{}  agent={}  conversation={}  state={}  updated={}",
        s.user_id,
        s.agent_key,
        s.conversation_id.as_deref().unwrap_or("-"),
        s.state.as_deref().unwrap_or("-"),
        s.updated_at
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?)
}

/// Send `request` and return the JSON body, exiting on transport or HTTP errors.
fn fetch(request: reqwest::blocking::RequestBuilder, url: &str) -> serde_json::Value {
    let resp = match request.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("chatbridge-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            eprintln!("chatbridge-cli: {} not found (is http.admin_enabled set?)", url);
        } else {
            eprintln!("chatbridge-cli: server returned {}: {}", status, body);
        }
        std::process::exit(1);
    }

    match resp.json() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("chatbridge-cli: failed to parse response from {}: {}", url, e);
            std::process::exit(1);
        }
    }
}

/// Show the server status by calling GET /health.
fn do_status(server: &str, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client()?.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            if json {
                println!("{}", serde_json::to_string_pretty(&body)?);
                return Ok(());
            }
            println!("Chatbridge server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:           {}", body["version"].as_str().unwrap_or("?"));
            println!("SQLite:            {}", body["sqlite"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("chatbridge-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("chatbridge-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn do_session(server: &str, action: SessionAction, json: bool) -> anyhow::Result<()> {
    let client = client()?;

    match action {
        SessionAction::Show { user_id } => {
            let url = format!("{}/sessions/{}", server, user_id);
            let body = fetch(client.get(&url), &url);
            if json {
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                let session: SessionView = serde_json::from_value(body)?;
                println!("{}", format_session(&session));
            }
        }
        SessionAction::Expire { user_id } => {
            let url = format!("{}/sessions/{}/expire", server, user_id);
            let body = fetch(client.post(&url), &url);
            if json {
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("Expired session for {}", user_id);
            }
        }
        SessionAction::History { user_id, count } => {
            let url = format!("{}/sessions/{}/history", server, user_id);
            let body = fetch(client.get(&url).query(&[("count", count)]), &url);
            if json {
                println!("{}", serde_json::to_string_pretty(&body)?);
                return Ok(());
            }
            let history: HistoryView = serde_json::from_value(body)?;
            if history.count == 0 {
                eprintln!("No stored sessions for: {}", history.user_id);
                return Ok(());
            }
            for session in &history.sessions {
                println!("{}", format_session(session));
            }
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Status => do_status(&server, cli.json),
        Commands::Session { action } => do_session(&server, action, cli.json),
    };

    if let Err(e) = result {
        eprintln!("chatbridge-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
