use std::sync::Arc;

use clap::Parser;
use chatbridge_core::BridgeConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "chatbridge.toml")]
    config: String,

    /// Check the session database and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match BridgeConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging
    let default_level = config
        .service
        .log_level
        .parse()
        .unwrap_or(tracing::Level::INFO);
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    // Open the session database
    let pool = match chatbridge_core::db::create_pool(&config.session).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to open session database: {}", e);
            std::process::exit(1);
        }
    };
    chatbridge_core::db::migrate(&pool).await?;

    if args.health {
        match chatbridge_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ SQLite session store ready: {}", v),
            Err(e) => {
                println!("❌ Session store check failed: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let bridge = Arc::new(chatbridge_server::build_bridge(&config, pool)?);

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    chatbridge_server::http::start_http_server(bridge, config.http.clone(), tx.subscribe()).await?;

    Ok(())
}
