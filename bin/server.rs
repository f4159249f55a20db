// Seller Queue - Web Server
// REST API + change feed with Axum

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use seller_queue::api::{self, AppState};
use seller_queue::{open_database, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Optional config path as the only argument
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    println!("🌐 Seller Queue - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_database(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    println!("✓ Database opened: {}", config.database_path.display());

    let session_ttl = Duration::from_secs(config.session_ttl_secs);
    let app = api::router(AppState::new(conn, session_ttl));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    println!("\n🚀 Server running on http://{}", config.bind_addr);
    println!("   API:    http://{}/api/health", config.bind_addr);
    println!("   Events: http://{}/api/events", config.bind_addr);
    println!("\n   Press Ctrl+C to stop\n");
    info!(addr = %config.bind_addr, version = seller_queue::VERSION, "server started");

    axum::serve(listener, app).await.context("Server stopped with an error")?;

    Ok(())
}
