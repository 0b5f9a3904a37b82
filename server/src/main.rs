//! voicesync signaling server — entry point.

use anyhow::Result;
use tracing::info;
use voicesync_server::{config::Config, create_router, ServerState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voicesync_server=info,tower_http=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting voicesync signaling server");

    let state = ServerState::new();
    let app = create_router(state);

    let bind_address = match config.bind_address() {
        Ok(addr) => addr,
        Err(error) => {
            eprintln!("invalid bind address: {error}");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(bind_address).await {
        Ok(listener) => listener,
        Err(error) => {
            eprintln!("failed to bind {bind_address}: {error}");
            std::process::exit(1);
        }
    };
    info!(address = %bind_address, "listening");

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
        info!("received shutdown signal");
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("server shutdown complete");
    Ok(())
}
