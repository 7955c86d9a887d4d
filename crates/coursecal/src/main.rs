use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, Level};

use coursecal::config::ServiceConfig;
use coursecal::server::create_router;
use coursecal::types::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => ServiceConfig::load(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ServiceConfig::default(),
    };

    let level: Level = config
        .log_level
        .parse()
        .with_context(|| format!("invalid log level {:?}", config.log_level))?;
    tracing_subscriber::fmt().with_max_level(level).init();

    let address = config.bind_address();
    let state = Arc::new(AppState::new(config));
    info!(
        schools = ?state.registry.keys().collect::<Vec<_>>(),
        "Starting coursecal on {}",
        address
    );

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
