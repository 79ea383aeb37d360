use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use citizen_registry_api::api;
use citizen_registry_api::config::Config;
use citizen_registry_api::db::{ConnectionManager, DnsResolver, FatalPolicy, MySqlConnector};
use citizen_registry_api::handlers::AppState;

/// Main entry point for the application.
///
/// Initializes logging, loads the configuration, starts the database
/// supervisor in the background and serves HTTP until Ctrl-C. The server
/// starts listening before the first probe pass finishes; requests made
/// meanwhile get 503.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "citizen_registry_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    let db = ConnectionManager::new(config.database.clone(), MySqlConnector::new(), DnsResolver);
    let supervisor = db.spawn_supervisor();
    tracing::info!(
        "Database supervisor started, fatal policy {:?}",
        config.database.retry.on_fatal
    );

    if config.database.retry.on_fatal == FatalPolicy::Exit {
        let watched = Arc::clone(&db);
        tokio::spawn(async move {
            watched.fatal().await;
            tracing::error!("Database unreachable and retries exhausted, exiting");
            std::process::exit(1);
        });
    }

    let app_state = Arc::new(AppState::new(Arc::clone(&db), config.clone()));
    let app = api::app(app_state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    tracing::info!("Shutting down");
    db.shutdown().await;
    if let Some(handle) = supervisor {
        let _ = handle.await;
    }

    Ok(())
}
