//! Ferry daemon - keeps a local SQLite replica in sync with a backend.
//!
//! Configuration comes from `FERRY_*` environment variables (a `.env` file
//! is honoured). The process runs until Ctrl-C, then finishes the current
//! sync cycle and exits.

use ferry_client::{
    create_pool, run_migrations, Config, HttpRemote, ReachabilityMonitor, SyncContext, SyncEngine,
    SyncEvent,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_client=debug,ferry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        database = %config.database_path,
        remote = %config.remote_url,
        "Starting Ferry"
    );

    // Open the local database
    let pool = create_pool(&config.database_path).await?;

    tracing::info!("Running database migrations...");
    run_migrations(&pool).await?;

    let mut remote = HttpRemote::new(&config.remote_url, config.sync.request_timeout)?;
    if let Some(token) = &config.auth_token {
        remote = remote.with_auth_token(token);
    }

    let monitor = ReachabilityMonitor::new();
    let ctx = SyncContext::builder(pool, Arc::new(remote))
        .config(config.sync.clone())
        .build()
        .await?;

    let engine = Arc::new(SyncEngine::new(ctx, monitor.subscribe()));
    engine.recover().await?;

    // Surface what needs attention
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event listener lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                SyncEvent::OperationRejected(failed) | SyncEvent::OperationFailed(failed) => {
                    tracing::warn!(
                        op_id = %failed.operation.id,
                        entity = %failed.operation.entity,
                        reason = %failed.reason,
                        "Operation needs manual intervention"
                    );
                }
                SyncEvent::ConflictDeferred { conflict_id, conflict } => {
                    tracing::warn!(
                        conflict_id,
                        entity = %conflict.entity,
                        "Conflict awaiting resolution"
                    );
                }
                _ => {}
            }
        }
    });

    let handle = engine.spawn();
    tracing::info!(replica_id = %engine.replica_id(), "Sync engine running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    handle.shutdown().await;

    Ok(())
}
