//! Star Shop Janitor — prunes expired pool usage samples on a fixed period.
//!
//! Runs beside the API server against the same SQLite file. Referral and user
//! rows are never touched; only `usage_stats` older than 24 hours is removed.

use eyre::Result;
use starshop_core::{Settings, telemetry};
use starshop_storage::Store;

/// The janitor issues one statement per period; a single connection is enough.
const JANITOR_POOL_SIZE: usize = 1;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let settings = Settings::from_env()?;

    tracing::info!(
        database = %settings.database_path,
        interval_secs = settings.cleanup_interval_secs,
        "Starting Star Shop Janitor"
    );

    let store = Store::open(&settings.database_path, JANITOR_POOL_SIZE).await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(settings.cleanup_interval());

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down gracefully…");
                break;
            }
            _ = ticker.tick() => {
                match store.cleanup_old_stats().await {
                    Ok(removed) => tracing::info!(removed, "Pruned usage samples"),
                    Err(e) => tracing::error!(error = %e, "Cleanup failed, retrying next period"),
                }
            }
        }
    }

    tracing::info!("Janitor stopped.");
    Ok(())
}
