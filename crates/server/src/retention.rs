//! Daily pruning of old run history.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mediatrend_db::repo::runs;
use sqlx::SqlitePool;
use tracing::{debug, error, info};

use crate::config_store::ConfigStore;

pub const PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Delete finished runs older than `scheduler.history_retention_days`.
/// Returns the number of runs removed.
pub async fn prune_history(pool: &SqlitePool, store: &ConfigStore) -> Result<u64, sqlx::Error> {
    let days = store.snapshot().await.scheduler.history_retention_days;
    if days == 0 {
        debug!("run history retention disabled");
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
    let removed = runs::prune_finished_before(pool, cutoff).await?;
    if removed > 0 {
        info!(removed, retention_days = days, "pruned old run history");
    } else {
        debug!(retention_days = days, "no run history to prune");
    }
    Ok(removed)
}

/// Prune once at startup, then every [`PRUNE_INTERVAL`].
pub async fn run_loop(pool: SqlitePool, store: Arc<ConfigStore>) {
    let mut interval = tokio::time::interval(PRUNE_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = prune_history(&pool, &store).await {
            error!(error = %e, "run history cleanup failed");
        }
    }
}
