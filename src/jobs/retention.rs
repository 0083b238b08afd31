use anyhow::Result;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::infra::db::Db;

#[derive(Debug, Clone, Copy)]
pub struct RetentionSettings {
    pub retention_days: i64,
    pub sweep_interval: Duration,
    pub batch_size: i64,
}

/// Worker-mode loop: periodically delete notifications past the retention
/// window. Never exits on its own; sweep failures are logged and the loop
/// waits for the next tick.
pub async fn run(db: Db, settings: RetentionSettings) -> Result<()> {
    info!(
        retention_days = settings.retention_days,
        interval_seconds = settings.sweep_interval.as_secs(),
        "notification retention sweeper started"
    );
    loop {
        match sweep(&db, settings.retention_days, settings.batch_size).await {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, "expired notifications removed"),
            Err(err) => error!(error = ?err, "retention sweep failed"),
        }
        tokio::time::sleep(settings.sweep_interval).await;
    }
}

/// Delete everything older than the retention window, in batches so a large
/// backlog doesn't hold locks for long. Returns the number of rows removed.
pub async fn sweep(db: &Db, retention_days: i64, batch_size: i64) -> Result<u64> {
    let cutoff = OffsetDateTime::now_utc() - time::Duration::days(retention_days);
    let mut total = 0u64;

    loop {
        let result = sqlx::query(
            "DELETE FROM notifications WHERE id IN ( \
                 SELECT id FROM notifications WHERE created_at < $1 LIMIT $2)",
        )
        .bind(cutoff)
        .bind(batch_size)
        .execute(db.pool())
        .await?;

        total += result.rows_affected();
        if result.rows_affected() < batch_size as u64 {
            break;
        }
    }

    Ok(total)
}
