use crate::refresh::RefreshStatus;
use anyhow::Context;
use uuid::Uuid;

pub async fn insert_refresh_log(pool: &sqlx::PgPool) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO refresh_logs (id, status) VALUES ($1, $2)",
    )
    .persistent(false)
    .bind(id)
    .bind(RefreshStatus::Running.as_str())
    .execute(pool)
    .await
    .context("insert refresh_logs failed")?;
    Ok(id)
}

pub async fn complete_refresh_log(
    pool: &sqlx::PgPool,
    log_id: Uuid,
    status: RefreshStatus,
    message: &str,
    records_scraped: i64,
    duplicates: i64,
    records_inserted: i64,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE refresh_logs \
         SET finished_at = now(), status = $2, message = $3, \
             records_scraped = $4, duplicates_found = $5, records_inserted = $6 \
         WHERE id = $1",
    )
    .persistent(false)
    .bind(log_id)
    .bind(status.as_str())
    .bind(message)
    .bind(records_scraped)
    .bind(duplicates)
    .bind(records_inserted)
    .execute(pool)
    .await
    .with_context(|| format!("update refresh_logs failed (id={log_id})"))?;
    Ok(())
}
