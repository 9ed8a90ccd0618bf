use anyhow::Context;

// Advisory locks are scoped to the Postgres session. This is a best-effort
// guard against overlapping refresh runs; the feed has one leaderboard, so a
// single fixed key suffices.
const REFRESH_LOCK_KEY: i64 = 0x5245_4B54; // "REKT"

pub async fn try_acquire_refresh_lock(pool: &sqlx::PgPool) -> anyhow::Result<bool> {
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(REFRESH_LOCK_KEY)
        .fetch_one(pool)
        .await
        .context("failed to acquire refresh advisory lock")?;
    Ok(acquired.0)
}

pub async fn release_refresh_lock(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(REFRESH_LOCK_KEY)
        .execute(pool)
        .await
        .context("failed to release refresh advisory lock")?;
    Ok(())
}
