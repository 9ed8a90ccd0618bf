use crate::domain::attack::AttackRecord;
use crate::refresh::{AttackStore, RefreshStatus};
use anyhow::Context;
use chrono::NaiveDate;
use uuid::Uuid;

pub mod attacks;
pub mod lock;
pub mod refresh_log;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Postgres-backed store used by the worker.
#[derive(Debug, Clone)]
pub struct PgAttackStore {
    pool: sqlx::PgPool,
}

impl PgAttackStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AttackStore for PgAttackStore {
    async fn existing_keys(&self) -> anyhow::Result<Vec<(String, NaiveDate)>> {
        attacks::fetch_existing_keys(&self.pool).await
    }

    async fn existing_records(&self) -> anyhow::Result<Vec<AttackRecord>> {
        attacks::fetch_existing_records(&self.pool).await
    }

    async fn upsert_attacks(&self, records: &[AttackRecord]) -> anyhow::Result<u64> {
        attacks::upsert_attacks(&self.pool, records).await
    }

    async fn log_refresh_started(&self) -> anyhow::Result<Uuid> {
        refresh_log::insert_refresh_log(&self.pool).await
    }

    async fn log_refresh_finished(
        &self,
        log_id: Uuid,
        status: RefreshStatus,
        message: &str,
        records_scraped: i64,
        duplicates: i64,
        records_inserted: i64,
    ) -> anyhow::Result<()> {
        refresh_log::complete_refresh_log(
            &self.pool,
            log_id,
            status,
            message,
            records_scraped,
            duplicates,
            records_inserted,
        )
        .await
    }
}
