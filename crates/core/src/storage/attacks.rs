use crate::domain::attack::AttackRecord;
use anyhow::Context;
use chrono::NaiveDate;

pub async fn fetch_existing_keys(
    pool: &sqlx::PgPool,
) -> anyhow::Result<Vec<(String, NaiveDate)>> {
    let rows: Vec<(String, NaiveDate)> =
        sqlx::query_as("SELECT protocol_name, attack_date FROM attacks")
            .persistent(false)
            .fetch_all(pool)
            .await
            .context("fetch attack keys failed")?;
    Ok(rows)
}

pub async fn fetch_existing_records(pool: &sqlx::PgPool) -> anyhow::Result<Vec<AttackRecord>> {
    let rows: Vec<AttackRow> = sqlx::query_as(
        "SELECT protocol_name, attack_date, attack_type, loss_amount_usd, description, \
                source_url, blockchain, data_source \
         FROM attacks",
    )
    .persistent(false)
    .fetch_all(pool)
    .await
    .context("fetch attack records failed")?;
    Ok(rows.into_iter().map(AttackRow::into_record).collect())
}

/// Transactional batch upsert keyed on the record's natural identity. Batches
/// cut round trips to a remote database; re-upserting an existing identity
/// refreshes the mutable columns instead of erroring.
pub async fn upsert_attacks(
    pool: &sqlx::PgPool,
    records: &[AttackRecord],
) -> anyhow::Result<u64> {
    anyhow::ensure!(!records.is_empty(), "records must be non-empty");

    let chunk_size: usize = std::env::var("ATTACKS_UPSERT_BATCH")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100);
    anyhow::ensure!(chunk_size >= 1, "ATTACKS_UPSERT_BATCH must be >= 1");

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let mut affected: u64 = 0;
    let mut batch_idx: usize = 0;
    for chunk in records.chunks(chunk_size) {
        batch_idx += 1;
        let t0 = std::time::Instant::now();
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO attacks (protocol_name, attack_date, attack_type, loss_amount_usd, \
             description, source_url, blockchain, data_source) ",
        );
        qb.push_values(chunk, |mut b, record| {
            b.push_bind(record.protocol_name.trim())
                .push_bind(record.attack_date)
                .push_bind(&record.attack_type)
                .push_bind(record.loss_amount_usd)
                .push_bind(&record.description)
                .push_bind(&record.source_url)
                .push_bind(&record.blockchain)
                .push_bind(&record.data_source);
        });
        // Conflict target matches the attacks_identity_idx expression index.
        // A repeat sighting keeps the row but refreshes what we learned; links
        // and chains are never overwritten with nothing.
        qb.push(
            " ON CONFLICT (lower(trim(protocol_name)), attack_date) DO UPDATE \
               SET attack_type = EXCLUDED.attack_type, \
                   loss_amount_usd = EXCLUDED.loss_amount_usd, \
                   description = EXCLUDED.description, \
                   source_url = COALESCE(EXCLUDED.source_url, attacks.source_url), \
                   blockchain = COALESCE(EXCLUDED.blockchain, attacks.blockchain), \
                   updated_at = now()",
        );

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch upsert attacks failed")?;
        affected += res.rows_affected();

        tracing::debug!(
            batch_idx,
            batch_size = chunk.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "attacks batch upsert"
        );
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(affected)
}

#[derive(sqlx::FromRow)]
struct AttackRow {
    protocol_name: String,
    attack_date: NaiveDate,
    attack_type: String,
    loss_amount_usd: f64,
    description: String,
    source_url: Option<String>,
    blockchain: Option<String>,
    data_source: String,
}

impl AttackRow {
    fn into_record(self) -> AttackRecord {
        AttackRecord {
            protocol_name: self.protocol_name,
            attack_date: self.attack_date,
            attack_type: self.attack_type,
            loss_amount_usd: self.loss_amount_usd,
            description: self.description,
            source_url: self.source_url,
            blockchain: self.blockchain,
            data_source: self.data_source,
        }
    }
}
