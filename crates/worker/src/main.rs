use anyhow::Context;
use clap::Parser;
use rekt_tracker_core::llm::LlmClient;
use rekt_tracker_core::refresh::{RefreshOptions, RefreshStatus};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "rekt_tracker_worker")]
struct Args {
    /// Scrape and dedup, but do not touch the database.
    #[arg(long)]
    dry_run: bool,

    /// Also screen new records with the LLM duplicate judge.
    #[arg(long)]
    assisted: bool,

    /// Process at most this many leaderboard entries.
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = rekt_tracker_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let feed = rekt_tracker_core::scrape::RektFeedClient::from_settings(&settings)?;

    let llm: Option<rekt_tracker_core::llm::openai::OpenAiClient> = if args.assisted {
        Some(rekt_tracker_core::llm::openai::OpenAiClient::from_settings(
            &settings,
        )?)
    } else {
        None
    };

    let opts = RefreshOptions {
        max_entries: args.limit,
        dry_run: args.dry_run,
        ..RefreshOptions::default()
    };

    if args.dry_run {
        // No pool, no lock, no log rows; the in-memory stub satisfies the
        // store seam and run_refresh skips all writes anyway.
        let store = dry_run::NullStore;
        let outcome = rekt_tracker_core::refresh::run_refresh(
            &feed,
            &store,
            llm.as_ref().map(|c| c as &dyn LlmClient),
            &opts,
        )
        .await?;
        tracing::info!(
            dry_run = true,
            scraped = outcome.records_scraped,
            duplicates = outcome.duplicates,
            "dry run finished"
        );
        return Ok(());
    }

    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    rekt_tracker_core::storage::migrate(&pool).await?;

    let acquired = rekt_tracker_core::storage::lock::try_acquire_refresh_lock(&pool).await?;
    if !acquired {
        tracing::warn!("refresh lock not acquired; another run in progress");
        return Ok(());
    }

    let store = rekt_tracker_core::storage::PgAttackStore::new(pool.clone());
    let result = rekt_tracker_core::refresh::run_refresh(
        &feed,
        &store,
        llm.as_ref().map(|c| c as &dyn LlmClient),
        &opts,
    )
    .await;

    match &result {
        Ok(outcome) => {
            debug_assert_eq!(outcome.status, RefreshStatus::Completed);
            tracing::info!(
                log_id = ?outcome.log_id,
                scraped = outcome.records_scraped,
                duplicates = outcome.duplicates,
                inserted = outcome.records_inserted,
                message = %outcome.message,
                "refresh run finished"
            );
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(err);
            tracing::error!(error = %format!("{err:#}"), "refresh run failed");
        }
    }

    let _ = rekt_tracker_core::storage::lock::release_refresh_lock(&pool).await;
    result.map(|_| ())
}

fn init_sentry(
    settings: &rekt_tracker_core::config::Settings,
) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

mod dry_run {
    use chrono::NaiveDate;
    use rekt_tracker_core::domain::attack::AttackRecord;
    use rekt_tracker_core::refresh::{AttackStore, RefreshStatus};
    use uuid::Uuid;

    /// Store stub for --dry-run. run_refresh never writes on a dry run, and
    /// reads see an empty store, so every scraped record counts as new.
    pub struct NullStore;

    #[async_trait::async_trait]
    impl AttackStore for NullStore {
        async fn existing_keys(&self) -> anyhow::Result<Vec<(String, NaiveDate)>> {
            Ok(Vec::new())
        }

        async fn existing_records(&self) -> anyhow::Result<Vec<AttackRecord>> {
            Ok(Vec::new())
        }

        async fn upsert_attacks(&self, _records: &[AttackRecord]) -> anyhow::Result<u64> {
            anyhow::bail!("dry run must not write attacks")
        }

        async fn log_refresh_started(&self) -> anyhow::Result<Uuid> {
            anyhow::bail!("dry run must not write refresh logs")
        }

        async fn log_refresh_finished(
            &self,
            _log_id: Uuid,
            _status: RefreshStatus,
            _message: &str,
            _records_scraped: i64,
            _duplicates: i64,
            _records_inserted: i64,
        ) -> anyhow::Result<()> {
            anyhow::bail!("dry run must not write refresh logs")
        }
    }
}
