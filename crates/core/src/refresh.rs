use crate::dedup::{self, assisted::AssistedDuplicateChecker};
use crate::domain::attack::{ArticleEnrichment, AttackRecord, RawCandidate};
use crate::llm::LlmClient;
use crate::normalize;
use crate::scrape::{article, leaderboard, FeedSource};
use anyhow::{ensure, Context};
use chrono::NaiveDate;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Article fetches per pause window. The feed host rate-limits aggressive
/// crawlers, so enrichment pauses after each batch.
const ARTICLE_BATCH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    Running,
    Completed,
    Failed,
}

impl RefreshStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshStatus::Running => "running",
            RefreshStatus::Completed => "completed",
            RefreshStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshOptions {
    /// Pause between article-fetch batches.
    pub article_pause: Duration,
    /// Cap on leaderboard entries processed, for bounded test runs.
    pub max_entries: Option<usize>,
    /// Scrape and dedup but skip the store entirely.
    pub dry_run: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            article_pause: Duration::from_secs(2),
            max_entries: None,
            dry_run: false,
        }
    }
}

/// Persistence seam for the refresh pipeline. The worker binds this to
/// Postgres; tests bind it to an in-memory store.
#[async_trait::async_trait]
pub trait AttackStore: Send + Sync {
    async fn existing_keys(&self) -> anyhow::Result<Vec<(String, NaiveDate)>>;
    async fn existing_records(&self) -> anyhow::Result<Vec<AttackRecord>>;
    async fn upsert_attacks(&self, records: &[AttackRecord]) -> anyhow::Result<u64>;
    async fn log_refresh_started(&self) -> anyhow::Result<Uuid>;
    async fn log_refresh_finished(
        &self,
        log_id: Uuid,
        status: RefreshStatus,
        message: &str,
        records_scraped: i64,
        duplicates: i64,
        records_inserted: i64,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub log_id: Option<Uuid>,
    pub status: RefreshStatus,
    pub message: String,
    pub records_scraped: usize,
    pub duplicates: usize,
    pub records_inserted: u64,
}

/// One full refresh run: scrape the leaderboard, enrich entries from their
/// article pages, normalize, dedup against the store, upsert, and record the
/// run in the refresh log. A failed run still writes its log row before the
/// error propagates.
pub async fn run_refresh(
    feed: &dyn FeedSource,
    store: &dyn AttackStore,
    llm: Option<&dyn LlmClient>,
    opts: &RefreshOptions,
) -> anyhow::Result<RefreshOutcome> {
    let log_id = if opts.dry_run {
        None
    } else {
        Some(store.log_refresh_started().await?)
    };

    match run_stages(feed, store, llm, opts).await {
        Ok(stages) => {
            let message = if stages.inserted == 0 && stages.duplicates > 0 {
                "all scraped records were already tracked".to_string()
            } else {
                format!("inserted {} new attack records", stages.inserted)
            };
            if let Some(log_id) = log_id {
                store
                    .log_refresh_finished(
                        log_id,
                        RefreshStatus::Completed,
                        &message,
                        stages.scraped as i64,
                        stages.duplicates as i64,
                        stages.inserted as i64,
                    )
                    .await?;
            }
            info!(
                scraped = stages.scraped,
                duplicates = stages.duplicates,
                inserted = stages.inserted,
                "refresh completed"
            );
            Ok(RefreshOutcome {
                log_id,
                status: RefreshStatus::Completed,
                message,
                records_scraped: stages.scraped,
                duplicates: stages.duplicates,
                records_inserted: stages.inserted,
            })
        }
        Err(err) => {
            if let Some(log_id) = log_id {
                let message = format!("{err:#}");
                if let Err(log_err) = store
                    .log_refresh_finished(log_id, RefreshStatus::Failed, &message, 0, 0, 0)
                    .await
                {
                    warn!(error = %format!("{log_err:#}"), "failed to record failed refresh");
                }
            }
            Err(err)
        }
    }
}

struct StageTotals {
    scraped: usize,
    duplicates: usize,
    inserted: u64,
}

async fn run_stages(
    feed: &dyn FeedSource,
    store: &dyn AttackStore,
    llm: Option<&dyn LlmClient>,
    opts: &RefreshOptions,
) -> anyhow::Result<StageTotals> {
    let html = feed
        .fetch_leaderboard()
        .await
        .context("failed to fetch leaderboard page")?;

    let mut fragments = leaderboard::scan_entries(&html);
    ensure!(
        !fragments.is_empty(),
        "leaderboard scan produced no entries; the page layout may have changed"
    );
    if let Some(max) = opts.max_entries {
        fragments.truncate(max);
    }
    let scraped = fragments.len();

    let today = chrono::Utc::now().date_naive();
    let candidates: Vec<RawCandidate> = fragments
        .iter()
        .filter_map(|fragment| {
            let parsed = leaderboard::parse_entry(fragment, feed.base_url(), today);
            if parsed.is_none() {
                debug!(text = %fragment.text, "skipping unparseable leaderboard entry");
            }
            parsed
        })
        .collect();
    ensure!(
        !candidates.is_empty(),
        "none of the scanned leaderboard entries could be parsed"
    );

    let records = enrich_and_normalize(feed, candidates, opts).await;

    let existing = store.existing_keys().await?;
    let existing_keys = dedup::existing_key_set(&existing);
    let (unique, exact_duplicates) = dedup::partition_new(records, &existing_keys);
    let mut duplicates = exact_duplicates.len();

    let unique = match llm {
        Some(llm) => {
            let existing_records = store.existing_records().await?;
            let checker = AssistedDuplicateChecker::new(llm);
            let mut kept = Vec::with_capacity(unique.len());
            for record in unique {
                let verdict = checker.check(&record, &existing_records).await;
                if verdict.is_duplicate {
                    debug!(
                        protocol = %record.protocol_name,
                        rationale = %verdict.rationale,
                        "assisted check flagged duplicate"
                    );
                    duplicates += 1;
                } else {
                    kept.push(record);
                }
            }
            kept
        }
        None => unique,
    };

    let before_merge = unique.len();
    let merged = dedup::merge_within_batch(unique);
    duplicates += before_merge - merged.len();

    let inserted = if merged.is_empty() || opts.dry_run {
        0
    } else {
        store
            .upsert_attacks(&merged)
            .await
            .context("failed to upsert attack records")?
    };

    Ok(StageTotals {
        scraped,
        duplicates,
        inserted,
    })
}

/// Fetch each candidate's article page (when it has one) and fold the
/// enrichment into a normalized record. Fetch and normalization failures skip
/// the entry and keep the run going.
async fn enrich_and_normalize(
    feed: &dyn FeedSource,
    candidates: Vec<RawCandidate>,
    opts: &RefreshOptions,
) -> Vec<AttackRecord> {
    let mut records = Vec::with_capacity(candidates.len());
    let mut fetches = 0usize;

    for candidate in candidates {
        let enrichment = match candidate.link.as_deref() {
            Some(url) => {
                if fetches > 0 && fetches % ARTICLE_BATCH == 0 && !opts.article_pause.is_zero() {
                    tokio::time::sleep(opts.article_pause).await;
                }
                fetches += 1;
                match feed.fetch_article(url).await {
                    Ok(html) => article::extract_enrichment(&html),
                    Err(err) => {
                        warn!(
                            url,
                            error = %format!("{err:#}"),
                            "article fetch failed, continuing without enrichment"
                        );
                        ArticleEnrichment::default()
                    }
                }
            }
            None => ArticleEnrichment::default(),
        };

        match normalize::finalize(&candidate, Some(&enrichment)) {
            Some(record) => records.push(record),
            None => {
                debug!(
                    protocol = %candidate.protocol_name,
                    "dropping candidate that failed normalization"
                );
            }
        }
    }
    records
}
