use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;
const DEFAULT_TOP_SIZE: i64 = 10;

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
    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match rekt_tracker_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let state = AppState { pool };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/attacks", get(list_attacks))
        .route("/attacks/summary", get(attacks_summary))
        .route("/attacks/top", get(top_attacks))
        .route("/refresh/status", get(refresh_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<PgPool>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct ApiAttack {
    protocol_name: String,
    attack_date: NaiveDate,
    attack_type: String,
    loss_amount_usd: f64,
    description: String,
    source_url: Option<String>,
    blockchain: Option<String>,
    data_source: String,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<i64>,
    offset: Option<i64>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    protocol: Option<String>,
    attack_type: Option<String>,
}

async fn list_attacks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ApiAttack>>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut qb = sqlx::QueryBuilder::new(
        "SELECT protocol_name, attack_date, attack_type, loss_amount_usd, description, \
                source_url, blockchain, data_source \
         FROM attacks WHERE 1=1",
    );
    if let Some(start) = params.start_date {
        qb.push(" AND attack_date >= ").push_bind(start);
    }
    if let Some(end) = params.end_date {
        qb.push(" AND attack_date <= ").push_bind(end);
    }
    if let Some(protocol) = params.protocol.as_deref().filter(|s| !s.trim().is_empty()) {
        qb.push(" AND protocol_name ILIKE ")
            .push_bind(format!("%{}%", protocol.trim()));
    }
    if let Some(attack_type) = params
        .attack_type
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        qb.push(" AND attack_type = ")
            .push_bind(attack_type.trim().to_lowercase());
    }
    qb.push(" ORDER BY attack_date DESC, loss_amount_usd DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows = qb
        .build_query_as::<ApiAttack>()
        .fetch_all(pool)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
struct AttacksSummary {
    total_attacks: i64,
    total_loss_usd: f64,
    average_loss_usd: f64,
    attacks_last_30_days: i64,
    loss_last_30_days_usd: f64,
    most_targeted_protocol: Option<String>,
    most_common_attack_type: Option<String>,
    by_attack_type: Vec<AttackTypeSummary>,
}

#[derive(Debug, Serialize)]
struct AttackTypeSummary {
    attack_type: String,
    count: i64,
    total_loss_usd: f64,
}

async fn attacks_summary(
    State(state): State<AppState>,
) -> Result<Json<AttacksSummary>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let (total_attacks, total_loss_usd): (i64, f64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(loss_amount_usd), 0) FROM attacks",
    )
    .fetch_one(pool)
    .await
    .map_err(internal_error)?;

    let (attacks_last_30_days, loss_last_30_days_usd): (i64, f64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(loss_amount_usd), 0) \
         FROM attacks WHERE attack_date >= CURRENT_DATE - INTERVAL '30 days'",
    )
    .fetch_one(pool)
    .await
    .map_err(internal_error)?;

    let most_targeted_protocol: Option<(String,)> = sqlx::query_as(
        "SELECT protocol_name FROM attacks \
         GROUP BY protocol_name \
         ORDER BY COUNT(*) DESC, SUM(loss_amount_usd) DESC \
         LIMIT 1",
    )
    .fetch_optional(pool)
    .await
    .map_err(internal_error)?;

    let by_type: Vec<(String, i64, f64)> = sqlx::query_as(
        "SELECT attack_type, COUNT(*), COALESCE(SUM(loss_amount_usd), 0) \
         FROM attacks GROUP BY attack_type \
         ORDER BY COALESCE(SUM(loss_amount_usd), 0) DESC",
    )
    .fetch_all(pool)
    .await
    .map_err(internal_error)?;

    let average_loss_usd = if total_attacks > 0 {
        total_loss_usd / total_attacks as f64
    } else {
        0.0
    };

    let most_common_attack_type = by_type
        .iter()
        .max_by_key(|(_, count, _)| *count)
        .map(|(attack_type, _, _)| attack_type.clone());

    Ok(Json(AttacksSummary {
        total_attacks,
        total_loss_usd,
        average_loss_usd,
        attacks_last_30_days,
        loss_last_30_days_usd,
        most_targeted_protocol: most_targeted_protocol.map(|(p,)| p),
        most_common_attack_type,
        by_attack_type: by_type
            .into_iter()
            .map(|(attack_type, count, total_loss_usd)| AttackTypeSummary {
                attack_type,
                count,
                total_loss_usd,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct TopParams {
    limit: Option<i64>,
}

async fn top_attacks(
    State(state): State<AppState>,
    Query(params): Query<TopParams>,
) -> Result<Json<Vec<ApiAttack>>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let limit = params
        .limit
        .unwrap_or(DEFAULT_TOP_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let rows = sqlx::query_as::<_, ApiAttack>(
        "SELECT protocol_name, attack_date, attack_type, loss_amount_usd, description, \
                source_url, blockchain, data_source \
         FROM attacks ORDER BY loss_amount_usd DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(internal_error)?;
    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
struct RefreshStatusResponse {
    id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: String,
    message: Option<String>,
    records_scraped: i64,
    duplicates_found: i64,
    records_inserted: i64,
}

async fn refresh_status(
    State(state): State<AppState>,
) -> Result<Json<RefreshStatusResponse>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let row: Option<(
        Uuid,
        DateTime<Utc>,
        Option<DateTime<Utc>>,
        String,
        Option<String>,
        i64,
        i64,
        i64,
    )> = sqlx::query_as(
        "SELECT id, started_at, finished_at, status, message, \
                records_scraped, duplicates_found, records_inserted \
         FROM refresh_logs ORDER BY started_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await
    .map_err(internal_error)?;

    let (
        id,
        started_at,
        finished_at,
        status,
        message,
        records_scraped,
        duplicates_found,
        records_inserted,
    ) = row.ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(RefreshStatusResponse {
        id,
        started_at,
        finished_at,
        status,
        message,
        records_scraped,
        duplicates_found,
        records_inserted,
    }))
}

fn internal_error(e: sqlx::Error) -> StatusCode {
    let err = anyhow::Error::new(e);
    sentry_anyhow::capture_anyhow(&err);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
