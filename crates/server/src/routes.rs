use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use mediatrend_core::config::{Configuration, TargetSettings};
use mediatrend_core::error::ApiError;
use mediatrend_core::platform::{COMMON_COUNTRIES, PLATFORMS, Strategy, TOP_COUNTS};
use mediatrend_core::types::JobKey;
use mediatrend_db::repo::runs::{self, RunRow, RunTitleRow};
use mediatrend_targets::adapter::{QualityProfile, RootFolder};
use mediatrend_targets::radarr::Radarr;
use mediatrend_targets::sonarr::Sonarr;
use mediatrend_targets::{TargetAdapter, TargetError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::error::AppError;
use crate::logs::LogLine;
use crate::scheduler::{JobView, SchedulerError};
use crate::state::{AppState, ServerEvent};

pub fn build_router(state: AppState) -> Router {
    let public = Router::new().route("/health", get(health));
    Router::new()
        .merge(public.clone())
        .nest("/api/v1", public.merge(api_router(state.clone())))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/platforms", get(list_platforms))
        .route("/constants", get(constants))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{key}/run", post(run_job))
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/logs", get(recent_logs))
        .route("/events", get(sse_events))
        .route("/targets/{kind}/profiles", post(target_profiles))
        .route("/targets/{kind}/folders", post(target_folders))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_basic_auth,
        ))
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    sqlx::query("SELECT 1")
        .execute(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("database check failed: {e}")))?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    scheduler: &'static str,
    started_at: DateTime<Utc>,
    jobs: usize,
    enabled_jobs: usize,
    running_jobs: Vec<String>,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let views = state.scheduler.job_views();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        scheduler: if state.scheduler.is_stopped() {
            "stopped"
        } else {
            "running"
        },
        started_at: state.started_at,
        jobs: views.len(),
        enabled_jobs: views.iter().filter(|v| v.enabled && v.source_enabled).count(),
        running_jobs: state
            .scheduler
            .running_jobs()
            .iter()
            .map(|k| k.to_string())
            .collect(),
    })
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

async fn get_settings(State(state): State<AppState>) -> Json<Configuration> {
    Json(state.config.redacted().await)
}

async fn put_settings(
    State(state): State<AppState>,
    Json(incoming): Json<Configuration>,
) -> Result<Json<Configuration>, AppError> {
    let mut saved = state.config.update(incoming).await.map_err(|e| {
        tracing::warn!(error = %e, "settings update rejected");
        ApiError::from(e)
    })?;
    let _ = state.events.send(ServerEvent::SettingsChanged {
        revision: state.config.revision(),
    });
    saved.auth.password.clear();
    Ok(Json(saved))
}

#[derive(Serialize)]
struct PlatformInfo {
    id: &'static str,
    name: &'static str,
    slug: &'static str,
    strategy: Strategy,
    enabled: bool,
}

async fn list_platforms(State(state): State<AppState>) -> Json<Vec<PlatformInfo>> {
    let cfg = state.config.snapshot().await;
    Json(
        PLATFORMS
            .iter()
            .map(|p| PlatformInfo {
                id: p.id,
                name: p.name,
                slug: p.slug,
                strategy: p.strategy,
                enabled: cfg.source_enabled(p.id),
            })
            .collect(),
    )
}

async fn constants() -> Json<Value> {
    Json(json!({
        "countries": COMMON_COUNTRIES,
        "top_counts": TOP_COUNTS,
        "media_types": ["movie", "series"],
    }))
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobView>> {
    Json(state.scheduler.job_views())
}

async fn run_job(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let job: JobKey = key
        .parse()
        .map_err(|_| ApiError::NotFound(format!("job '{key}' not found")))?;

    state.scheduler.run_now(&job).map_err(|e| match e {
        SchedulerError::JobNotFound(_) => ApiError::NotFound(e.to_string()),
        SchedulerError::AlreadyRunning(_)
        | SchedulerError::Disabled(_)
        | SchedulerError::ShuttingDown => ApiError::Conflict(e.to_string()),
    })?;

    tracing::info!(job = %job, "manual run requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job": job.to_string(), "status": "accepted" })),
    ))
}

// ---------------------------------------------------------------------------
// Run history
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RunsQuery {
    limit: Option<i64>,
    job: Option<String>,
}

#[derive(Serialize)]
struct RunCounts {
    added: i64,
    already_present: i64,
    unresolved: i64,
    failed: i64,
}

#[derive(Serialize)]
struct RunFailure {
    kind: String,
    message: String,
}

#[derive(Serialize)]
struct RunResponse {
    id: String,
    job: String,
    platform: String,
    media_type: String,
    country: String,
    trigger: String,
    status: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    counts: RunCounts,
    failure: Option<RunFailure>,
}

impl From<RunRow> for RunResponse {
    fn from(r: RunRow) -> Self {
        Self {
            id: r.id,
            job: r.job_key,
            platform: r.platform,
            media_type: r.media_type,
            country: r.country,
            trigger: r.trigger,
            status: r.status,
            started_at: DateTime::from_timestamp(r.started_ts, 0),
            finished_at: r.finished_ts.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            counts: RunCounts {
                added: r.added,
                already_present: r.already_present,
                unresolved: r.unresolved,
                failed: r.failed,
            },
            failure: r.failure_kind.map(|kind| RunFailure {
                kind,
                message: r.failure_message.unwrap_or_default(),
            }),
        }
    }
}

#[derive(Serialize)]
struct RunTitleResponse {
    rank: i64,
    raw_title: String,
    status: String,
    tmdb_id: Option<i64>,
    tvdb_id: Option<i64>,
    canonical_title: Option<String>,
    year: Option<i64>,
    failure_kind: Option<String>,
    reason: Option<String>,
}

impl From<RunTitleRow> for RunTitleResponse {
    fn from(t: RunTitleRow) -> Self {
        Self {
            rank: t.rank,
            raw_title: t.raw_title,
            status: t.status,
            tmdb_id: t.tmdb_id,
            tvdb_id: t.tvdb_id,
            canonical_title: t.canonical_title,
            year: t.year,
            failure_kind: t.failure_kind,
            reason: t.reason,
        }
    }
}

#[derive(Serialize)]
struct RunDetailResponse {
    #[serde(flatten)]
    run: RunResponse,
    titles: Vec<RunTitleResponse>,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(q): Query<RunsQuery>,
) -> Result<Json<Vec<RunResponse>>, AppError> {
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    let rows = runs::list_runs(&state.db, q.job.as_deref(), limit).await?;
    Ok(Json(rows.into_iter().map(RunResponse::from).collect()))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunDetailResponse>, AppError> {
    let run = runs::get_run(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("run '{id}' not found")))?;
    let titles = runs::list_run_titles(&state.db, &id).await?;
    Ok(Json(RunDetailResponse {
        run: run.into(),
        titles: titles.into_iter().map(RunTitleResponse::from).collect(),
    }))
}

// ---------------------------------------------------------------------------
// Logs and events
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn recent_logs(
    State(state): State<AppState>,
    Query(q): Query<LogsQuery>,
) -> Json<Vec<LogLine>> {
    Json(state.logs.recent(q.limit.unwrap_or(200).min(500)))
}

async fn sse_events(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.events.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(evt) => {
                    let event_type = match &evt {
                        ServerEvent::JobStarted { .. } => "job_started",
                        ServerEvent::JobFinished { .. } => "job_finished",
                        ServerEvent::SettingsChanged { .. } => "settings_changed",
                        ServerEvent::Heartbeat { .. } => "heartbeat",
                    };
                    if let Ok(data) = serde_json::to_string(&evt) {
                        yield Ok(Event::default().event(event_type).data(data));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    yield Ok(Event::default()
                        .event("error")
                        .data(format!(r#"{{"lagged":{n}}}"#)));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

// ---------------------------------------------------------------------------
// Target lookups for the settings form
// ---------------------------------------------------------------------------

/// Connection details to test. Blank fields fall back to the saved settings.
#[derive(Deserialize, Default)]
#[serde(default)]
struct TargetConnection {
    url: String,
    api_key: String,
}

async fn connect_target(
    state: &AppState,
    kind: &str,
    conn: TargetConnection,
) -> Result<Arc<dyn TargetAdapter>, ApiError> {
    let cfg = state.config.snapshot().await;
    let saved = match kind {
        "radarr" => &cfg.radarr,
        "sonarr" => &cfg.sonarr,
        _ => return Err(ApiError::NotFound(format!("unknown target '{kind}'"))),
    };
    let settings = TargetSettings {
        url: if conn.url.trim().is_empty() { saved.url.clone() } else { conn.url },
        api_key: if conn.api_key.trim().is_empty() {
            saved.api_key.clone()
        } else {
            conn.api_key
        },
        ..saved.clone()
    };

    let adapter: Arc<dyn TargetAdapter> = if kind == "radarr" {
        Arc::new(Radarr::new(&settings).map_err(target_error)?)
    } else {
        Arc::new(Sonarr::new(&settings).map_err(target_error)?)
    };
    Ok(adapter)
}

fn target_error(e: TargetError) -> ApiError {
    match e {
        TargetError::NotConfigured(_) => ApiError::BadRequest("url and api_key are required".into()),
        other => ApiError::BadGateway(other.to_string()),
    }
}

async fn target_profiles(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(conn): Json<TargetConnection>,
) -> Result<Json<Vec<QualityProfile>>, AppError> {
    let adapter = connect_target(&state, &kind, conn).await?;
    let profiles = adapter.quality_profiles().await.map_err(target_error)?;
    Ok(Json(profiles))
}

async fn target_folders(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(conn): Json<TargetConnection>,
) -> Result<Json<Vec<RootFolder>>, AppError> {
    let adapter = connect_target(&state, &kind, conn).await?;
    let folders = adapter.root_folders().await.map_err(target_error)?;
    Ok(Json(folders))
}
