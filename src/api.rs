//! HTTP surface. `/cron/*` is called by the external scheduler with
//! `Authorization: Bearer $CRON_SECRET`; `/admin/*` serves the review
//! dashboard with `Bearer $ADMIN_TOKEN`. `/health` is open.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use shuttle_axum::axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::campaign::{ReadinessReport, ScheduledCheck, TransitionOutcome};
use crate::engine::{CurationEngine, DailyReport};
use crate::error::CurationError;
use crate::model::{Campaign, CandidateArticle, ExternalEvent, SectionKind, Selection};
use crate::reconcile::SyncReport;
use crate::scoring::PipelineReport;
use crate::selector::SelectionOutcome;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CurationEngine>,
    pub cron_secret: Option<String>,
    pub admin_token: Option<String>,
}

impl AppState {
    /// Secrets from `CRON_SECRET` and `ADMIN_TOKEN`; empty values count as unset.
    pub fn from_env(engine: Arc<CurationEngine>) -> Self {
        let read = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        Self {
            engine,
            cron_secret: read("CRON_SECRET"),
            admin_token: read("ADMIN_TOKEN"),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cron = Router::new()
        .route("/sync-events", get(cron_sync_events).post(cron_sync_events))
        .route("/daily", get(cron_daily).post(cron_daily))
        .route("/review-check", get(cron_review_check).post(cron_review_check))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_cron));

    let admin = Router::new()
        .route("/sync-events", post(admin_sync_events))
        .route("/campaigns/{date}", post(admin_ensure_campaign))
        .route("/campaigns/{date}/readiness", get(admin_readiness))
        .route("/campaigns/{date}/articles", get(admin_articles))
        .route("/campaigns/{date}/process", post(admin_process))
        .route("/campaigns/{date}/select", post(admin_select_all))
        .route("/campaigns/{date}/sections/{section}/select", post(admin_select_section))
        .route("/campaigns/{date}/sections/{section}/reselect", post(admin_reselect))
        .route("/campaigns/{date}/sections/{section}/deselect", post(admin_deselect))
        .route("/campaigns/{date}/sections/{section}/restore", post(admin_restore))
        .route("/campaigns/{date}/submit", post(admin_submit))
        .route("/campaigns/{date}/approve", post(admin_approve))
        .route("/campaigns/{date}/sent", post(admin_mark_sent))
        .route("/campaigns/{date}/archive", post(admin_archive))
        .route("/articles/{id}/force-include", post(admin_force_include))
        .route("/events/{id}/flags", post(admin_event_flags))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/cron", cron)
        .nest("/admin", admin)
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ------------------------------------------------------------
// Auth
// ------------------------------------------------------------

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn check_bearer(expected: Option<&str>, headers: &HeaderMap, scope: &str) -> Result<(), Response> {
    let Some(expected) = expected else {
        tracing::warn!(target: "api", scope, "secret not configured; rejecting");
        return Err(error_response(StatusCode::UNAUTHORIZED, "unauthorized", "secret not configured"));
    };
    match bearer(headers) {
        Some(got) if got == expected => Ok(()),
        _ => Err(error_response(StatusCode::UNAUTHORIZED, "unauthorized", "missing or invalid bearer token")),
    }
}

async fn require_cron(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match check_bearer(state.cron_secret.as_deref(), req.headers(), "cron") {
        Ok(()) => next.run(req).await,
        Err(resp) => resp,
    }
}

async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match check_bearer(state.admin_token.as_deref(), req.headers(), "admin") {
        Ok(()) => next.run(req).await,
        Err(resp) => resp,
    }
}

// ------------------------------------------------------------
// Errors
// ------------------------------------------------------------

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "error": { "code": code, "message": message } }))).into_response()
}

pub struct ApiError(CurationError);

impl From<CurationError> for ApiError {
    fn from(e: CurationError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            CurationError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CurationError::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition"),
            CurationError::CapacityExceeded { .. } => (StatusCode::CONFLICT, "capacity_exceeded"),
            CurationError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            CurationError::SourceUnavailable { .. } => (StatusCode::BAD_GATEWAY, "source_unavailable"),
            CurationError::MalformedResponse(_) => (StatusCode::BAD_GATEWAY, "malformed_response"),
            CurationError::TransientSource(_) => (StatusCode::SERVICE_UNAVAILABLE, "transient_source"),
            CurationError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store"),
        };
        if status.is_server_error() {
            tracing::error!(target: "api", error = %self.0, "request failed");
        }
        let mut body = json!({ "error": { "code": code, "message": self.0.to_string() } });
        if let CurationError::SourceUnavailable { report } = &self.0 {
            body["report"] = serde_json::to_value(report.as_ref()).unwrap_or_default();
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_section(s: &str) -> Result<SectionKind, ApiError> {
    SectionKind::parse(s).ok_or_else(|| ApiError(CurationError::Validation(format!("unknown section {s}"))))
}

// ------------------------------------------------------------
// Cron
// ------------------------------------------------------------

async fn cron_sync_events(State(state): State<AppState>) -> ApiResult<SyncReport> {
    Ok(Json(state.engine.sync_events(None, Utc::now()).await?))
}

#[derive(Debug, Deserialize)]
struct DateQuery {
    date: Option<NaiveDate>,
}

async fn cron_daily(State(state): State<AppState>, Query(q): Query<DateQuery>) -> ApiResult<DailyReport> {
    let now = Utc::now();
    let date = q.date.unwrap_or_else(|| state.engine.next_campaign_date(now));
    Ok(Json(state.engine.run_daily(date, now).await?))
}

async fn cron_review_check(State(state): State<AppState>) -> ApiResult<ScheduledCheck> {
    Ok(Json(state.engine.run_scheduled_review_check(Utc::now()).await?))
}

// ------------------------------------------------------------
// Admin
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SyncRange {
    start: NaiveDate,
    end: NaiveDate,
}

async fn admin_sync_events(State(state): State<AppState>, Json(r): Json<SyncRange>) -> ApiResult<SyncReport> {
    Ok(Json(state.engine.sync_events(Some((r.start, r.end)), Utc::now()).await?))
}

async fn admin_ensure_campaign(State(state): State<AppState>, Path(date): Path<NaiveDate>) -> ApiResult<Campaign> {
    Ok(Json(state.engine.ensure_campaign(date, Utc::now()).await?))
}

async fn admin_readiness(State(state): State<AppState>, Path(date): Path<NaiveDate>) -> ApiResult<ReadinessReport> {
    Ok(Json(state.engine.readiness(date).await?))
}

async fn admin_articles(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> ApiResult<Vec<CandidateArticle>> {
    Ok(Json(state.engine.articles(date).await?))
}

#[derive(Debug, Default, Deserialize)]
struct ProcessQuery {
    #[serde(default)]
    rescore: bool,
}

async fn admin_process(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
    Query(q): Query<ProcessQuery>,
) -> ApiResult<PipelineReport> {
    Ok(Json(state.engine.process_articles(date, q.rescore, Utc::now()).await?))
}

async fn admin_select_all(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> ApiResult<Vec<SelectionOutcome>> {
    Ok(Json(state.engine.select_all(date, Utc::now()).await?))
}

async fn admin_select_section(
    State(state): State<AppState>,
    Path((date, section)): Path<(NaiveDate, String)>,
) -> ApiResult<SelectionOutcome> {
    let section = parse_section(&section)?;
    Ok(Json(state.engine.select_section(date, section, Utc::now()).await?))
}

async fn admin_reselect(
    State(state): State<AppState>,
    Path((date, section)): Path<(NaiveDate, String)>,
) -> ApiResult<SelectionOutcome> {
    let section = parse_section(&section)?;
    Ok(Json(state.engine.reselect(date, section, Utc::now()).await?))
}

#[derive(Debug, Deserialize)]
struct CandidateBody {
    candidate_id: String,
}

async fn admin_deselect(
    State(state): State<AppState>,
    Path((date, section)): Path<(NaiveDate, String)>,
    Json(body): Json<CandidateBody>,
) -> ApiResult<Selection> {
    let section = parse_section(&section)?;
    Ok(Json(state.engine.deselect(date, section, &body.candidate_id).await?))
}

async fn admin_restore(
    State(state): State<AppState>,
    Path((date, section)): Path<(NaiveDate, String)>,
    Json(body): Json<CandidateBody>,
) -> ApiResult<Selection> {
    let section = parse_section(&section)?;
    Ok(Json(state.engine.restore(date, section, &body.candidate_id).await?))
}

async fn admin_submit(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> ApiResult<TransitionOutcome> {
    Ok(Json(state.engine.submit_for_review(date, Utc::now()).await?))
}

async fn admin_approve(State(state): State<AppState>, Path(date): Path<NaiveDate>) -> ApiResult<Campaign> {
    Ok(Json(state.engine.approve(date, Utc::now()).await?))
}

async fn admin_mark_sent(State(state): State<AppState>, Path(date): Path<NaiveDate>) -> ApiResult<Campaign> {
    Ok(Json(state.engine.mark_sent(date, Utc::now()).await?))
}

async fn admin_archive(State(state): State<AppState>, Path(date): Path<NaiveDate>) -> ApiResult<Campaign> {
    Ok(Json(state.engine.archive(date, Utc::now()).await?))
}

async fn admin_force_include(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CandidateArticle> {
    Ok(Json(state.engine.force_include(&id).await?))
}

#[derive(Debug, Deserialize)]
struct EventFlags {
    featured: Option<bool>,
    paid_placement: Option<bool>,
}

async fn admin_event_flags(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(flags): Json<EventFlags>,
) -> ApiResult<ExternalEvent> {
    Ok(Json(
        state
            .engine
            .set_event_flags(&id, flags.featured, flags.paid_placement)
            .await?,
    ))
}
