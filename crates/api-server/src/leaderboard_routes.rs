//! Daily leaderboard routes
//!
//! The cron trigger builds today's leaderboard and prunes old days; the read
//! endpoint serves every day still inside the retention window.

use analysis_core::{AnalysisError, DailyLeaderboardEntry};
use axum::{
    extract::{Query, State},
    middleware,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use signal_ranking::RunSummary;

use crate::auth::cron_auth_middleware;
use crate::request_id::RequestId;
use crate::security_headers::no_cache_headers;
use crate::{ApiResponse, AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct TriggerQuery {
    /// Read-style schedulers must opt in with `run=1` or `run=true`.
    pub run: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardView {
    pub cutoff_day: NaiveDate,
    pub rows: Vec<DailyLeaderboardEntry>,
}

pub fn cron_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/cron/daily-leaderboard",
            get(trigger_on_read).post(trigger_leaderboard_run),
        )
        .route_layer(middleware::from_fn_with_state(state, cron_auth_middleware))
}

pub fn leaderboard_routes() -> Router<AppState> {
    Router::new().route("/api/leaderboard", get(get_leaderboard))
}

async fn trigger_leaderboard_run(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<RunSummary>>, AppError> {
    tracing::info!(%request_id, "Daily leaderboard run triggered");
    let summary = state.retention.run().await?;
    Ok(Json(ApiResponse::success(summary)))
}

async fn trigger_on_read(
    state: State<AppState>,
    request_id: Extension<RequestId>,
    Query(query): Query<TriggerQuery>,
) -> Result<Json<ApiResponse<RunSummary>>, AppError> {
    let run = query
        .run
        .as_deref()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if !run {
        return Err(AnalysisError::Validation("GET requires run=1 to trigger a run; use POST otherwise".to_string()).into());
    }
    trigger_leaderboard_run(state, request_id).await
}

async fn get_leaderboard(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let cutoff_day = state.retention.cutoff_day(Utc::now());
    let rows = state.leaderboard.read_since(cutoff_day).await?;

    Ok((no_cache_headers(), Json(ApiResponse::success(LeaderboardView { cutoff_day, rows }))))
}
