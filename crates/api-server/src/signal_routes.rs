//! Signal ingestion routes
//!
//! External producers push signal events here; reviewers later mark outcomes.

use analysis_core::{AnalysisError, NewSignal, Outcome, Side, SignalEvent};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::{extract_secret, verify_secret, INGEST_SECRET_HEADER};
use crate::{ApiResponse, AppError, AppState};

/// Reason tags as a list or a comma-joined string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Reasons {
    List(Vec<String>),
    Joined(String),
}

impl Reasons {
    fn into_tags(self) -> Vec<String> {
        match self {
            Reasons::List(tags) => tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            Reasons::Joined(raw) => analysis_core::parse_reasons(&raw),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignalPayload {
    pub symbol: String,
    pub side: String,
    pub price: Option<f64>,
    pub score: Option<f64>,
    pub reasons: Option<Reasons>,
    /// When the producer saw the signal; ingest time if absent.
    #[serde(alias = "created_at")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Ingest secret, for producers that cannot set headers.
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    pub outcome: String,
}

pub fn signal_routes() -> Router<AppState> {
    Router::new()
        .route("/api/signals", post(ingest_signal))
        .route("/api/signals/:id/outcome", patch(set_outcome))
}

async fn ingest_signal(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SignalPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<SignalEvent>>), AppError> {
    let expected = state.config.ingest_secret.as_deref();
    let from_header = extract_secret(&headers, INGEST_SECRET_HEADER);

    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            // Unauthenticated callers learn nothing about the payload shape.
            verify_secret(expected, from_header.as_deref())?;
            return Err(AnalysisError::Validation(rejection.body_text()).into());
        }
    };

    let provided = from_header.or_else(|| payload.secret.clone());
    verify_secret(expected, provided.as_deref())?;

    let side: Side = payload.side.parse()?;
    let signal = NewSignal {
        symbol: payload.symbol,
        side,
        price: payload.price,
        score: payload.score,
        reasons: payload.reasons.map(Reasons::into_tags).unwrap_or_default(),
        created_at: payload.timestamp.unwrap_or_else(Utc::now),
    };

    let stored = state.signals.insert(signal).await?;
    tracing::info!(id = stored.id, symbol = %stored.symbol, side = %stored.side, "Signal ingested");

    Ok((StatusCode::CREATED, Json(ApiResponse::success(stored))))
}

async fn set_outcome(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    request: Result<Json<OutcomeRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<SignalEvent>>, AppError> {
    verify_secret(
        state.config.ingest_secret.as_deref(),
        extract_secret(&headers, INGEST_SECRET_HEADER).as_deref(),
    )?;

    let Json(request) = request.map_err(|rejection| AnalysisError::Validation(rejection.body_text()))?;
    let outcome: Outcome = request.outcome.parse()?;
    if state.signals.get(id).await?.is_none() {
        return Err(AppError::with_status(
            StatusCode::NOT_FOUND,
            AnalysisError::Validation(format!("signal {id} not found")),
        ));
    }

    let updated = state.signals.set_outcome(id, outcome).await?;
    tracing::info!(id, outcome = outcome.as_str(), "Signal outcome recorded");

    Ok(Json(ApiResponse::success(updated)))
}
