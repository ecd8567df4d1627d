use analysis_core::{AnalysisError, CompositeScoreEntry};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::{ApiResponse, AppError, AppState};

pub const DEFAULT_RANKING_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct RankingQuery {
    pub universe: Option<String>,
    pub limit: Option<usize>,
}

pub fn ranking_routes() -> Router<AppState> {
    Router::new().route("/api/ranking", get(get_ranking))
}

/// Clamp a requested limit into `[1, max]`.
pub fn clamp_limit(requested: Option<usize>, max: usize) -> usize {
    requested.unwrap_or(DEFAULT_RANKING_LIMIT).clamp(1, max.max(1))
}

async fn get_ranking(
    State(state): State<AppState>,
    Query(query): Query<RankingQuery>,
) -> Result<Json<ApiResponse<Vec<CompositeScoreEntry>>>, AppError> {
    let limit = clamp_limit(query.limit, state.config.ranking_max_limit);

    let universe = match query.universe.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        None => None,
        Some(name) if name.eq_ignore_ascii_case("all") => None,
        Some(name) => Some(
            state
                .config
                .universes
                .get(&name.to_lowercase())
                .ok_or_else(|| AnalysisError::Validation(format!("unknown universe '{name}'")))?,
        ),
    };

    let entries = state
        .aggregator
        .rank(universe.map(|symbols| symbols.as_slice()), limit)
        .await?;
    Ok(Json(ApiResponse::success(entries)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None, 100), 20);
        assert_eq!(clamp_limit(Some(0), 100), 1);
        assert_eq!(clamp_limit(Some(5000), 100), 100);
        assert_eq!(clamp_limit(None, 10), 10);
    }
}
