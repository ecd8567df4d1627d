//! HTTP surface for the signal leaderboard and composite ranking.

pub mod auth;
pub mod config;
pub mod leaderboard_routes;
pub mod ranking_routes;
pub mod request_id;
pub mod security_headers;
pub mod signal_routes;

use analysis_core::{AnalysisError, BusinessCalendar, FundamentalsSource, NewsImpactSource, PriceHistorySource};
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fundamental_analysis::QualityScorer;
use market_data_client::{BoundedFetcher, FinnhubClient, NewsImpactClient};
use serde::Serialize;
use signal_ranking::{CompositeAggregator, RetentionConfig, RetentionManager};
use signal_store::{LeaderboardStore, SignalDb, SignalStore};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AuthError;
use crate::config::{LogFormat, ServerConfig};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub signals: SignalStore,
    pub leaderboard: LeaderboardStore,
    pub retention: Arc<RetentionManager>,
    pub aggregator: Arc<CompositeAggregator>,
}

/// Upstream collaborators, injectable so tests can run without the network.
pub struct Collaborators {
    pub fundamentals: Arc<dyn FundamentalsSource>,
    pub prices: Arc<dyn PriceHistorySource>,
    pub news: Option<Arc<dyn NewsImpactSource>>,
}

impl Collaborators {
    /// HTTP clients built from configuration. The financial-data clients share
    /// one fetcher, and with it one rate limiter.
    pub fn from_config(config: &ServerConfig) -> Self {
        let timeout = Duration::from_secs(config.fetch_timeout_secs);
        let fetcher = BoundedFetcher::new(timeout).with_rate_limit(config.upstream_rate_limit);
        let finnhub = Arc::new(FinnhubClient::with_base_url(
            config.finnhub_api_key.clone(),
            config.finnhub_base_url.clone(),
            fetcher,
        ));
        let news = config.news_impact_url.as_ref().map(|url| {
            Arc::new(NewsImpactClient::new(url.clone(), BoundedFetcher::new(timeout))) as Arc<dyn NewsImpactSource>
        });

        Self {
            fundamentals: finnhub.clone(),
            prices: finnhub,
            news,
        }
    }
}

impl AppState {
    pub fn new(config: ServerConfig, db: SignalDb, collaborators: Collaborators) -> anyhow::Result<Self> {
        let calendar = BusinessCalendar::from_offset_minutes(config.business_utc_offset_minutes)?;
        let signals = SignalStore::new(db.clone());
        let leaderboard = LeaderboardStore::new(db);

        let retention = RetentionManager::new(signals.clone(), leaderboard.clone(), collaborators.prices.clone(), calendar)
            .with_config(RetentionConfig {
                top_n: config.leaderboard_top_n,
                window_business_days: config.leaderboard_retention_days,
                enrich_concurrency: config.fetch_concurrency,
                ..RetentionConfig::default()
            })
            .with_symbol_suffix(config.market_symbol_suffix.clone());

        let scorer = QualityScorer::new(collaborators.fundamentals).with_symbol_suffix(config.market_symbol_suffix.clone());
        let mut aggregator = CompositeAggregator::new(signals.clone(), Arc::new(scorer))
            .with_prices(collaborators.prices)
            .with_concurrency(config.fetch_concurrency)
            .with_symbol_suffix(config.market_symbol_suffix.clone());
        if let Some(news) = collaborators.news {
            aggregator = aggregator.with_news(news);
        }

        Ok(Self {
            config: Arc::new(config),
            signals,
            leaderboard,
            retention: Arc::new(retention),
            aggregator: Arc::new(aggregator),
        })
    }
}

/// JSON envelope for every response body.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Handler error carrying the HTTP status it maps to.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn with_status(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// HTTP status for each error kind.
pub fn status_for(error: &AnalysisError) -> StatusCode {
    match error {
        AnalysisError::Unauthorized => StatusCode::UNAUTHORIZED,
        AnalysisError::Validation(_) => StatusCode::BAD_REQUEST,
        AnalysisError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        AnalysisError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AnalysisError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        AnalysisError::ParseIncomplete(_) | AnalysisError::Store(_) | AnalysisError::InsufficientData(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<AnalysisError> for AppError {
    fn from(error: AnalysisError) -> Self {
        Self::with_status(status_for(&error), error)
    }
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, error)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "Request failed: {:#}", self.error);
        } else {
            tracing::debug!(status = %self.status, "Request rejected: {}", self.error);
        }

        // Internal details stay in the log.
        let message = if self.status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.error.to_string()
        };

        (
            self.status,
            Json(ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(message),
            }),
        )
            .into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .merge(leaderboard_routes::cron_routes(state.clone()))
        .merge(leaderboard_routes::leaderboard_routes())
        .merge(ranking_routes::ranking_routes())
        .merge(signal_routes::signal_routes())
        .with_state(state)
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .layer(middleware::from_fn(security_headers::security_headers_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "http",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = tracing::field::Empty,
            )
        }))
}

pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env()?;
    init_tracing(config.log_format);

    if config.finnhub_api_key.is_empty() {
        tracing::warn!("FINNHUB_API_KEY not set; upstream calls will fail and scores will degrade");
    }
    if config.cron_secret.is_none() {
        tracing::warn!("CRON_SECRET not set; the daily leaderboard trigger is disabled");
    }

    let db = SignalDb::new(&config.database_url).await?;
    let collaborators = Collaborators::from_config(&config);
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, db, collaborators)?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Signal server listening on {}", bind_addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
