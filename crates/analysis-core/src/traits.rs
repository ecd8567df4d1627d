use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::{AnalysisError, Bar, MetricSnapshot, NewsImpact};

/// Source of income-statement data for the quality scorer
#[async_trait]
pub trait FundamentalsSource: Send + Sync {
    /// Headline TTM / annual margins for a market-qualified symbol.
    async fn snapshot(&self, external_symbol: &str) -> Result<MetricSnapshot, AnalysisError>;

    /// Raw quarterly report objects, in whatever shape the vendor returns them.
    async fn quarterly_reports(&self, external_symbol: &str) -> Result<Vec<serde_json::Value>, AnalysisError>;
}

/// Source of daily candles
#[async_trait]
pub trait PriceHistorySource: Send + Sync {
    async fn daily_bars(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, AnalysisError>;
}

/// News enrichment collaborator producing per-item impact estimates
#[async_trait]
pub trait NewsImpactSource: Send + Sync {
    async fn recent_impacts(&self, since: DateTime<Utc>) -> Result<Vec<NewsImpact>, AnalysisError>;
}
