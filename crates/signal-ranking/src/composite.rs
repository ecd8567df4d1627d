//! Composite ranking across technical, fundamental, and news scores.

use analysis_core::{
    AnalysisError, CompositeScoreEntry, DataQuality, MarginRow, NewsImpact, NewsImpactSource, PriceHistorySource,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use fundamental_analysis::QualityScorer;
use market_data_client::{external_symbol, map_limit};
use serde::{Deserialize, Serialize};
use signal_store::SignalStore;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Weights of the overall score. Missing sub-scores contribute zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeWeights {
    pub tech: f64,
    pub fund: f64,
    pub news: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            tech: 0.55,
            fund: 0.35,
            news: 0.10,
        }
    }
}

fn clamp_score(score: Option<f64>) -> Option<f64> {
    score.filter(|s| s.is_finite()).map(|s| s.clamp(0.0, 100.0))
}

impl CompositeWeights {
    /// Weighted sum of the clamped sub-scores; `None` only when all are missing.
    pub fn blend(&self, tech: Option<f64>, fund: Option<f64>, news: Option<f64>) -> Option<f64> {
        if tech.is_none() && fund.is_none() && news.is_none() {
            return None;
        }
        Some(
            self.tech * tech.unwrap_or(0.0)
                + self.fund * fund.unwrap_or(0.0)
                + self.news * news.unwrap_or(0.0),
        )
    }
}

/// Highest impact per symbol among items published at or after `since`.
pub fn max_impact_by_symbol(items: &[NewsImpact], since: DateTime<Utc>) -> HashMap<String, f64> {
    let mut best: HashMap<String, f64> = HashMap::new();
    for item in items.iter().filter(|i| i.published_at >= since && i.impact.is_finite()) {
        for symbol in &item.symbols {
            best.entry(symbol.to_uppercase())
                .and_modify(|v| *v = v.max(item.impact))
                .or_insert(item.impact);
        }
    }
    best
}

/// Sort by overall score descending with unscored entries last.
pub fn sort_entries(entries: &mut [CompositeScoreEntry]) {
    entries.sort_by(|a, b| match (a.overall_score, b.overall_score) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal).then_with(|| a.symbol.cmp(&b.symbol)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.symbol.cmp(&b.symbol),
    });
}

/// Request-scoped fundamentals keyed by external symbol. Concurrent lookups
/// of the same key wait on one in-flight score.
type FundamentalsMemo = DashMap<String, Arc<OnceCell<MarginRow>>>;

pub struct CompositeAggregator {
    signals: SignalStore,
    scorer: Arc<QualityScorer>,
    news: Option<Arc<dyn NewsImpactSource>>,
    prices: Option<Arc<dyn PriceHistorySource>>,
    weights: CompositeWeights,
    concurrency: usize,
    symbol_suffix: String,
    /// How many of the newest store rows count as recent regardless of age.
    recent_rows: u32,
    spark_len: usize,
}

impl CompositeAggregator {
    pub fn new(signals: SignalStore, scorer: Arc<QualityScorer>) -> Self {
        Self {
            signals,
            scorer,
            news: None,
            prices: None,
            weights: CompositeWeights::default(),
            concurrency: 4,
            symbol_suffix: String::new(),
            recent_rows: 200,
            spark_len: 20,
        }
    }

    pub fn with_news(mut self, news: Arc<dyn NewsImpactSource>) -> Self {
        self.news = Some(news);
        self
    }

    /// Price source for the display-only spark series.
    pub fn with_prices(mut self, prices: Arc<dyn PriceHistorySource>) -> Self {
        self.prices = Some(prices);
        self
    }

    pub fn with_weights(mut self, weights: CompositeWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_symbol_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.symbol_suffix = suffix.into();
        self
    }

    pub async fn rank(
        &self,
        universe: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<CompositeScoreEntry>, AnalysisError> {
        self.rank_at(Utc::now(), universe, limit).await
    }

    /// Rank the universe as of `now`.
    ///
    /// With no universe, every symbol that signalled in the last 24 hours or
    /// appears among the newest store rows is ranked. A named universe ranks
    /// exactly its members. Only store failures are errors.
    pub async fn rank_at(
        &self,
        now: DateTime<Utc>,
        universe: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<CompositeScoreEntry>, AnalysisError> {
        let since = now - Duration::hours(24);
        let tech = self.latest_tech_scores(since).await?;

        let symbols: Vec<String> = match universe {
            Some(members) => {
                let mut seen = Vec::with_capacity(members.len());
                for symbol in members.iter().map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()) {
                    if !seen.contains(&symbol) {
                        seen.push(symbol);
                    }
                }
                seen
            }
            None => {
                let mut all: Vec<String> = tech.keys().cloned().collect();
                all.sort();
                all
            }
        };
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let news = self.news_scores(since).await;

        // Symbols that qualify to the same upstream ticker share one fundamentals fetch.
        let cache: FundamentalsMemo = DashMap::new();
        let fund_cache = &cache;
        let legs = map_limit(symbols.iter().cloned(), self.concurrency, move |symbol| async move {
            tokio::join!(self.fundamentals(fund_cache, &symbol), self.spark(&symbol, now))
        })
        .await;
        tracing::debug!(symbols = symbols.len(), fetched = cache.len(), "Fundamentals resolved");

        let mut entries: Vec<CompositeScoreEntry> = symbols
            .iter()
            .zip(legs)
            .map(|(symbol, (fund_row, spark))| {
                let tech_score = clamp_score(tech.get(symbol).copied().flatten());
                let fund_score = clamp_score(fund_row.quality_score);
                let news_score = clamp_score(news.get(symbol).copied());
                CompositeScoreEntry {
                    symbol: symbol.clone(),
                    tech_score,
                    fund_score,
                    news_score,
                    overall_score: self.weights.blend(tech_score, fund_score, news_score),
                    fund_quality: fund_row.quality,
                    spark,
                }
            })
            .collect();

        sort_entries(&mut entries);
        entries.truncate(limit);

        let degraded = entries.iter().filter(|e| e.fund_quality != DataQuality::Exact).count();
        tracing::info!(ranked = entries.len(), degraded, "Composite ranking complete");

        Ok(entries)
    }

    /// Quality row for `symbol`, scored at most once per external symbol per request.
    async fn fundamentals(&self, cache: &FundamentalsMemo, symbol: &str) -> MarginRow {
        let external = external_symbol(symbol, &self.symbol_suffix);
        let cell = cache.entry(external).or_default().clone();
        cell.get_or_init(|| self.scorer.score(symbol)).await.clone()
    }

    /// Latest technical score per symbol, newest signal wins.
    async fn latest_tech_scores(&self, since: DateTime<Utc>) -> Result<HashMap<String, Option<f64>>, AnalysisError> {
        let (windowed, recent) = tokio::join!(
            self.signals.latest_per_symbol_since(since),
            self.signals.recent(self.recent_rows),
        );

        let mut scores = HashMap::new();
        for signal in windowed?.into_iter().chain(recent?) {
            scores.entry(signal.symbol).or_insert(signal.score);
        }
        Ok(scores)
    }

    async fn news_scores(&self, since: DateTime<Utc>) -> HashMap<String, f64> {
        let Some(news) = &self.news else {
            return HashMap::new();
        };
        match news.recent_impacts(since).await {
            Ok(items) => max_impact_by_symbol(&items, since),
            Err(e) => {
                tracing::warn!("News impact unavailable, ranking without news leg: {}", e);
                HashMap::new()
            }
        }
    }

    async fn spark(&self, symbol: &str, now: DateTime<Utc>) -> Option<Vec<f64>> {
        let prices = self.prices.as_ref()?;
        let external = external_symbol(symbol, &self.symbol_suffix);
        match prices.daily_bars(&external, now - Duration::days(45), now).await {
            Ok(bars) if !bars.is_empty() => {
                let skip = bars.len().saturating_sub(self.spark_len);
                Some(bars[skip..].iter().map(|b| b.close).collect())
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(symbol = %external, "No spark series: {}", e);
                None
            }
        }
    }
}
