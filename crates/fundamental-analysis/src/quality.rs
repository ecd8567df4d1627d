//! Fundamental quality score from margins, margin trend, and margin stability.

use analysis_core::{DataQuality, FundamentalsSource, MarginPeriod, MarginRow, MetricSnapshot};
use market_data_client::{external_symbol, map_limit};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::sync::Arc;

use crate::series::{build_series, latest_quarters, MarginSeries};

/// Quarters considered for the trend and volatility terms.
pub const TRAILING_QUARTERS: usize = 4;

/// Tunable weights, caps, and penalties of the quality score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Weight of net margin in the base blend.
    pub net_weight: f64,
    /// Weight of gross margin in the base blend.
    pub gross_weight: f64,
    /// Points per percentage point of margin trend (last minus first quarter).
    pub trend_factor: f64,
    /// Symmetric cap on the trend contribution.
    pub trend_cap: f64,
    /// Points subtracted per percentage point of margin volatility.
    pub volatility_factor: f64,
    /// Volatility is clamped to `[0, volatility_cap]` before weighting.
    pub volatility_cap: f64,
    /// Subtracted whenever net margin is negative.
    pub negative_net_penalty: f64,
    /// Net margin above this with gross below `one_off_gross_below` looks like a one-time gain.
    pub one_off_net_above: f64,
    pub one_off_gross_below: f64,
    pub one_off_penalty: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            net_weight: 0.6,
            gross_weight: 0.4,
            trend_factor: 0.2,
            trend_cap: 3.0,
            volatility_factor: 0.9,
            volatility_cap: 12.0,
            negative_net_penalty: 5.0,
            one_off_net_above: 25.0,
            one_off_gross_below: 20.0,
            one_off_penalty: 4.0,
        }
    }
}

impl QualityConfig {
    /// Weighted margin blend; a missing margin counts as zero.
    pub fn base_blend(&self, gross: Option<f64>, net: Option<f64>) -> f64 {
        self.net_weight * net.unwrap_or(0.0) + self.gross_weight * gross.unwrap_or(0.0)
    }

    pub fn negative_margin_adjustment(&self, net: Option<f64>) -> f64 {
        match net {
            Some(n) if n < 0.0 => -self.negative_net_penalty,
            _ => 0.0,
        }
    }

    pub fn one_off_adjustment(&self, gross: Option<f64>, net: Option<f64>) -> f64 {
        match (gross, net) {
            (Some(g), Some(n)) if n > self.one_off_net_above && g < self.one_off_gross_below => -self.one_off_penalty,
            _ => 0.0,
        }
    }

    pub fn trend_adjustment(&self, trend: f64) -> f64 {
        (self.trend_factor * trend).clamp(-self.trend_cap, self.trend_cap)
    }

    pub fn volatility_adjustment(&self, volatility: f64) -> f64 {
        -self.volatility_factor * volatility.clamp(0.0, self.volatility_cap)
    }
}

/// Population standard deviation and last-minus-first change of a series.
pub fn volatility_and_trend(series: &[f64]) -> (f64, f64) {
    if series.len() < 2 {
        return (0.0, 0.0);
    }
    let volatility = series.iter().population_std_dev();
    let trend = series[series.len() - 1] - series[0];
    (if volatility.is_finite() { volatility } else { 0.0 }, trend)
}

fn resolve_snapshot(snapshot: &MetricSnapshot) -> (Option<f64>, Option<f64>, MarginPeriod) {
    if snapshot.gross_margin_ttm.is_some() || snapshot.net_margin_ttm.is_some() {
        (snapshot.gross_margin_ttm, snapshot.net_margin_ttm, MarginPeriod::Ttm)
    } else if snapshot.gross_margin_annual.is_some() || snapshot.net_margin_annual.is_some() {
        (snapshot.gross_margin_annual, snapshot.net_margin_annual, MarginPeriod::Fy)
    } else {
        (None, None, MarginPeriod::Unknown)
    }
}

/// Assemble a [`MarginRow`] from whatever data was obtainable.
///
/// With no snapshot margins the latest quarterly margins stand in. The row
/// carries `quality_score = None` only when no margin is known at all.
pub fn compute_row(
    symbol: &str,
    external_symbol: &str,
    snapshot: Option<&MetricSnapshot>,
    series: Option<&MarginSeries>,
    config: &QualityConfig,
) -> MarginRow {
    let (mut gross, mut net, period) = snapshot
        .map(resolve_snapshot)
        .unwrap_or((None, None, MarginPeriod::Unknown));
    let snapshot_resolved = gross.is_some() || net.is_some();

    if !snapshot_resolved {
        if let Some(s) = series {
            gross = s.gross.last().copied();
            net = s.net.last().copied();
        }
    }

    let (gross_series, net_series) = series
        .map(|s| (s.gross.clone(), s.net.clone()))
        .unwrap_or_default();

    if gross.is_none() && net.is_none() {
        return MarginRow {
            symbol: symbol.to_string(),
            external_symbol: external_symbol.to_string(),
            gross_margin: None,
            net_margin: None,
            period,
            gross_series,
            net_series,
            volatility: 0.0,
            quality_score: None,
            quality: DataQuality::Unavailable,
        };
    }

    let base = config.base_blend(gross, net) + config.negative_margin_adjustment(net);
    let (score, volatility, quality) = match series {
        Some(s) => {
            let (volatility, trend) = volatility_and_trend(s.trend_series());
            let score = base
                + config.trend_adjustment(trend)
                + config.volatility_adjustment(volatility)
                + config.one_off_adjustment(gross, net);
            let quality = if snapshot_resolved { DataQuality::Exact } else { DataQuality::Fallback };
            (score, volatility, quality)
        }
        None => (base, 0.0, DataQuality::Fallback),
    };

    MarginRow {
        symbol: symbol.to_string(),
        external_symbol: external_symbol.to_string(),
        gross_margin: gross,
        net_margin: net,
        period,
        gross_series,
        net_series,
        volatility,
        quality_score: Some(score),
        quality,
    }
}

/// Fetches fundamentals and scores margin quality per symbol.
pub struct QualityScorer {
    source: Arc<dyn FundamentalsSource>,
    config: QualityConfig,
    symbol_suffix: String,
}

impl QualityScorer {
    pub fn new(source: Arc<dyn FundamentalsSource>) -> Self {
        Self {
            source,
            config: QualityConfig::default(),
            symbol_suffix: String::new(),
        }
    }

    pub fn with_config(mut self, config: QualityConfig) -> Self {
        self.config = config;
        self
    }

    /// Exchange suffix appended to bare tickers before calling upstream.
    pub fn with_symbol_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.symbol_suffix = suffix.into();
        self
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Score one symbol. Upstream failures degrade the row instead of erroring.
    pub async fn score(&self, symbol: &str) -> MarginRow {
        let external = external_symbol(symbol, &self.symbol_suffix);

        let (snapshot, reports) = tokio::join!(
            self.source.snapshot(&external),
            self.source.quarterly_reports(&external),
        );

        let snapshot = match snapshot {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(symbol = %external, "Metric snapshot unavailable: {}", e);
                None
            }
        };
        let series = match reports {
            Ok(reports) => {
                let series = build_series(&latest_quarters(reports, TRAILING_QUARTERS));
                if series.is_none() {
                    tracing::debug!(symbol = %external, "Quarterly reports yielded no usable margin series");
                }
                series
            }
            Err(e) => {
                tracing::warn!(symbol = %external, "Quarterly reports unavailable: {}", e);
                None
            }
        };

        compute_row(symbol, &external, snapshot.as_ref(), series.as_ref(), &self.config)
    }

    /// Score many symbols with at most `limit` in flight, preserving order.
    pub async fn score_many(&self, symbols: &[String], limit: usize) -> Vec<MarginRow> {
        map_limit(symbols.iter(), limit, |symbol| self.score(symbol)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::AnalysisError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn snapshot_ttm(gross: Option<f64>, net: Option<f64>) -> MetricSnapshot {
        MetricSnapshot { gross_margin_ttm: gross, net_margin_ttm: net, ..Default::default() }
    }

    fn rising_series() -> MarginSeries {
        MarginSeries { gross: vec![38.0, 39.0, 40.0, 41.0], net: vec![8.0, 9.0, 10.0, 11.0] }
    }

    #[test]
    fn test_fallback_score_from_snapshot_only() {
        let row = compute_row("AAA", "AAA", Some(&snapshot_ttm(Some(40.0), Some(10.0))), None, &QualityConfig::default());
        assert_eq!(row.period, MarginPeriod::Ttm);
        assert_eq!(row.quality, DataQuality::Fallback);
        assert!((row.quality_score.unwrap() - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_score_with_trend_and_volatility() {
        let series = rising_series();
        let row = compute_row(
            "AAA",
            "AAA",
            Some(&snapshot_ttm(Some(40.0), Some(10.0))),
            Some(&series),
            &QualityConfig::default(),
        );
        // 22 + clamp(0.2 * 3) - 0.9 * sqrt(1.25)
        let expected = 22.0 + 0.6 - 0.9 * 1.25_f64.sqrt();
        assert_eq!(row.quality, DataQuality::Exact);
        assert!((row.volatility - 1.25_f64.sqrt()).abs() < 1e-9);
        assert!((row.quality_score.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_null_iff_both_margins_null() {
        let config = QualityConfig::default();
        let cases = [
            (None, None, true),
            (Some(30.0), None, false),
            (None, Some(-2.0), false),
            (Some(30.0), Some(5.0), false),
        ];
        for (gross, net, expect_null) in cases {
            let row = compute_row("X", "X", Some(&snapshot_ttm(gross, net)), None, &config);
            assert_eq!(row.quality_score.is_none(), expect_null, "gross={gross:?} net={net:?}");
        }
        let nothing = compute_row("X", "X", None, None, &config);
        assert_eq!(nothing.quality_score, None);
        assert_eq!(nothing.quality, DataQuality::Unavailable);
    }

    #[test]
    fn test_fiscal_year_fallback_and_negative_penalty() {
        let snapshot = MetricSnapshot {
            gross_margin_annual: Some(20.0),
            net_margin_annual: Some(-10.0),
            ..Default::default()
        };
        let row = compute_row("X", "X", Some(&snapshot), None, &QualityConfig::default());
        assert_eq!(row.period, MarginPeriod::Fy);
        // 0.6 * -10 + 0.4 * 20 - 5
        assert!((row.quality_score.unwrap() - -3.0).abs() < 1e-9);
    }

    #[test]
    fn test_one_off_penalty_applies_with_series() {
        let flat = MarginSeries { gross: vec![15.0, 15.0], net: vec![30.0, 30.0] };
        let config = QualityConfig::default();
        let row = compute_row("X", "X", Some(&snapshot_ttm(Some(15.0), Some(30.0))), Some(&flat), &config);
        let expected = 0.6 * 30.0 + 0.4 * 15.0 - config.one_off_penalty;
        assert!((row.quality_score.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_volatility_and_trend_are_capped() {
        let config = QualityConfig::default();
        assert_eq!(config.trend_adjustment(50.0), 3.0);
        assert_eq!(config.trend_adjustment(-50.0), -3.0);
        assert!((config.volatility_adjustment(40.0) - -10.8).abs() < 1e-9);
        assert_eq!(volatility_and_trend(&[5.0]), (0.0, 0.0));
    }

    #[test]
    fn test_quarterly_margins_stand_in_for_missing_snapshot() {
        let series = rising_series();
        let row = compute_row("X", "X", Some(&MetricSnapshot::default()), Some(&series), &QualityConfig::default());
        assert_eq!(row.period, MarginPeriod::Unknown);
        assert_eq!(row.gross_margin, Some(41.0));
        assert_eq!(row.net_margin, Some(11.0));
        assert_eq!(row.quality, DataQuality::Fallback);
        assert!(row.quality_score.is_some());
    }

    struct FakeSource {
        snapshots: HashMap<String, MetricSnapshot>,
        reports: HashMap<String, Vec<Value>>,
    }

    #[async_trait]
    impl FundamentalsSource for FakeSource {
        async fn snapshot(&self, external_symbol: &str) -> Result<MetricSnapshot, AnalysisError> {
            self.snapshots
                .get(external_symbol)
                .cloned()
                .ok_or_else(|| AnalysisError::UpstreamUnavailable("HTTP 404".into()))
        }

        async fn quarterly_reports(&self, external_symbol: &str) -> Result<Vec<Value>, AnalysisError> {
            self.reports
                .get(external_symbol)
                .cloned()
                .ok_or_else(|| AnalysisError::Timeout("financials-reported".into()))
        }
    }

    fn quarter(end: &str, revenue: f64, gross: f64, net: f64) -> Value {
        json!({"endDate": end, "report": {"ic": [
            {"concept": "us-gaap_Revenues", "value": revenue},
            {"concept": "us-gaap_GrossProfit", "value": gross},
            {"concept": "us-gaap_NetIncomeLoss", "value": net}
        ]}})
    }

    #[tokio::test]
    async fn test_score_many_degrades_per_symbol() {
        let mut snapshots = HashMap::new();
        snapshots.insert("AAA.TO".to_string(), snapshot_ttm(Some(40.0), Some(10.0)));
        snapshots.insert("BBB.TO".to_string(), snapshot_ttm(Some(30.0), Some(5.0)));
        let mut reports = HashMap::new();
        reports.insert(
            "AAA.TO".to_string(),
            vec![
                quarter("2024-03-31", 1000.0, 410.0, 110.0),
                quarter("2023-06-30", 1000.0, 380.0, 80.0),
                quarter("2023-12-31", 1000.0, 400.0, 100.0),
                quarter("2023-09-30", 1000.0, 390.0, 90.0),
                quarter("2023-03-31", 1000.0, 100.0, 10.0),
            ],
        );
        let scorer = QualityScorer::new(Arc::new(FakeSource { snapshots, reports })).with_symbol_suffix(".TO");

        let symbols = vec!["AAA".to_string(), "BBB".to_string(), "CCC".to_string()];
        let rows = scorer.score_many(&symbols, 2).await;

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].external_symbol, "AAA.TO");
        assert_eq!(rows[0].quality, DataQuality::Exact);
        assert_eq!(rows[0].net_series.len(), 4);
        let expected = 22.0 + 0.6 - 0.9 * 1.25_f64.sqrt();
        assert!((rows[0].quality_score.unwrap() - expected).abs() < 1e-9);

        assert_eq!(rows[1].quality, DataQuality::Fallback);
        assert!((rows[1].quality_score.unwrap() - 15.0).abs() < 1e-9);

        assert_eq!(rows[2].symbol, "CCC");
        assert_eq!(rows[2].quality_score, None);
        assert_eq!(rows[2].quality, DataQuality::Unavailable);
    }
}
