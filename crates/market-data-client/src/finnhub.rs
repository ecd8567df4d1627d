use analysis_core::{AnalysisError, Bar, FundamentalsSource, MetricSnapshot, PriceHistorySource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::fetcher::BoundedFetcher;

pub const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";

/// Client for the financial-metrics and daily-candle endpoints.
#[derive(Clone, Debug)]
pub struct FinnhubClient {
    api_key: String,
    base_url: String,
    fetcher: BoundedFetcher,
}

impl FinnhubClient {
    pub fn new(api_key: String, fetcher: BoundedFetcher) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string(), fetcher)
    }

    pub fn with_base_url(api_key: String, base_url: String, fetcher: BoundedFetcher) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            fetcher,
        }
    }

    async fn get(&self, endpoint: &str, mut query: Vec<(&str, String)>) -> Result<Value, AnalysisError> {
        query.push(("token", self.api_key.clone()));
        let url = format!("{}/{}", self.base_url, endpoint);
        self.fetcher.fetch_with_query(&url, &query).await
    }

    /// Get TTM and annual margin snapshot
    pub async fn get_metric_snapshot(&self, symbol: &str) -> Result<MetricSnapshot, AnalysisError> {
        let body = self
            .get("stock/metric", vec![("symbol", symbol.to_string()), ("metric", "all".to_string())])
            .await?;
        parse_metric_snapshot(&body)
    }

    /// Get as-reported quarterly financial statements
    pub async fn get_quarterly_reports(&self, symbol: &str) -> Result<Vec<Value>, AnalysisError> {
        let body = self
            .get(
                "stock/financials-reported",
                vec![("symbol", symbol.to_string()), ("freq", "quarterly".to_string())],
            )
            .await?;
        match body.get("data") {
            Some(Value::Array(reports)) => Ok(reports.clone()),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(_) => Err(AnalysisError::ParseIncomplete(format!(
                "financials-reported for {symbol}: 'data' is not an array"
            ))),
        }
    }

    /// Get daily candles between `from` and `to`
    pub async fn get_daily_candles(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, AnalysisError> {
        let body = self
            .get(
                "stock/candle",
                vec![
                    ("symbol", symbol.to_string()),
                    ("resolution", "D".to_string()),
                    ("from", from.timestamp().to_string()),
                    ("to", to.timestamp().to_string()),
                ],
            )
            .await?;
        parse_candles(&body)
    }
}

#[async_trait]
impl FundamentalsSource for FinnhubClient {
    async fn snapshot(&self, external_symbol: &str) -> Result<MetricSnapshot, AnalysisError> {
        self.get_metric_snapshot(external_symbol).await
    }

    async fn quarterly_reports(&self, external_symbol: &str) -> Result<Vec<Value>, AnalysisError> {
        self.get_quarterly_reports(external_symbol).await
    }
}

#[async_trait]
impl PriceHistorySource for FinnhubClient {
    async fn daily_bars(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, AnalysisError> {
        self.get_daily_candles(symbol, from, to).await
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

pub fn parse_metric_snapshot(body: &Value) -> Result<MetricSnapshot, AnalysisError> {
    let metric = body
        .get("metric")
        .filter(|m| m.is_object())
        .ok_or_else(|| AnalysisError::ParseIncomplete("metric snapshot has no 'metric' object".to_string()))?;

    Ok(MetricSnapshot {
        gross_margin_ttm: number(metric.get("grossMarginTTM")),
        net_margin_ttm: number(metric.get("netProfitMarginTTM")),
        gross_margin_annual: number(metric.get("grossMarginAnnual")),
        net_margin_annual: number(metric.get("netProfitMarginAnnual")),
    })
}

/// Decode the column-oriented candle payload (`t`, `o`, `h`, `l`, `c`, `v`).
pub fn parse_candles(body: &Value) -> Result<Vec<Bar>, AnalysisError> {
    match body.get("s").and_then(Value::as_str) {
        Some("no_data") => return Ok(Vec::new()),
        Some("ok") | None => {}
        Some(other) => {
            return Err(AnalysisError::UpstreamUnavailable(format!("candle status '{other}'")));
        }
    }

    let column = |key: &str| -> Vec<Value> {
        body.get(key).and_then(Value::as_array).cloned().unwrap_or_default()
    };
    let (t, o, h, l, c, v) = (column("t"), column("o"), column("h"), column("l"), column("c"), column("v"));

    let mut bars: Vec<Bar> = t
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let timestamp = DateTime::from_timestamp(ts.as_i64()?, 0)?;
            let close = number(c.get(i))?;
            Some(Bar {
                timestamp,
                open: number(o.get(i)).unwrap_or(close),
                high: number(h.get(i)).unwrap_or(close),
                low: number(l.get(i)).unwrap_or(close),
                close,
                volume: number(v.get(i)).unwrap_or(0.0),
            })
        })
        .collect();
    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_metric_snapshot() {
        let body = json!({"metric": {
            "grossMarginTTM": 43.3,
            "netProfitMarginTTM": "24.1",
            "grossMarginAnnual": null
        }});
        let snap = parse_metric_snapshot(&body).unwrap();
        assert_eq!(snap.gross_margin_ttm, Some(43.3));
        assert_eq!(snap.net_margin_ttm, Some(24.1));
        assert_eq!(snap.gross_margin_annual, None);
        assert_eq!(snap.net_margin_annual, None);
    }

    #[test]
    fn test_parse_metric_snapshot_rejects_unknown_shape() {
        assert!(matches!(
            parse_metric_snapshot(&json!({"error": "nope"})),
            Err(AnalysisError::ParseIncomplete(_))
        ));
    }

    #[test]
    fn test_parse_candles_sorted_and_no_data() {
        let body = json!({
            "s": "ok",
            "t": [1717977600, 1717718400],
            "c": [110.0, 100.0],
            "o": [109.0, 99.0],
        });
        let bars = parse_candles(&body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 100.0);
        assert_eq!(bars[1].close, 110.0);
        assert_eq!(bars[1].high, 110.0);

        assert!(parse_candles(&json!({"s": "no_data"})).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quarterly_reports_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stock/financials-reported"))
            .and(query_param("symbol", "SHOP.TO"))
            .and(query_param("freq", "quarterly"))
            .and(query_param("token", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"endDate": "2024-03-31", "report": {"ic": []}}]
            })))
            .mount(&server)
            .await;

        let client = FinnhubClient::with_base_url("k".into(), server.uri(), BoundedFetcher::default());
        let reports = client.quarterly_reports("SHOP.TO").await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["endDate"], "2024-03-31");
    }
}
