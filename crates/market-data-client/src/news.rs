use analysis_core::{AnalysisError, NewsImpact, NewsImpactSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::fetcher::BoundedFetcher;

/// Client for the news-enrichment service that scores article impact.
#[derive(Clone, Debug)]
pub struct NewsImpactClient {
    base_url: String,
    fetcher: BoundedFetcher,
}

impl NewsImpactClient {
    pub fn new(base_url: String, fetcher: BoundedFetcher) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            fetcher,
        }
    }
}

#[async_trait]
impl NewsImpactSource for NewsImpactClient {
    async fn recent_impacts(&self, since: DateTime<Utc>) -> Result<Vec<NewsImpact>, AnalysisError> {
        let url = format!("{}/impacts", self.base_url);
        let body = self
            .fetcher
            .fetch_with_query(&url, &[("since", since.to_rfc3339())])
            .await?;
        Ok(parse_impacts(&body))
    }
}

/// Accepts a bare array or `{ "items": [...] }`; malformed items are skipped.
pub fn parse_impacts(body: &Value) -> Vec<NewsImpact> {
    let items: &[Value] = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("items") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    items.iter().filter_map(parse_item).collect()
}

fn parse_item(item: &Value) -> Option<NewsImpact> {
    let published_at = match item.get("published_at").or_else(|| item.get("datetime"))? {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc),
        Value::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0)?,
        _ => return None,
    };

    let symbols = match item.get("symbols").or_else(|| item.get("related"))? {
        Value::Array(list) => list
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(joined) => joined
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => return None,
    };

    let impact = item.get("impact").or_else(|| item.get("impact_score"))?.as_f64()?;
    Some(NewsImpact {
        published_at,
        symbols,
        impact,
    })
}
