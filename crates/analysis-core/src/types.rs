use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::AnalysisError;

/// OHLCV bar data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Direction of a signal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(AnalysisError::Validation(format!("side must be BUY or SELL, got '{other}'"))),
        }
    }
}

/// Reviewer verdict on a signal, set after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Win,
    Loss,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Win => "WIN",
            Outcome::Loss => "LOSS",
        }
    }
}

impl FromStr for Outcome {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "WIN" => Ok(Outcome::Win),
            "LOSS" => Ok(Outcome::Loss),
            other => Err(AnalysisError::Validation(format!("outcome must be WIN or LOSS, got '{other}'"))),
        }
    }
}

/// A stored buy/sell signal. Only `outcome` changes after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub price: Option<f64>,
    pub score: Option<f64>,
    pub reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub outcome: Option<Outcome>,
}

/// Insert payload for a signal before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSignal {
    pub symbol: String,
    pub side: Side,
    pub price: Option<f64>,
    pub score: Option<f64>,
    pub reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl NewSignal {
    /// Normalises the symbol and rejects payloads the store must never see.
    pub fn validated(mut self) -> Result<Self, AnalysisError> {
        self.symbol = self.symbol.trim().to_uppercase();
        if self.symbol.is_empty() {
            return Err(AnalysisError::Validation("symbol is required".to_string()));
        }
        for (name, value) in [("price", self.price), ("score", self.score)] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(AnalysisError::Validation(format!("{name} must be a finite number")));
                }
            }
        }
        Ok(self)
    }
}

/// Split a comma-joined reason list into trimmed, non-empty tags.
pub fn parse_reasons(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_reasons(tags: &[String]) -> String {
    tags.join(",")
}

/// How much of the underlying data a score was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    /// Full inputs were available.
    Exact,
    /// A degraded path produced the value.
    Fallback,
    /// Nothing could be computed.
    Unavailable,
}

/// Which snapshot the headline margins came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarginPeriod {
    Ttm,
    Fy,
    Unknown,
}

/// Snapshot margins (percent) as reported by the metrics API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub gross_margin_ttm: Option<f64>,
    pub net_margin_ttm: Option<f64>,
    pub gross_margin_annual: Option<f64>,
    pub net_margin_annual: Option<f64>,
}

/// Per-request fundamental quality result. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginRow {
    pub symbol: String,
    pub external_symbol: String,
    pub gross_margin: Option<f64>,
    pub net_margin: Option<f64>,
    pub period: MarginPeriod,
    pub gross_series: Vec<f64>,
    pub net_series: Vec<f64>,
    pub volatility: f64,
    pub quality_score: Option<f64>,
    pub quality: DataQuality,
}

/// One instrument in the composite ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeScoreEntry {
    pub symbol: String,
    pub tech_score: Option<f64>,
    pub fund_score: Option<f64>,
    pub news_score: Option<f64>,
    pub overall_score: Option<f64>,
    pub fund_quality: DataQuality,
    /// Recent closes for display only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spark: Option<Vec<f64>>,
}

/// A per-day leaderboard row, unique on `(day, side, symbol)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLeaderboardEntry {
    pub day: NaiveDate,
    pub side: Side,
    pub symbol: String,
    pub score: Option<f64>,
    pub close_price: Option<f64>,
    pub close_10bd: Option<f64>,
    pub pct_10bd: Option<f64>,
}

/// One scored news item from the enrichment collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsImpact {
    pub published_at: DateTime<Utc>,
    pub symbols: Vec<String>,
    /// Impact estimate, nominally 0-100.
    pub impact: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parsing() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!(" SELL ".parse::<Side>().unwrap(), Side::Sell);
        assert!(matches!("hold".parse::<Side>(), Err(AnalysisError::Validation(_))));
        assert_eq!(serde_json::to_string(&Side::Sell).unwrap(), "\"SELL\"");
    }

    #[test]
    fn test_reasons_round_trip() {
        let tags = parse_reasons("rsi_oversold, volume_spike,,  ");
        assert_eq!(tags, vec!["rsi_oversold", "volume_spike"]);
        assert_eq!(join_reasons(&tags), "rsi_oversold,volume_spike");
    }

    #[test]
    fn test_new_signal_validation() {
        let base = NewSignal {
            symbol: " aapl ".to_string(),
            side: Side::Buy,
            price: Some(190.5),
            score: Some(42.0),
            reasons: vec![],
            created_at: Utc::now(),
        };
        assert_eq!(base.clone().validated().unwrap().symbol, "AAPL");

        let empty = NewSignal { symbol: "  ".to_string(), ..base.clone() };
        assert!(matches!(empty.validated(), Err(AnalysisError::Validation(_))));

        let nan = NewSignal { score: Some(f64::NAN), ..base };
        assert!(nan.validated().is_err());
    }

    #[test]
    fn test_margin_row_serializes_camel_case() {
        let row = MarginRow {
            symbol: "SHOP".into(),
            external_symbol: "SHOP.TO".into(),
            gross_margin: Some(50.0),
            net_margin: None,
            period: MarginPeriod::Ttm,
            gross_series: vec![],
            net_series: vec![],
            volatility: 0.0,
            quality_score: Some(20.0),
            quality: DataQuality::Fallback,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["externalSymbol"], "SHOP.TO");
        assert_eq!(json["period"], "TTM");
        assert_eq!(json["quality"], "fallback");
    }
}
