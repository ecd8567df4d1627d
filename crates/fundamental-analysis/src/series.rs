//! Trailing quarterly margin series.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::statement::{extract_items, pick_concept, Concept};

/// Keys that carry a report's period end, most specific first.
const PERIOD_END_KEYS: &[&str] = &["endDate", "period_end", "fiscalDateEnding", "period", "date"];

/// Gross and net margin percentages, oldest quarter first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarginSeries {
    pub gross: Vec<f64>,
    pub net: Vec<f64>,
}

impl MarginSeries {
    /// Net series when it has data, otherwise gross.
    pub fn trend_series(&self) -> &[f64] {
        if self.net.is_empty() {
            &self.gross
        } else {
            &self.net
        }
    }
}

fn period_end(report: &Value) -> String {
    PERIOD_END_KEYS
        .iter()
        .find_map(|k| report.get(*k)?.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Sort reports ascending by period end and keep the most recent `n`.
/// Reports without a period end sort first.
pub fn latest_quarters(mut reports: Vec<Value>, n: usize) -> Vec<Value> {
    reports.sort_by_cached_key(period_end);
    let skip = reports.len().saturating_sub(n);
    reports.split_off(skip)
}

/// Gross and net margin for one quarter; `None` when revenue is missing or zero.
pub fn quarter_margins(report: &Value) -> Option<(Option<f64>, Option<f64>)> {
    let items = extract_items(report);
    let revenue = pick_concept(&items, Concept::Revenue).filter(|r| *r != 0.0)?;
    let gross = pick_concept(&items, Concept::GrossProfit).map(|g| g / revenue * 100.0);
    let net = pick_concept(&items, Concept::NetIncome).map(|n| n / revenue * 100.0);
    Some((gross, net))
}

/// Build margin series from up to four quarters sorted oldest first.
///
/// Quarters without usable revenue are skipped. Returns `None` when neither
/// series reaches two points, since one point says nothing about trend.
pub fn build_series(reports: &[Value]) -> Option<MarginSeries> {
    let mut series = MarginSeries::default();
    for report in reports {
        let Some((gross, net)) = quarter_margins(report) else {
            continue;
        };
        if let Some(g) = gross {
            series.gross.push(g);
        }
        if let Some(n) = net {
            series.net.push(n);
        }
    }

    if series.gross.len() < 2 && series.net.len() < 2 {
        return None;
    }
    Some(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quarter(end: &str, revenue: f64, gross: Option<f64>, net: f64) -> Value {
        let mut ic = vec![
            json!({"concept": "us-gaap_Revenues", "value": revenue}),
            json!({"concept": "us-gaap_NetIncomeLoss", "value": net}),
        ];
        if let Some(g) = gross {
            ic.push(json!({"concept": "us-gaap_GrossProfit", "value": g}));
        }
        json!({"endDate": end, "report": {"ic": ic}})
    }

    #[test]
    fn test_margin_points() {
        let reports = vec![
            quarter("2023-06-30", 900.0, Some(340.0), 40.0),
            quarter("2023-09-30", 950.0, Some(370.0), 45.0),
            quarter("2023-12-31", 980.0, Some(390.0), 48.0),
            quarter("2024-03-31", 1000.0, Some(400.0), 50.0),
        ];
        let series = build_series(&reports).unwrap();
        assert_eq!(series.gross.len(), 4);
        assert!((series.gross[3] - 40.0).abs() < 1e-9);
        assert!((series.net[3] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_revenue_quarter_skipped() {
        let reports = vec![
            quarter("2023-09-30", 0.0, Some(10.0), 1.0),
            quarter("2023-12-31", 500.0, Some(100.0), 25.0),
            quarter("2024-03-31", 500.0, Some(150.0), 50.0),
        ];
        let series = build_series(&reports).unwrap();
        assert_eq!(series.net.len(), 2);
        assert!((series.net[0] - 5.0).abs() < 1e-9);
        assert!((series.net[1] - 10.0).abs() < 1e-9);
        assert!((series.gross[1] - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_point_is_not_a_series() {
        let reports = vec![
            quarter("2024-03-31", 1000.0, Some(400.0), 50.0),
            json!({"endDate": "2023-12-31", "report": {"ic": []}}),
        ];
        assert_eq!(build_series(&reports), None);
        assert_eq!(build_series(&[]), None);
    }

    #[test]
    fn test_trend_series_prefers_net() {
        let both = MarginSeries { gross: vec![1.0, 2.0], net: vec![3.0, 4.0] };
        assert_eq!(both.trend_series(), &[3.0, 4.0]);
        let gross_only = MarginSeries { gross: vec![1.0, 2.0], net: vec![] };
        assert_eq!(gross_only.trend_series(), &[1.0, 2.0]);
    }

    #[test]
    fn test_latest_quarters_sorted_ascending() {
        let reports = vec![
            quarter("2024-03-31", 1.0, None, 1.0),
            quarter("2023-03-31", 1.0, None, 1.0),
            quarter("2023-12-31", 1.0, None, 1.0),
            quarter("2023-09-30", 1.0, None, 1.0),
            quarter("2023-06-30", 1.0, None, 1.0),
        ];
        let latest = latest_quarters(reports, 4);
        let ends: Vec<&str> = latest.iter().map(|r| r["endDate"].as_str().unwrap()).collect();
        assert_eq!(ends, vec!["2023-06-30", "2023-09-30", "2023-12-31", "2024-03-31"]);
    }
}
