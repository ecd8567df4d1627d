//! Income-statement line-item extraction from vendor report objects.
//!
//! Reports arrive in several shapes and languages. Locating a line item is a
//! two-step affair: find the array of line items inside the report, then
//! resolve a canonical concept against the items through [`ALIAS_TABLE`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical income-statement concepts the scorer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Concept {
    Revenue,
    GrossProfit,
    NetIncome,
}

/// Known spellings per concept. Locale coverage lives here as data.
pub const ALIAS_TABLE: &[(Concept, &[&str])] = &[
    (
        Concept::Revenue,
        &[
            "Revenues",
            "Revenue",
            "Total revenue",
            "Total revenues",
            "RevenueFromContractWithCustomerExcludingAssessedTax",
            "Net sales",
            "Sales",
            "Turnover",
            "Umsatzerlöse",
            "Chiffre d'affaires",
            "Ingresos",
            "营业收入",
            "营业总收入",
            "売上高",
            "매출액",
        ],
    ),
    (
        Concept::GrossProfit,
        &[
            "GrossProfit",
            "Gross profit",
            "Bruttoergebnis",
            "Marge brute",
            "Utilidad bruta",
            "毛利",
            "売上総利益",
            "매출총이익",
        ],
    ),
    (
        Concept::NetIncome,
        &[
            "NetIncomeLoss",
            "Net income",
            "Net income (loss)",
            "Net earnings",
            "ProfitLoss",
            "Net profit",
            "Profit for the period",
            "Jahresüberschuss",
            "Résultat net",
            "Utilidad neta",
            "净利润",
            "当期純利益",
            "당기순이익",
        ],
    ),
];

/// Keys tried, in order, for the array of line items.
pub const CONTAINER_KEYS: &[&str] = &[
    "income_statement",
    "incomeStatement",
    "income statement",
    "ic",
    "data",
    "items",
];

/// Taxonomy prefixes stripped from XBRL-style concept names.
const NAMESPACES: &[&str] = &["us-gaap", "ifrs-full", "ifrs", "ca-gaap", "dei"];

/// Keys shorter than this only ever match exactly.
const MIN_CONTAINMENT_LEN: usize = 3;

impl Concept {
    pub fn aliases(&self) -> &'static [&'static str] {
        ALIAS_TABLE
            .iter()
            .find(|(concept, _)| concept == self)
            .map(|(_, aliases)| *aliases)
            .unwrap_or(&[])
    }
}

/// One line of an income statement.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub concept: String,
    pub label: Option<String>,
    pub value: Option<f64>,
}

impl LineItem {
    fn from_json(item: &Value) -> Option<Self> {
        let text = |keys: &[&str]| keys.iter().find_map(|k| item.get(*k)?.as_str().map(str::to_string));
        let concept = text(&["concept", "name", "key", "item"]);
        let label = text(&["label", "title", "description"]);
        let value = ["value", "amount", "val"].iter().find_map(|k| numeric(item.get(*k)?));

        match (concept, label) {
            (None, None) => None,
            (Some(concept), label) => Some(Self { concept, label, value }),
            (None, Some(label)) => Some(Self { concept: label.clone(), label: Some(label), value }),
        }
    }

    fn normalized_keys(&self) -> Vec<String> {
        let mut keys = vec![normalize(&self.concept)];
        if let Some(label) = &self.label {
            let label = normalize(label);
            if !keys.contains(&label) {
                keys.push(label);
            }
        }
        keys.retain(|k| !k.is_empty());
        keys
    }
}

fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Lowercase, drop a taxonomy namespace, and keep only alphanumerics.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_ns = trimmed
        .find(|c: char| c == '_' || c == ':')
        .filter(|&pos| NAMESPACES.contains(&trimmed[..pos].to_lowercase().as_str()))
        .map(|pos| &trimmed[pos + 1..])
        .unwrap_or(trimmed);

    without_ns
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Locate the line-item array inside a quarterly report.
///
/// Tries [`CONTAINER_KEYS`] in the nested `report` object first, then the
/// report itself, and finally accepts the report if it is itself an array.
/// The first non-empty array wins; anything else yields an empty list.
pub fn extract_items(report: &Value) -> Vec<LineItem> {
    let mut scopes: Vec<&Value> = Vec::with_capacity(2);
    if let Some(inner) = report.get("report").filter(|r| r.is_object()) {
        scopes.push(inner);
    }
    scopes.push(report);

    let container = scopes
        .iter()
        .copied()
        .flat_map(|scope| CONTAINER_KEYS.iter().filter_map(move |key| scope.get(*key)))
        .chain(std::iter::once(report))
        .find_map(|candidate| candidate.as_array().filter(|items| !items.is_empty()));

    container
        .map(|items| items.iter().filter_map(LineItem::from_json).collect())
        .unwrap_or_default()
}

/// Resolve the first numeric value whose concept or label matches `aliases`.
///
/// Pass one requires an exact match after normalisation; pass two accepts
/// containment in either direction.
pub fn pick_value(items: &[LineItem], aliases: &[&str]) -> Option<f64> {
    let aliases: Vec<String> = aliases
        .iter()
        .map(|a| normalize(a))
        .filter(|a| !a.is_empty())
        .collect();
    let candidates: Vec<(Vec<String>, f64)> = items
        .iter()
        .filter_map(|item| Some((item.normalized_keys(), item.value?)))
        .collect();

    let exact = candidates
        .iter()
        .find(|(keys, _)| keys.iter().any(|k| aliases.contains(k)))
        .map(|(_, value)| *value);
    if exact.is_some() {
        return exact;
    }

    candidates
        .iter()
        .find(|(keys, _)| {
            keys.iter().filter(|k| k.chars().count() >= MIN_CONTAINMENT_LEN).any(|k| {
                aliases
                    .iter()
                    .filter(|a| a.chars().count() >= MIN_CONTAINMENT_LEN)
                    .any(|a| k.contains(a.as_str()) || a.contains(k.as_str()))
            })
        })
        .map(|(_, value)| *value)
}

pub fn pick_concept(items: &[LineItem], concept: Concept) -> Option<f64> {
    pick_value(items, concept.aliases())
}
