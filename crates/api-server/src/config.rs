use anyhow::{Context, Result};
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_url: String,
    /// Shared secret for the cron trigger. Unset means the trigger is closed.
    pub cron_secret: Option<String>,
    /// Shared secret for signal ingestion; falls back to the cron secret.
    pub ingest_secret: Option<String>,
    pub finnhub_api_key: String,
    pub finnhub_base_url: String,
    pub news_impact_url: Option<String>,
    /// Exchange suffix for bare tickers, e.g. `.TO`.
    pub market_symbol_suffix: String,
    pub business_utc_offset_minutes: i32,
    pub leaderboard_top_n: u32,
    pub leaderboard_retention_days: u32,
    pub fetch_concurrency: usize,
    pub fetch_timeout_secs: u64,
    /// Upstream requests per minute.
    pub upstream_rate_limit: usize,
    pub universes: HashMap<String, Vec<String>>,
    pub ranking_max_limit: usize,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            database_url: "sqlite:signals.db".to_string(),
            cron_secret: None,
            ingest_secret: None,
            finnhub_api_key: String::new(),
            finnhub_base_url: market_data_client::finnhub::DEFAULT_BASE_URL.to_string(),
            news_impact_url: None,
            market_symbol_suffix: String::new(),
            business_utc_offset_minutes: -300,
            leaderboard_top_n: 10,
            leaderboard_retention_days: 10,
            fetch_concurrency: 4,
            fetch_timeout_secs: 8,
            upstream_rate_limit: 60,
            universes: HashMap::new(),
            ranking_max_limit: 100,
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let cron_secret = get("CRON_SECRET");
        let ingest_secret = get("SIGNAL_INGEST_SECRET").or_else(|| cron_secret.clone());

        let config = Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            cron_secret,
            ingest_secret,
            finnhub_api_key: get("FINNHUB_API_KEY").unwrap_or_default(),
            finnhub_base_url: get("FINNHUB_BASE_URL").unwrap_or(defaults.finnhub_base_url),
            news_impact_url: get("NEWS_IMPACT_URL"),
            market_symbol_suffix: get("MARKET_SYMBOL_SUFFIX").unwrap_or_default(),
            business_utc_offset_minutes: parse_or(&get, "BUSINESS_UTC_OFFSET_MINUTES", defaults.business_utc_offset_minutes)?,
            leaderboard_top_n: parse_or(&get, "LEADERBOARD_TOP_N", defaults.leaderboard_top_n)?,
            leaderboard_retention_days: parse_or(&get, "LEADERBOARD_RETENTION_DAYS", defaults.leaderboard_retention_days)?,
            fetch_concurrency: parse_or(&get, "FETCH_CONCURRENCY", defaults.fetch_concurrency)?,
            fetch_timeout_secs: parse_or(&get, "FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs)?,
            upstream_rate_limit: parse_or(&get, "UPSTREAM_RATE_LIMIT", defaults.upstream_rate_limit)?,
            universes: get("RANKING_UNIVERSES").map(|raw| parse_universes(&raw)).unwrap_or_default(),
            ranking_max_limit: parse_or(&get, "RANKING_MAX_LIMIT", defaults.ranking_max_limit)?,
            log_format: match get("LOG_FORMAT") {
                Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.leaderboard_top_n > 0, "LEADERBOARD_TOP_N must be positive");
        anyhow::ensure!(self.leaderboard_retention_days > 0, "LEADERBOARD_RETENTION_DAYS must be positive");
        anyhow::ensure!(self.fetch_concurrency > 0, "FETCH_CONCURRENCY must be positive");
        anyhow::ensure!(self.fetch_timeout_secs > 0, "FETCH_TIMEOUT_SECS must be positive");
        anyhow::ensure!(self.ranking_max_limit > 0, "RANKING_MAX_LIMIT must be positive");
        Ok(())
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw.parse().with_context(|| format!("invalid {key}: '{raw}'")),
        None => Ok(default),
    }
}

/// Parse `name=SYM,SYM;other=SYM` into upper-cased symbol lists.
pub fn parse_universes(raw: &str) -> HashMap<String, Vec<String>> {
    raw.split(';')
        .filter_map(|entry| {
            let (name, symbols) = entry.split_once('=')?;
            let name = name.trim().to_lowercase();
            let symbols: Vec<String> = symbols
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            (!name.is_empty() && !symbols.is_empty()).then_some((name, symbols))
        })
        .collect()
}
