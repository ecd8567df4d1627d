use analysis_core::AnalysisError;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct SignalDb {
    pool: SqlitePool,
}

impl SignalDb {
    /// Open (creating if needed) the database and apply the schema.
    pub async fn new(database_url: &str) -> Result<Self, AnalysisError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AnalysisError::store("parse database url", e))?
            .create_if_missing(true);

        // Every connection to `:memory:` is its own database, so pin the pool to one.
        let in_memory = database_url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| AnalysisError::store("connect", e))?;

        let db = Self { pool };
        db.init_schema().await?;

        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), AnalysisError> {
        let schema = include_str!("../schema.sql");

        // sqlx executes one statement per query
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if stmt.lines().all(|l| l.trim().is_empty() || l.trim_start().starts_with("--")) {
                continue;
            }
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| AnalysisError::store("init schema", e))?;
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Fixed-width UTC text so lexical order equals chronological order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, AnalysisError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AnalysisError::store("decode timestamp", e))
}

pub(crate) fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_day(raw: &str) -> Result<NaiveDate, AnalysisError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| AnalysisError::store("decode day", e))
}
