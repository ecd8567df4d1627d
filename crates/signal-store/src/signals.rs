use analysis_core::{join_reasons, parse_reasons, AnalysisError, NewSignal, Outcome, Side, SignalEvent};
use chrono::{DateTime, Utc};

use crate::db::{format_ts, parse_ts, SignalDb};

const SIGNAL_COLUMNS: &str = "id, symbol, side, price, score, reasons, created_at, outcome";

#[derive(Debug, sqlx::FromRow)]
struct SignalRow {
    id: i64,
    symbol: String,
    side: String,
    price: Option<f64>,
    score: Option<f64>,
    reasons: String,
    created_at: String,
    outcome: Option<String>,
}

impl TryFrom<SignalRow> for SignalEvent {
    type Error = AnalysisError;

    fn try_from(row: SignalRow) -> Result<Self, Self::Error> {
        let side: Side = row
            .side
            .parse()
            .map_err(|e| AnalysisError::store("decode side", e))?;
        let outcome = row
            .outcome
            .as_deref()
            .map(str::parse::<Outcome>)
            .transpose()
            .map_err(|e| AnalysisError::store("decode outcome", e))?;

        Ok(SignalEvent {
            id: row.id,
            symbol: row.symbol,
            side,
            price: row.price,
            score: row.score,
            reasons: parse_reasons(&row.reasons),
            created_at: parse_ts(&row.created_at)?,
            outcome,
        })
    }
}

fn into_events(rows: Vec<SignalRow>) -> Result<Vec<SignalEvent>, AnalysisError> {
    rows.into_iter().map(SignalEvent::try_from).collect()
}

/// Reads and writes raw signal events.
#[derive(Clone, Debug)]
pub struct SignalStore {
    db: SignalDb,
}

impl SignalStore {
    pub fn new(db: SignalDb) -> Self {
        Self { db }
    }

    /// Validate and append a signal, returning it with its assigned id.
    pub async fn insert(&self, signal: NewSignal) -> Result<SignalEvent, AnalysisError> {
        let signal = signal.validated()?;
        let created_at = format_ts(signal.created_at);
        let result = sqlx::query(
            r#"
            INSERT INTO signals (symbol, side, price, score, reasons, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.symbol)
        .bind(signal.side.as_str())
        .bind(signal.price)
        .bind(signal.score)
        .bind(join_reasons(&signal.reasons))
        .bind(&created_at)
        .execute(self.db.pool())
        .await
        .map_err(|e| AnalysisError::store("insert signal", e))?;

        tracing::debug!(symbol = %signal.symbol, side = %signal.side, "Stored signal");

        Ok(SignalEvent {
            id: result.last_insert_rowid(),
            symbol: signal.symbol,
            side: signal.side,
            price: signal.price,
            score: signal.score,
            reasons: signal.reasons,
            // Echo what was stored, at millisecond precision.
            created_at: parse_ts(&created_at)?,
            outcome: None,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<SignalEvent>, AnalysisError> {
        let row = sqlx::query_as::<_, SignalRow>(&format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| AnalysisError::store("get signal", e))?;

        row.map(SignalEvent::try_from).transpose()
    }

    /// Most recent `limit` signals, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<SignalEvent>, AnalysisError> {
        let rows = sqlx::query_as::<_, SignalRow>(&format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals ORDER BY created_at DESC, id DESC LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| AnalysisError::store("recent signals", e))?;

        into_events(rows)
    }

    /// Top `k` signals of one side created in `[start, end)`.
    ///
    /// Each symbol contributes only its best signal. Ordered by score
    /// descending (unscored last), then newest first.
    pub async fn top_in_range(
        &self,
        side: Side,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        k: u32,
    ) -> Result<Vec<SignalEvent>, AnalysisError> {
        let rows = sqlx::query_as::<_, SignalRow>(&format!(
            r#"
            SELECT {SIGNAL_COLUMNS} FROM (
                SELECT {SIGNAL_COLUMNS},
                       ROW_NUMBER() OVER (
                           PARTITION BY symbol
                           ORDER BY score IS NULL, score DESC, created_at DESC, id DESC
                       ) AS rank_in_symbol
                FROM signals
                WHERE side = ? AND created_at >= ? AND created_at < ?
            )
            WHERE rank_in_symbol = 1
            ORDER BY score IS NULL, score DESC, created_at DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(side.as_str())
        .bind(format_ts(start))
        .bind(format_ts(end))
        .bind(i64::from(k))
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| AnalysisError::store("top signals", e))?;

        into_events(rows)
    }

    /// The newest signal of every symbol seen since `since`.
    pub async fn latest_per_symbol_since(&self, since: DateTime<Utc>) -> Result<Vec<SignalEvent>, AnalysisError> {
        let rows = sqlx::query_as::<_, SignalRow>(&format!(
            r#"
            SELECT {SIGNAL_COLUMNS} FROM (
                SELECT {SIGNAL_COLUMNS},
                       ROW_NUMBER() OVER (PARTITION BY symbol ORDER BY created_at DESC, id DESC) AS rank_in_symbol
                FROM signals
                WHERE created_at >= ?
            )
            WHERE rank_in_symbol = 1
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(format_ts(since))
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| AnalysisError::store("latest signals", e))?;

        into_events(rows)
    }

    /// Record the outcome of a signal. Unknown ids are a validation error.
    pub async fn set_outcome(&self, id: i64, outcome: Outcome) -> Result<SignalEvent, AnalysisError> {
        let result = sqlx::query("UPDATE signals SET outcome = ? WHERE id = ?")
            .bind(outcome.as_str())
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(|e| AnalysisError::store("set outcome", e))?;

        if result.rows_affected() == 0 {
            return Err(AnalysisError::Validation(format!("signal {id} not found")));
        }

        self.get(id)
            .await?
            .ok_or_else(|| AnalysisError::Validation(format!("signal {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    async fn store() -> SignalStore {
        SignalStore::new(SignalDb::new("sqlite::memory:").await.unwrap())
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, h, m, 0).unwrap()
    }

    fn signal(symbol: &str, side: Side, score: Option<f64>, created_at: DateTime<Utc>) -> NewSignal {
        NewSignal {
            symbol: symbol.to_string(),
            side,
            price: Some(100.0),
            score,
            reasons: vec!["rsi_oversold".to_string(), "macd_cross".to_string()],
            created_at,
        }
    }

    #[tokio::test]
    async fn test_insert_returns_stored_timestamp() {
        let store = store().await;
        let precise = at(14, 0) + Duration::nanoseconds(1_234_567);
        let event = store.insert(signal("AAPL", Side::Buy, Some(70.0), precise)).await.unwrap();

        assert_eq!(event.created_at, at(14, 0) + Duration::milliseconds(1));
        assert_eq!(store.get(event.id).await.unwrap(), Some(event));
    }

    #[tokio::test]
    async fn test_insert_and_recent() {
        let store = store().await;
        let first = store.insert(signal(" aapl ", Side::Buy, Some(70.0), at(14, 0))).await.unwrap();
        store.insert(signal("MSFT", Side::Sell, None, at(15, 0))).await.unwrap();

        assert_eq!(first.symbol, "AAPL");
        assert!(first.id > 0);

        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].symbol, "MSFT");
        assert_eq!(recent[1].reasons, vec!["rsi_oversold", "macd_cross"]);
        assert_eq!(recent[1].created_at, at(14, 0));
        assert_eq!(store.recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid() {
        let store = store().await;
        let err = store.insert(signal("  ", Side::Buy, Some(1.0), at(14, 0))).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
        let err = store.insert(signal("X", Side::Buy, Some(f64::NAN), at(14, 0))).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
        assert!(store.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_in_range_orders_and_filters() {
        let store = store().await;
        store.insert(signal("AAA", Side::Buy, Some(80.0), at(14, 0))).await.unwrap();
        store.insert(signal("BBB", Side::Buy, Some(90.0), at(14, 5))).await.unwrap();
        store.insert(signal("CCC", Side::Buy, Some(80.0), at(15, 0))).await.unwrap();
        store.insert(signal("DDD", Side::Buy, None, at(16, 0))).await.unwrap();
        store.insert(signal("EEE", Side::Sell, Some(99.0), at(14, 0))).await.unwrap();
        // Outside the window on either side.
        store.insert(signal("OLD", Side::Buy, Some(99.0), at(4, 59))).await.unwrap();
        store
            .insert(signal("NEW", Side::Buy, Some(99.0), at(5, 0) + Duration::days(1)))
            .await
            .unwrap();

        let (start, end) = (at(5, 0), at(5, 0) + Duration::days(1));
        let top = store.top_in_range(Side::Buy, start, end, 10).await.unwrap();
        let symbols: Vec<&str> = top.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BBB", "CCC", "AAA", "DDD"]);

        let top2 = store.top_in_range(Side::Buy, start, end, 2).await.unwrap();
        assert_eq!(top2.len(), 2);
    }

    #[tokio::test]
    async fn test_top_in_range_keeps_best_signal_per_symbol() {
        let store = store().await;
        store.insert(signal("AAA", Side::Buy, Some(60.0), at(14, 0))).await.unwrap();
        store.insert(signal("AAA", Side::Buy, Some(85.0), at(15, 0))).await.unwrap();
        store.insert(signal("BBB", Side::Buy, Some(70.0), at(16, 0))).await.unwrap();

        let top = store.top_in_range(Side::Buy, at(5, 0), at(23, 0), 10).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].symbol, "AAA");
        assert_eq!(top[0].score, Some(85.0));
    }

    #[tokio::test]
    async fn test_latest_per_symbol_since() {
        let store = store().await;
        store.insert(signal("AAA", Side::Buy, Some(60.0), at(14, 0))).await.unwrap();
        store.insert(signal("AAA", Side::Sell, Some(30.0), at(15, 0))).await.unwrap();
        store.insert(signal("BBB", Side::Buy, Some(70.0), at(9, 0))).await.unwrap();

        let latest = store.latest_per_symbol_since(at(10, 0)).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].side, Side::Sell);
        assert_eq!(latest[0].score, Some(30.0));
    }

    #[tokio::test]
    async fn test_set_outcome() {
        let store = store().await;
        let stored = store.insert(signal("AAA", Side::Buy, Some(60.0), at(14, 0))).await.unwrap();

        let updated = store.set_outcome(stored.id, Outcome::Win).await.unwrap();
        assert_eq!(updated.outcome, Some(Outcome::Win));
        assert_eq!(updated.score, stored.score);

        let err = store.set_outcome(stored.id + 100, Outcome::Loss).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
    }
}
