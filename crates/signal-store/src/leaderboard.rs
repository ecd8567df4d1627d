use analysis_core::{AnalysisError, DailyLeaderboardEntry, Side};
use chrono::{DateTime, NaiveDate, Utc};

use crate::db::{format_day, format_ts, parse_day, SignalDb};

#[derive(Debug, sqlx::FromRow)]
struct LeaderboardRow {
    day: String,
    side: String,
    symbol: String,
    score: Option<f64>,
    close_price: Option<f64>,
    close_10bd: Option<f64>,
    pct_10bd: Option<f64>,
}

impl TryFrom<LeaderboardRow> for DailyLeaderboardEntry {
    type Error = AnalysisError;

    fn try_from(row: LeaderboardRow) -> Result<Self, Self::Error> {
        Ok(DailyLeaderboardEntry {
            day: parse_day(&row.day)?,
            side: row
                .side
                .parse::<Side>()
                .map_err(|e| AnalysisError::store("decode side", e))?,
            symbol: row.symbol,
            score: row.score,
            close_price: row.close_price,
            close_10bd: row.close_10bd,
            pct_10bd: row.pct_10bd,
        })
    }
}

/// Accessor for the derived daily leaderboard table.
#[derive(Clone, Debug)]
pub struct LeaderboardStore {
    db: SignalDb,
}

impl LeaderboardStore {
    pub fn new(db: SignalDb) -> Self {
        Self { db }
    }

    /// Replace the leaderboard of `day` with `entries` in one transaction.
    ///
    /// Rows are upserted on `(day, side, symbol)` and stamped with `run_id`;
    /// rows of the same day left over from other runs are removed, so running
    /// twice with the same input leaves the table unchanged.
    pub async fn upsert_day(
        &self,
        run_id: &str,
        day: NaiveDate,
        entries: &[DailyLeaderboardEntry],
        now: DateTime<Utc>,
    ) -> Result<u64, AnalysisError> {
        let day_text = format_day(day);
        let updated_at = format_ts(now);

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| AnalysisError::store("begin leaderboard upsert", e))?;

        let mut written = 0u64;
        for entry in entries.iter().filter(|e| e.day == day) {
            let result = sqlx::query(
                r#"
                INSERT INTO daily_leaderboard
                    (day, side, symbol, score, close_price, close_10bd, pct_10bd, run_id, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(day, side, symbol) DO UPDATE SET
                    score = excluded.score,
                    close_price = excluded.close_price,
                    close_10bd = excluded.close_10bd,
                    pct_10bd = excluded.pct_10bd,
                    run_id = excluded.run_id,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&day_text)
            .bind(entry.side.as_str())
            .bind(&entry.symbol)
            .bind(entry.score)
            .bind(entry.close_price)
            .bind(entry.close_10bd)
            .bind(entry.pct_10bd)
            .bind(run_id)
            .bind(&updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| AnalysisError::store("upsert leaderboard row", e))?;
            written += result.rows_affected();
        }

        let stale = sqlx::query("DELETE FROM daily_leaderboard WHERE day = ? AND run_id <> ?")
            .bind(&day_text)
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AnalysisError::store("remove stale leaderboard rows", e))?;

        tx.commit()
            .await
            .map_err(|e| AnalysisError::store("commit leaderboard upsert", e))?;

        if stale.rows_affected() > 0 {
            tracing::debug!(day = %day_text, removed = stale.rows_affected(), "Replaced stale leaderboard rows");
        }

        Ok(written)
    }

    /// Delete every row strictly before `cutoff`. Returns the number removed.
    pub async fn prune_before(&self, cutoff: NaiveDate) -> Result<u64, AnalysisError> {
        let result = sqlx::query("DELETE FROM daily_leaderboard WHERE day < ?")
            .bind(format_day(cutoff))
            .execute(self.db.pool())
            .await
            .map_err(|e| AnalysisError::store("prune leaderboard", e))?;

        Ok(result.rows_affected())
    }

    /// Rows with `day >= cutoff`, newest day first, then by score.
    pub async fn read_since(&self, cutoff: NaiveDate) -> Result<Vec<DailyLeaderboardEntry>, AnalysisError> {
        let rows = sqlx::query_as::<_, LeaderboardRow>(
            r#"
            SELECT day, side, symbol, score, close_price, close_10bd, pct_10bd
            FROM daily_leaderboard
            WHERE day >= ?
            ORDER BY day DESC, score IS NULL, score DESC, symbol ASC
            "#,
        )
        .bind(format_day(cutoff))
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| AnalysisError::store("read leaderboard", e))?;

        rows.into_iter().map(DailyLeaderboardEntry::try_from).collect()
    }
}
