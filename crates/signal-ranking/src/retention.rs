//! Daily leaderboard build and retention.
//!
//! A run reads the day's top BUY and SELL signals, enriches each with the
//! close ten business days back, upserts the result, and prunes days that
//! have left the retention window. Runs hold no state between invocations
//! and are safe to repeat.

use analysis_core::{
    AnalysisError, Bar, BusinessCalendar, DailyLeaderboardEntry, PriceHistorySource, Side, SignalEvent,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use market_data_client::{external_symbol, map_limit};
use serde::{Deserialize, Serialize};
use signal_store::{LeaderboardStore, SignalStore};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Signals kept per side per day.
    pub top_n: u32,
    /// Business days of leaderboard history to keep, today included.
    pub window_business_days: u32,
    /// Calendar-day history windows tried in order until enough bars arrive.
    pub lookback_days: Vec<i64>,
    /// Bars needed for a ten-business-day comparison (ten back plus today).
    pub required_bars: usize,
    pub enrich_concurrency: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            window_business_days: 10,
            lookback_days: vec![30, 60, 120, 240],
            required_bars: 11,
            enrich_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    FetchingTop,
    Enriching,
    Upserting,
    Pruning,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub ok: bool,
    pub day: NaiveDate,
    pub buy_count: usize,
    pub sell_count: usize,
    pub cutoff_day: NaiveDate,
    /// Rows deleted by pruning; `None` when pruning failed.
    pub pruned: Option<u64>,
}

/// Close `required_bars - 1` bars before the latest and the percent change since.
pub fn ten_day_change(bars: &[Bar], required_bars: usize) -> (Option<f64>, Option<f64>) {
    let lag = required_bars.saturating_sub(1);
    if lag == 0 || bars.len() < required_bars {
        return (None, None);
    }
    let latest = bars[bars.len() - 1].close;
    let base = bars[bars.len() - 1 - lag].close;
    let pct = (base != 0.0).then(|| (latest - base) / base * 100.0);
    (Some(base), pct)
}

pub struct RetentionManager {
    signals: SignalStore,
    leaderboard: LeaderboardStore,
    prices: Arc<dyn PriceHistorySource>,
    calendar: BusinessCalendar,
    config: RetentionConfig,
    symbol_suffix: String,
}

impl RetentionManager {
    pub fn new(
        signals: SignalStore,
        leaderboard: LeaderboardStore,
        prices: Arc<dyn PriceHistorySource>,
        calendar: BusinessCalendar,
    ) -> Self {
        Self {
            signals,
            leaderboard,
            prices,
            calendar,
            config: RetentionConfig::default(),
            symbol_suffix: String::new(),
        }
    }

    pub fn with_config(mut self, config: RetentionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_symbol_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.symbol_suffix = suffix.into();
        self
    }

    pub fn calendar(&self) -> &BusinessCalendar {
        &self.calendar
    }

    /// First day still inside the retention window as of `now`.
    pub fn cutoff_day(&self, now: DateTime<Utc>) -> NaiveDate {
        let day = self.calendar.current_business_day(now);
        BusinessCalendar::nth_recent_business_day(day, self.config.window_business_days)
    }

    pub async fn run(&self) -> Result<RunSummary, AnalysisError> {
        self.run_at(Utc::now()).await
    }

    /// One full pass for the business day containing `now`.
    ///
    /// Only reading the top signals and the upsert can fail the run; a prune
    /// failure is logged and reported as `pruned: None`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunSummary, AnalysisError> {
        let day = self.calendar.current_business_day(now);
        let cutoff_day = self.cutoff_day(now);
        let (start, end) = self.calendar.day_bounds_utc(day);

        enter(RunState::FetchingTop, day);
        let (buys, sells) = tokio::join!(
            self.signals.top_in_range(Side::Buy, start, end, self.config.top_n),
            self.signals.top_in_range(Side::Sell, start, end, self.config.top_n),
        );
        let (buys, sells) = (buys?, sells?);

        enter(RunState::Enriching, day);
        let entries = map_limit(buys.iter().chain(sells.iter()).cloned().collect::<Vec<_>>(), self.config.enrich_concurrency, |signal| async move {
            self.enrich(day, &signal, now).await
        })
        .await;

        enter(RunState::Upserting, day);
        let run_id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = self.leaderboard.upsert_day(&run_id, day, &entries, now).await {
            tracing::error!(%day, "Leaderboard upsert failed: {}", e);
            enter(RunState::Idle, day);
            return Err(e);
        }

        enter(RunState::Pruning, day);
        let pruned = match self.leaderboard.prune_before(cutoff_day).await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::error!(%cutoff_day, "Leaderboard prune failed, stale days kept until next run: {}", e);
                None
            }
        };

        enter(RunState::Idle, day);
        let summary = RunSummary {
            ok: true,
            day,
            buy_count: buys.len(),
            sell_count: sells.len(),
            cutoff_day,
            pruned,
        };
        tracing::info!(
            %day,
            %cutoff_day,
            buy_count = summary.buy_count,
            sell_count = summary.sell_count,
            pruned = ?summary.pruned,
            "Daily leaderboard run complete"
        );

        Ok(summary)
    }

    async fn enrich(&self, day: NaiveDate, signal: &SignalEvent, now: DateTime<Utc>) -> DailyLeaderboardEntry {
        let bars = self.history(&signal.symbol, now).await;
        let (close_10bd, pct_10bd) = ten_day_change(&bars, self.config.required_bars);

        DailyLeaderboardEntry {
            day,
            side: signal.side,
            symbol: signal.symbol.clone(),
            score: signal.score,
            close_price: bars.last().map(|b| b.close).or(signal.price),
            close_10bd,
            pct_10bd,
        }
    }

    /// Widen the history window until enough bars arrive; keep the best seen.
    async fn history(&self, symbol: &str, now: DateTime<Utc>) -> Vec<Bar> {
        let external = external_symbol(symbol, &self.symbol_suffix);
        let mut best: Vec<Bar> = Vec::new();

        for days in &self.config.lookback_days {
            match self.prices.daily_bars(&external, now - Duration::days(*days), now).await {
                Ok(bars) => {
                    if bars.len() > best.len() {
                        best = bars;
                    }
                    if best.len() >= self.config.required_bars {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(symbol = %external, window_days = *days, "Price history unavailable: {}", e);
                    break;
                }
            }
        }

        if best.len() < self.config.required_bars {
            tracing::debug!(symbol = %external, bars = best.len(), "Not enough history for ten-day change");
        }
        best
    }
}

fn enter(state: RunState, day: NaiveDate) {
    tracing::debug!(state = ?state, %day, "Leaderboard run state");
}
