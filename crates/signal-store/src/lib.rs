//! SQLite persistence for raw signal events and the daily leaderboard.

pub mod db;
pub mod leaderboard;
pub mod signals;

pub use db::SignalDb;
pub use leaderboard::LeaderboardStore;
pub use signals::SignalStore;
