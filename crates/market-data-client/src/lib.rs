pub mod fetcher;
pub mod finnhub;
pub mod news;
pub mod rate_limiter;
pub mod retry;

pub use fetcher::{map_limit, BoundedFetcher, DEFAULT_TIMEOUT};
pub use finnhub::FinnhubClient;
pub use news::NewsImpactClient;
pub use rate_limiter::RateLimiter;
pub use retry::{RetryAfterPolicy, RetryPolicy, Sleeper, TokioSleeper};

/// Qualify a bare ticker for the upstream exchange, e.g. `SHOP` + `.TO`.
/// Symbols that already carry a qualifier are left alone.
pub fn external_symbol(symbol: &str, suffix: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    if suffix.is_empty() || symbol.contains('.') {
        symbol
    } else {
        format!("{symbol}{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_symbol() {
        assert_eq!(external_symbol("shop", ".TO"), "SHOP.TO");
        assert_eq!(external_symbol("RY.TO", ".TO"), "RY.TO");
        assert_eq!(external_symbol("AAPL", ""), "AAPL");
    }
}
