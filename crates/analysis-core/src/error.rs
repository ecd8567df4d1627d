use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Upstream answered 429 and the retry budget is spent.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The per-call time budget ran out before a response arrived.
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A statement or payload had no shape we recognise.
    #[error("Parse incomplete: {0}")]
    ParseIncomplete(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),
}

impl AnalysisError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AnalysisError::Timeout(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AnalysisError::RateLimited(_))
    }

    /// Wrap a persistence failure with the operation that produced it.
    pub fn store(context: &str, err: impl std::fmt::Display) -> Self {
        AnalysisError::Store(format!("{context}: {err}"))
    }
}
