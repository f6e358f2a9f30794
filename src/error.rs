//! Error taxonomy for the reconciliation engine.
//!
//! Propagation policy: only `AuthExpired` is surfaced as a hard failure to
//! the caller. Everything else is absorbed with best-effort degradation so a
//! read returns some valid contact list whenever at least one source is
//! reachable.

/// Errors raised while talking to an upstream source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source credentials expired or invalid")]
    AuthExpired,
    #[error("provider rate limit exceeded")]
    RateLimited,
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the cache/sync orchestrator and persistence layers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("source credentials expired or invalid")]
    AuthExpired,
    #[error("cached payload failed shape validation: {0}")]
    CacheCorrupt(String),
    #[error("persistence unavailable: {0}")]
    Persistence(String),
    #[error("a foreground fetch is already in flight for this session")]
    FetchInFlight,
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}
