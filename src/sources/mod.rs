//! Source adapters and the throttled extraction loop.
//!
//! Modules:
//! - email: email archive extractor (header parsing, body preview, direction)
//! - calendar: calendar extractor (past non-recurring events, roles)
//! - gmail: reqwest-backed Gmail page client
//! - gcal: reqwest-backed Google Calendar page client

pub mod calendar;
pub mod email;
pub mod gcal;
pub mod gmail;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::SyncConfig;
use crate::error::SourceError;

/// Paged, per-record access to an upstream source. The transport behind it
/// (HTTP, test fixtures) is the external adapter seam.
#[async_trait]
pub trait RecordSource: Send + Sync {
    type Raw: Send;

    /// List the logical positions (record ids) to fetch, oldest first.
    async fn list_ids(&self) -> Result<Vec<String>, SourceError>;

    /// Fetch one record by id.
    async fn fetch_record(&self, id: &str) -> Result<Self::Raw, SourceError>;
}

/// Drive a full extraction over a source, batch by batch.
///
/// Records are fetched sequentially in batches of `extraction_batch_size`
/// with an `inter_batch_pause_ms` sleep between batches. A rate-limit signal
/// on an individual fetch pauses `rate_limit_pause_ms` (doubling per retry)
/// and retries the same logical position, up to `rate_limit_max_attempts`
/// attempts before the whole extraction fails with `RateLimited`. A
/// malformed record is skipped and extraction continues.
pub async fn fetch_throttled<S: RecordSource + ?Sized>(
    source: &S,
    cfg: &SyncConfig,
) -> Result<Vec<S::Raw>, SourceError> {
    let ids = source.list_ids().await?;
    let mut records = Vec::with_capacity(ids.len());

    for (i, id) in ids.iter().enumerate() {
        if i > 0 && i % cfg.extraction_batch_size.max(1) == 0 {
            tokio::time::sleep(Duration::from_millis(cfg.inter_batch_pause_ms)).await;
        }

        match fetch_with_rate_limit_retry(source, id, cfg).await {
            Ok(raw) => records.push(raw),
            Err(SourceError::Malformed(reason)) => {
                log::debug!("Skipping record {}: {}", id, reason);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(records)
}

/// Fetch a single record, absorbing rate-limit signals with a bounded
/// backoff-and-retry loop on the same logical position.
async fn fetch_with_rate_limit_retry<S: RecordSource + ?Sized>(
    source: &S,
    id: &str,
    cfg: &SyncConfig,
) -> Result<S::Raw, SourceError> {
    let attempts = cfg.rate_limit_max_attempts.max(1);
    for attempt in 1..=attempts {
        match source.fetch_record(id).await {
            Err(SourceError::RateLimited) if attempt < attempts => {
                let pause = cfg
                    .rate_limit_pause_ms
                    .saturating_mul(2u64.saturating_pow(attempt - 1));
                log::warn!(
                    "Rate limited on record {} (attempt {}/{}), pausing {}ms",
                    id,
                    attempt,
                    attempts,
                    pause
                );
                tokio::time::sleep(Duration::from_millis(pause)).await;
            }
            other => return other,
        }
    }
    Err(SourceError::RateLimited)
}

/// Transport-level retry policy for HTTP source clients.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

fn transient_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    Duration::from_millis(base)
}

/// Send an HTTP request, retrying transient transport failures (timeouts,
/// connect errors, 408/429/5xx) with exponential backoff.
///
/// A 403 is never retried here: the extractor loop owns the rate-limit
/// pause-and-retry policy for that signal.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, SourceError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(SourceError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if transient_status(status) && attempt < attempts {
                    let delay = retry_delay(attempt, policy);
                    log::warn!(
                        "source retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                if (err.is_timeout() || err.is_connect()) && attempt < attempts {
                    let delay = retry_delay(attempt, policy);
                    log::warn!(
                        "source retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(SourceError::Http(err));
            }
        }
    }

    Err(SourceError::Unavailable("request exhausted retries".to_string()))
}

/// Map a non-success HTTP status from a provider into a source error.
pub fn status_to_error(status: reqwest::StatusCode, body: String) -> SourceError {
    match status {
        reqwest::StatusCode::UNAUTHORIZED => SourceError::AuthExpired,
        reqwest::StatusCode::FORBIDDEN => SourceError::RateLimited,
        _ => SourceError::Unavailable(format!("HTTP {}: {}", status.as_u16(), body)),
    }
}
