//! Engine configuration.
//!
//! Two staleness windows exist by design-surface split: the client-held
//! cache uses a 7-day window, the server-held cache used by the background
//! refresh round trip uses a 24-hour window. Both are configurable and
//! deliberately never unified.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Tunables for extraction throttling and cache staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Staleness window for the client-held cache, in milliseconds (7 days).
    pub client_cache_ttl_ms: i64,
    /// Staleness window for the server-held cache, in milliseconds (24 hours).
    pub server_cache_ttl_ms: i64,
    /// Number of record fetches issued before pausing.
    pub extraction_batch_size: usize,
    /// Pause between record batches.
    pub inter_batch_pause_ms: u64,
    /// Base pause after a provider rate-limit signal (HTTP 403).
    pub rate_limit_pause_ms: u64,
    /// Cap on retries of the same logical position after rate-limit signals.
    /// The upstream behavior retried forever; here the loop fails with
    /// `SourceError::RateLimited` once the cap is hit.
    pub rate_limit_max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_cache_ttl_ms: 7 * 24 * 3600 * 1000,
            server_cache_ttl_ms: 24 * 3600 * 1000,
            extraction_batch_size: 10,
            inter_batch_pause_ms: 500,
            rate_limit_pause_ms: 5_000,
            rate_limit_max_attempts: 4,
        }
    }
}

impl SyncConfig {
    pub fn client_cache_ttl(&self) -> Duration {
        Duration::milliseconds(self.client_cache_ttl_ms)
    }

    pub fn server_cache_ttl(&self) -> Duration {
        Duration::milliseconds(self.server_cache_ttl_ms)
    }

    /// Load configuration from a JSON file. Missing file yields defaults;
    /// a malformed file is an error so bad config never fails silently.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config: {}", e))?;
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Zero out every pause for tests so throttling does not slow them down.
    #[cfg(test)]
    pub fn unthrottled() -> Self {
        Self {
            inter_batch_pause_ms: 0,
            rate_limit_pause_ms: 0,
            ..Self::default()
        }
    }
}
