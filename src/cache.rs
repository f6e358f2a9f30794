//! Cache persistence and fail-closed shape validation.
//!
//! The orchestrator owns staleness policy; this module owns the storage
//! seam and the corrupt-payload detection that feeds the CorruptPurge
//! transition. Any decode failure is treated as `CacheCorrupt` — a corrupt
//! entry is purged, never served and never a panic.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::EngineError;
use crate::types::CacheEntry;

/// Storage seam for the session-keyed contact cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Load the raw persisted payload for a session, if any. The payload is
    /// returned undecoded so shape validation can fail closed.
    async fn load(&self, session: &str) -> Result<Option<Value>, EngineError>;

    async fn save(&self, session: &str, entry: &CacheEntry) -> Result<(), EngineError>;

    async fn purge(&self, session: &str) -> Result<(), EngineError>;
}

/// Decode a raw cache payload, failing closed on any shape problem:
/// `contacts` missing or not an array, a zero-length array, a first element
/// missing its identity fields, or any typed decode error.
pub fn decode_entry(raw: Value) -> Result<CacheEntry, EngineError> {
    let contacts = raw
        .get("contacts")
        .ok_or_else(|| EngineError::CacheCorrupt("missing contacts".to_string()))?;
    let array = contacts
        .as_array()
        .ok_or_else(|| EngineError::CacheCorrupt("contacts is not an array".to_string()))?;
    if array.is_empty() {
        return Err(EngineError::CacheCorrupt("contacts array is empty".to_string()));
    }
    let first = &array[0];
    if first.get("id").and_then(Value::as_str).is_none()
        || first.get("email").and_then(Value::as_str).is_none()
    {
        return Err(EngineError::CacheCorrupt(
            "first contact missing identity fields".to_string(),
        ));
    }

    serde_json::from_value(raw).map_err(|e| EngineError::CacheCorrupt(e.to_string()))
}

/// In-memory cache store backed by a concurrent map. Readers get a clone of
/// the stored payload; a save replaces the whole value atomically, so a
/// concurrent reader sees either the old entry or the new one.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, Value>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw payload directly. Test-and-recovery hook: lets corrupt
    /// shapes be injected the way a damaged persisted file would present.
    pub fn seed_raw(&self, session: &str, raw: Value) {
        self.entries.insert(session.to_string(), raw);
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self, session: &str) -> Result<Option<Value>, EngineError> {
        Ok(self.entries.get(session).map(|v| v.value().clone()))
    }

    async fn save(&self, session: &str, entry: &CacheEntry) -> Result<(), EngineError> {
        let raw = serde_json::to_value(entry)?;
        self.entries.insert(session.to_string(), raw);
        Ok(())
    }

    async fn purge(&self, session: &str) -> Result<(), EngineError> {
        self.entries.remove(session);
        Ok(())
    }
}

/// File-backed cache store: one JSON file per session under a directory.
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn session_path(&self, session: &str) -> PathBuf {
        // Session keys are opaque; keep the filename filesystem-safe.
        let safe: String = session
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn load(&self, session: &str) -> Result<Option<Value>, EngineError> {
        let path = self.session_path(session);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::Persistence(format!("Failed to read cache: {}", e)))?;
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            // Unparsable file presents as a corrupt payload, not a miss.
            Err(_) => Ok(Some(Value::String(content))),
        }
    }

    async fn save(&self, session: &str, entry: &CacheEntry) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| EngineError::Persistence(format!("Failed to create cache dir: {}", e)))?;
        let content = serde_json::to_string_pretty(entry)?;
        std::fs::write(self.session_path(session), content)
            .map_err(|e| EngineError::Persistence(format!("Failed to write cache: {}", e)))
    }

    async fn purge(&self, session: &str) -> Result<(), EngineError> {
        let path = self.session_path(session);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| EngineError::Persistence(format!("Failed to purge cache: {}", e)))?;
        }
        Ok(())
    }
}
