//! Cache & sync orchestrator.
//!
//! Owns the per-session state machine:
//! Empty -> ForegroundLoading -> Ready -> (BackgroundRefreshing -> Ready)*,
//! with CorruptPurge -> Empty as a side transition. Reads while Ready return
//! the cached contacts immediately; a corrupt payload is purged and the read
//! falls back to a blocking foreground fetch.
//!
//! Two staleness windows are honored: the client-held window gates reads,
//! the server-held window gates the background-refresh round trip. They are
//! configured independently and never unified.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

use crate::cache::{decode_entry, CacheStore};
use crate::error::EngineError;
use crate::pipeline::{FetchPhase, Pipeline};
use crate::types::{CacheEntry, Contact};

/// How long the transient "fresh data available" signal stays up.
const FRESH_SIGNAL_TTL_MS: u64 = 3_000;

/// Result of a background refresh round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub refreshed_count: usize,
}

struct SessionState {
    /// Single-flight guards: at most one fetch of a given kind in flight.
    /// A second concurrent foreground request is rejected, not queued; a
    /// second concurrent background request is skipped.
    foreground: tokio::sync::Mutex<()>,
    background: tokio::sync::Mutex<()>,
    /// Monotone fetch generation; only the most recently initiated fetch
    /// is allowed to commit a cache entry.
    generation: AtomicU64,
    /// The automatic background refresh fires at most once per session.
    background_started: AtomicBool,
    fresh_data: Arc<AtomicBool>,
    progress: watch::Sender<FetchPhase>,
}

impl SessionState {
    fn new() -> Self {
        let (progress, _) = watch::channel(FetchPhase::Idle);
        Self {
            foreground: tokio::sync::Mutex::new(()),
            background: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            background_started: AtomicBool::new(false),
            fresh_data: Arc::new(AtomicBool::new(false)),
            progress,
        }
    }
}

/// Session-keyed orchestrator over one pipeline and one cache store.
///
/// No process-wide singletons: callers hold this behind an `Arc` and pass
/// it wherever reads happen.
pub struct SyncOrchestrator {
    pipeline: Pipeline,
    cache: Arc<dyn CacheStore>,
    sessions: DashMap<String, Arc<SessionState>>,
}

impl SyncOrchestrator {
    pub fn new(pipeline: Pipeline, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            pipeline,
            cache,
            sessions: DashMap::new(),
        }
    }

    fn session(&self, key: &str) -> Arc<SessionState> {
        self.sessions
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(SessionState::new()))
            .clone()
    }

    /// Foreground or cache-served read.
    ///
    /// With a valid cache entry the contacts are returned immediately and
    /// the one-shot background refresh is kicked off. Otherwise (or when
    /// `force_refresh` bypasses the staleness check entirely) a blocking
    /// foreground fetch runs under the single-flight guard.
    pub async fn fetch_contacts(
        self: &Arc<Self>,
        session: &str,
        force_refresh: bool,
    ) -> Result<Vec<Contact>, EngineError> {
        let state = self.session(session);

        if !force_refresh {
            match self
                .load_valid_entry(session, self.pipeline.config.client_cache_ttl())
                .await
            {
                Ok(Some(entry)) => {
                    self.spawn_background_refresh_once(session, &state);
                    return Ok(entry.contacts);
                }
                Ok(None) => {}
                Err(EngineError::CacheCorrupt(reason)) => {
                    // CorruptPurge -> Empty, then fall through to a
                    // foreground fetch.
                    log::warn!("Purging corrupt cache for session {}: {}", session, reason);
                    if let Err(e) = self.cache.purge(session).await {
                        log::warn!("Cache purge failed: {}", e);
                    }
                }
                Err(e) => {
                    log::warn!("Cache load failed, falling back to fetch: {}", e);
                }
            }
        }

        self.foreground_fetch(session, &state).await
    }

    /// Non-blocking background variant: serves the server-held cache when
    /// it is inside the 24-hour window, otherwise refetches and atomically
    /// replaces the entry. On failure the existing cache is left untouched.
    pub async fn refresh_contacts_in_background(
        self: &Arc<Self>,
        session: &str,
    ) -> Result<RefreshOutcome, EngineError> {
        let state = self.session(session);

        // Single-flight for the background kind: a concurrent second call
        // is skipped rather than fetching against the providers twice.
        let Ok(_guard) = state.background.try_lock() else {
            log::debug!(
                "Background refresh already in flight for session {}, skipping",
                session
            );
            return Ok(RefreshOutcome { refreshed_count: 0 });
        };

        match self
            .load_valid_entry(session, self.pipeline.config.server_cache_ttl())
            .await
        {
            Ok(Some(entry)) => {
                return Ok(RefreshOutcome {
                    refreshed_count: entry.contacts.len(),
                })
            }
            Ok(None) => {}
            Err(e) => log::warn!("Background refresh cache check failed: {}", e),
        }

        let fetch_id = Uuid::new_v4();
        let my_generation = state.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (progress, _) = watch::channel(FetchPhase::Idle);
        let contacts = match self.pipeline.run(&progress).await {
            Ok(contacts) => contacts,
            Err(EngineError::AuthExpired) => return Err(EngineError::AuthExpired),
            Err(e) => {
                log::warn!("Background refresh {} failed, cache untouched: {}", fetch_id, e);
                return Ok(RefreshOutcome { refreshed_count: 0 });
            }
        };

        if contacts.is_empty() {
            log::warn!(
                "Background refresh {} produced no contacts, cache untouched",
                fetch_id
            );
            return Ok(RefreshOutcome { refreshed_count: 0 });
        }

        if !self
            .commit(session, &state, my_generation, &contacts)
            .await
        {
            log::info!("Background refresh {} superseded, skipping commit", fetch_id);
            return Ok(RefreshOutcome { refreshed_count: 0 });
        }

        self.raise_fresh_data_signal(&state);
        Ok(RefreshOutcome {
            refreshed_count: contacts.len(),
        })
    }

    /// Whether fresh data landed within the last few seconds. The signal
    /// auto-clears.
    pub fn fresh_data_available(&self, session: &str) -> bool {
        self.session(session).fresh_data.load(Ordering::SeqCst)
    }

    /// Subscribe to the 0-100 progress signal for a session's foreground
    /// fetch.
    pub fn progress(&self, session: &str) -> watch::Receiver<FetchPhase> {
        self.session(session).progress.subscribe()
    }

    async fn foreground_fetch(
        self: &Arc<Self>,
        session: &str,
        state: &Arc<SessionState>,
    ) -> Result<Vec<Contact>, EngineError> {
        let _guard = state
            .foreground
            .try_lock()
            .map_err(|_| EngineError::FetchInFlight)?;

        let fetch_id = Uuid::new_v4();
        let my_generation = state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("Foreground fetch {} for session {}", fetch_id, session);

        let _ = state.progress.send(FetchPhase::AuthCheck);
        let contacts = self.pipeline.run(&state.progress).await?;

        if contacts.is_empty() {
            log::warn!("Foreground fetch {} produced no contacts, not cached", fetch_id);
        } else if !self
            .commit(session, state, my_generation, &contacts)
            .await
        {
            log::info!("Foreground fetch {} superseded, skipping commit", fetch_id);
        }

        let _ = state.progress.send(FetchPhase::Committed);
        Ok(contacts)
    }

    /// Commit a completed fetch's result, unless a newer fetch has been
    /// initiated since. Persistence failure is logged, never propagated.
    async fn commit(
        &self,
        session: &str,
        state: &SessionState,
        my_generation: u64,
        contacts: &[Contact],
    ) -> bool {
        if state.generation.load(Ordering::SeqCst) != my_generation {
            return false;
        }
        let entry = CacheEntry {
            contacts: contacts.to_vec(),
            cached_at: Utc::now(),
            owner: session.to_string(),
        };
        if let Err(e) = self.cache.save(session, &entry).await {
            log::warn!("Cache write failed (fire-and-forget): {}", e);
        }
        true
    }

    async fn load_valid_entry(
        &self,
        session: &str,
        ttl: chrono::Duration,
    ) -> Result<Option<CacheEntry>, EngineError> {
        let Some(raw) = self.cache.load(session).await? else {
            return Ok(None);
        };
        let entry = decode_entry(raw)?;
        if Utc::now() - entry.cached_at < ttl {
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    /// After the first cache-served read, refresh in the background exactly
    /// once per session. Readers keep hitting the still-valid entry while
    /// this runs.
    fn spawn_background_refresh_once(self: &Arc<Self>, session: &str, state: &Arc<SessionState>) {
        if state
            .background_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let orchestrator = Arc::clone(self);
        let session = session.to_string();
        tokio::spawn(async move {
            match orchestrator.refresh_contacts_in_background(&session).await {
                Ok(outcome) => log::debug!(
                    "Background refresh for session {} done ({} contacts)",
                    session,
                    outcome.refreshed_count
                ),
                Err(e) => log::warn!("Background refresh for session {} failed: {}", session, e),
            }
        });
    }

    fn raise_fresh_data_signal(&self, state: &SessionState) {
        state.fresh_data.store(true, Ordering::SeqCst);
        let fresh = Arc::clone(&state.fresh_data);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(FRESH_SIGNAL_TTL_MS)).await;
            fresh.store(false, Ordering::SeqCst);
        });
    }
}
