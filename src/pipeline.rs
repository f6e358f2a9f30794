//! One full reconciliation pass.
//!
//! Email and calendar extraction run as parallel tasks joined with a
//! barrier; the merger never starts until both sources have completed or
//! definitively failed. A source that fails with anything other than an
//! auth error contributes an empty map and the other source's data still
//! proceeds, so a pass returns some valid contact list whenever at least
//! one source is reachable.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use crate::config::SyncConfig;
use crate::error::{EngineError, SourceError};
use crate::merge;
use crate::overlay::{self, OverlayStore};
use crate::photos::{self, PhotoDirectory};
use crate::sources::calendar::RawCalendarEvent;
use crate::sources::email::RawEmailRecord;
use crate::sources::{self, RecordSource};
use crate::threads;
use crate::types::{Contact, InteractionRecord};

/// Progress through a foreground fetch, reported as a monotone 0-100 signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    AuthCheck,
    RequestSent,
    ResponseReceived,
    OverlayApplied,
    EnrichmentApplied,
    Committed,
}

impl FetchPhase {
    pub fn percent(&self) -> u8 {
        match self {
            FetchPhase::Idle => 0,
            FetchPhase::AuthCheck => 20,
            FetchPhase::RequestSent => 40,
            FetchPhase::ResponseReceived => 60,
            FetchPhase::OverlayApplied => 80,
            FetchPhase::EnrichmentApplied => 90,
            FetchPhase::Committed => 100,
        }
    }
}

/// The collaborators one reconciliation pass needs.
pub struct Pipeline {
    pub email_source: Arc<dyn RecordSource<Raw = RawEmailRecord>>,
    pub calendar_source: Arc<dyn RecordSource<Raw = RawCalendarEvent>>,
    pub photo_directory: Arc<dyn PhotoDirectory>,
    pub overlay_store: Arc<dyn OverlayStore>,
    /// The authenticated user, for direction and self-filtering.
    pub user_email: String,
    pub config: SyncConfig,
}

impl Pipeline {
    /// Run one pass: extract both sources in parallel, collapse email
    /// threads, merge, apply the overlay, then enrich photos.
    ///
    /// Only `AuthExpired` escapes as a hard failure.
    pub async fn run(
        &self,
        progress: &watch::Sender<FetchPhase>,
    ) -> Result<Vec<Contact>, EngineError> {
        let _ = progress.send(FetchPhase::RequestSent);

        // Barrier: the merger must not start until both extractions are done.
        let (email_raw, calendar_raw) = tokio::join!(
            sources::fetch_throttled(self.email_source.as_ref(), &self.config),
            sources::fetch_throttled(self.calendar_source.as_ref(), &self.config),
        );

        let email_raw = absorb_source_failure("email", email_raw)?;
        let calendar_raw = absorb_source_failure("calendar", calendar_raw)?;
        let _ = progress.send(FetchPhase::ResponseReceived);

        let email_interactions =
            sources::email::extract_interactions(&email_raw, &self.user_email);
        let calendar_interactions =
            sources::calendar::extract_interactions(&calendar_raw, &self.user_email, Utc::now());

        let email_map = threads::collapse_threads(email_interactions);
        let calendar_map = reduce_calendar(calendar_interactions);

        let contacts = merge::merge_sources(email_map, calendar_map);

        // Overlay store failure degrades to un-overlaid canonical contacts.
        let overlay_map = match self.overlay_store.load_all().await {
            Ok(map) => map,
            Err(e) => {
                log::warn!("Overlay store unavailable, serving canonical contacts: {}", e);
                HashMap::new()
            }
        };
        let mut contacts = overlay::apply_overlay(contacts, &overlay_map);
        let _ = progress.send(FetchPhase::OverlayApplied);

        photos::enrich_photos(&mut contacts, self.photo_directory.as_ref()).await;
        let _ = progress.send(FetchPhase::EnrichmentApplied);

        Ok(contacts)
    }
}

fn reduce_calendar(
    interactions: Vec<InteractionRecord>,
) -> HashMap<String, InteractionRecord> {
    merge::latest_per_counterpart(interactions)
}

/// Degrade a failed extraction to an empty page, except for auth failures
/// which must surface to the caller for re-authentication.
fn absorb_source_failure<T>(
    source: &str,
    result: Result<Vec<T>, SourceError>,
) -> Result<Vec<T>, EngineError> {
    match result {
        Ok(records) => Ok(records),
        Err(SourceError::AuthExpired) => Err(EngineError::AuthExpired),
        Err(e) => {
            log::warn!("{} extraction failed, continuing without it: {}", source, e);
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixture sources shared by pipeline and orchestrator tests.

    use std::collections::HashMap;

    use async_trait::async_trait;
    use base64::Engine;
    use parking_lot::RwLock;

    use super::*;
    use crate::overlay::merge_edit;
    use crate::types::ContactEdit;

    pub struct FixtureEmailSource {
        pub records: Vec<RawEmailRecord>,
        pub fail_with: RwLock<Option<fn() -> SourceError>>,
    }

    impl FixtureEmailSource {
        pub fn new(records: Vec<RawEmailRecord>) -> Self {
            Self {
                records,
                fail_with: RwLock::new(None),
            }
        }
    }

    #[async_trait]
    impl RecordSource for FixtureEmailSource {
        type Raw = RawEmailRecord;

        async fn list_ids(&self) -> Result<Vec<String>, SourceError> {
            if let Some(make_err) = *self.fail_with.read() {
                return Err(make_err());
            }
            Ok(self.records.iter().map(|r| r.id.clone()).collect())
        }

        async fn fetch_record(&self, id: &str) -> Result<RawEmailRecord, SourceError> {
            self.records
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .ok_or_else(|| SourceError::Malformed(format!("unknown id {}", id)))
        }
    }

    pub struct FixtureCalendarSource {
        pub events: Vec<RawCalendarEvent>,
        pub fail_with: RwLock<Option<fn() -> SourceError>>,
    }

    impl FixtureCalendarSource {
        pub fn new(events: Vec<RawCalendarEvent>) -> Self {
            Self {
                events,
                fail_with: RwLock::new(None),
            }
        }
    }

    #[async_trait]
    impl RecordSource for FixtureCalendarSource {
        type Raw = RawCalendarEvent;

        async fn list_ids(&self) -> Result<Vec<String>, SourceError> {
            if let Some(make_err) = *self.fail_with.read() {
                return Err(make_err());
            }
            Ok(self.events.iter().map(|e| e.id.clone()).collect())
        }

        async fn fetch_record(&self, id: &str) -> Result<RawCalendarEvent, SourceError> {
            self.events
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .ok_or_else(|| SourceError::Malformed(format!("unknown id {}", id)))
        }
    }

    #[derive(Default)]
    pub struct MemoryOverlayStore {
        pub edits: RwLock<HashMap<String, ContactEdit>>,
        pub unavailable: RwLock<bool>,
    }

    #[async_trait]
    impl OverlayStore for MemoryOverlayStore {
        async fn load_all(&self) -> Result<HashMap<String, ContactEdit>, EngineError> {
            if *self.unavailable.read() {
                return Err(EngineError::Persistence("overlay store down".to_string()));
            }
            Ok(self.edits.read().clone())
        }

        async fn put(&self, edit: ContactEdit) -> Result<(), EngineError> {
            if *self.unavailable.read() {
                return Err(EngineError::Persistence("overlay store down".to_string()));
            }
            let mut edits = self.edits.write();
            match edits.get_mut(&edit.id) {
                Some(stored) => merge_edit(stored, edit),
                None => {
                    let mut fresh = ContactEdit {
                        id: edit.id.clone(),
                        ..Default::default()
                    };
                    merge_edit(&mut fresh, edit);
                    edits.insert(fresh.id.clone(), fresh);
                }
            }
            Ok(())
        }
    }

    pub struct NoPhotos;

    #[async_trait]
    impl PhotoDirectory for NoPhotos {
        async fn directory(&self) -> Result<HashMap<String, String>, SourceError> {
            Ok(HashMap::new())
        }
    }

    pub fn encode_body(text: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(text)
    }

    pub fn email_record(
        id: &str,
        from: &str,
        to: &str,
        subject: &str,
        date: &str,
        body: &str,
    ) -> RawEmailRecord {
        RawEmailRecord {
            id: id.to_string(),
            thread_id: format!("t-{}", id),
            from: from.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            date: date.to_string(),
            payload: Some(crate::sources::email::MailPart {
                mime_type: "text/plain".to_string(),
                data: Some(encode_body(body)),
                parts: vec![],
            }),
        }
    }

    pub fn calendar_event(id: &str, title: &str, start: &str, attendee: (&str, &str)) -> RawCalendarEvent {
        RawCalendarEvent {
            id: id.to_string(),
            title: title.to_string(),
            start: start.to_string(),
            attendees: vec![crate::sources::calendar::EventPerson {
                email: attendee.0.to_string(),
                display_name: Some(attendee.1.to_string()).filter(|s| !s.is_empty()),
                resource: false,
            }],
            organizer: None,
            creator: None,
            recurring_event_id: None,
            status: Some("confirmed".to_string()),
        }
    }

    pub fn pipeline_with(
        email: FixtureEmailSource,
        calendar: FixtureCalendarSource,
        overlay: Arc<MemoryOverlayStore>,
    ) -> Pipeline {
        Pipeline {
            email_source: Arc::new(email),
            calendar_source: Arc::new(calendar),
            photo_directory: Arc::new(NoPhotos),
            overlay_store: overlay,
            user_email: "me@co.com".to_string(),
            config: SyncConfig::unthrottled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::types::{ContactEdit, SourceKind};
    use std::sync::Arc;

    fn progress_channel() -> (watch::Sender<FetchPhase>, watch::Receiver<FetchPhase>) {
        watch::channel(FetchPhase::Idle)
    }

    #[tokio::test]
    async fn test_full_pass_merges_both_sources() {
        let email = FixtureEmailSource::new(vec![email_record(
            "m1",
            "a@co.com",
            "me@co.com",
            "Q1 Report",
            "Sat, 7 Feb 2026 10:00:00 +0000",
            "Numbers attached.",
        )]);
        let calendar = FixtureCalendarSource::new(vec![calendar_event(
            "e1",
            "Sync",
            "2026-02-10T09:00:00Z",
            ("a@co.com", "Alice Smith"),
        )]);
        let pipeline = pipeline_with(email, calendar, Arc::new(MemoryOverlayStore::default()));

        let (tx, _rx) = progress_channel();
        let contacts = pipeline.run(&tx).await.unwrap();

        assert_eq!(contacts.len(), 1);
        let contact = &contacts[0];
        assert_eq!(contact.id, "a@co.com");
        assert_eq!(contact.name, "Alice Smith");
        // Calendar interaction is newer: meeting metadata carried over, the
        // email subject still in place.
        assert_eq!(contact.source, SourceKind::Calendar);
        assert_eq!(contact.last_meeting_name.as_deref(), Some("Sync"));
        assert_eq!(contact.last_email_subject.as_deref(), Some("Q1 Report"));
    }

    #[tokio::test]
    async fn test_one_source_down_still_serves_the_other() {
        let email = FixtureEmailSource::new(vec![email_record(
            "m1",
            "a@co.com",
            "me@co.com",
            "Hello",
            "Sat, 7 Feb 2026 10:00:00 +0000",
            "Hi.",
        )]);
        let calendar = FixtureCalendarSource::new(vec![]);
        *calendar.fail_with.write() =
            Some(|| SourceError::Unavailable("calendar down".to_string()));
        let pipeline = pipeline_with(email, calendar, Arc::new(MemoryOverlayStore::default()));

        let (tx, _rx) = progress_channel();
        let contacts = pipeline.run(&tx).await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, "a@co.com");
    }

    #[tokio::test]
    async fn test_auth_expired_is_a_hard_failure() {
        let email = FixtureEmailSource::new(vec![]);
        *email.fail_with.write() = Some(|| SourceError::AuthExpired);
        let calendar = FixtureCalendarSource::new(vec![]);
        let pipeline = pipeline_with(email, calendar, Arc::new(MemoryOverlayStore::default()));

        let (tx, _rx) = progress_channel();
        let err = pipeline.run(&tx).await.unwrap_err();
        assert!(matches!(err, EngineError::AuthExpired));
    }

    #[tokio::test]
    async fn test_overlay_store_down_serves_canonical_contacts() {
        let email = FixtureEmailSource::new(vec![email_record(
            "m1",
            "a@co.com",
            "me@co.com",
            "Hello",
            "Sat, 7 Feb 2026 10:00:00 +0000",
            "Hi.",
        )]);
        let calendar = FixtureCalendarSource::new(vec![]);
        let overlay = Arc::new(MemoryOverlayStore::default());
        *overlay.unavailable.write() = true;
        let pipeline = pipeline_with(email, calendar, overlay);

        let (tx, _rx) = progress_channel();
        let contacts = pipeline.run(&tx).await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "a@co.com");
    }

    #[tokio::test]
    async fn test_overlay_overrides_canonical_fields() {
        let email = FixtureEmailSource::new(vec![email_record(
            "m1",
            "a@co.com",
            "me@co.com",
            "Hello",
            "Sat, 7 Feb 2026 10:00:00 +0000",
            "Hi.",
        )]);
        let calendar = FixtureCalendarSource::new(vec![]);
        let overlay = Arc::new(MemoryOverlayStore::default());
        overlay
            .put(ContactEdit {
                id: "a@co.com".to_string(),
                name: Some("Alice (edited)".to_string()),
                hidden: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        let pipeline = pipeline_with(email, calendar, overlay);

        let (tx, _rx) = progress_channel();
        let contacts = pipeline.run(&tx).await.unwrap();
        assert_eq!(contacts[0].name, "Alice (edited)");
        assert!(contacts[0].hidden);
    }

    #[tokio::test]
    async fn test_progress_signal_is_monotone() {
        let email = FixtureEmailSource::new(vec![]);
        let calendar = FixtureCalendarSource::new(vec![]);
        let pipeline = pipeline_with(email, calendar, Arc::new(MemoryOverlayStore::default()));

        let (tx, mut rx) = progress_channel();
        pipeline.run(&tx).await.unwrap();

        let mut last = 0u8;
        while rx.has_changed().unwrap_or(false) {
            let phase = *rx.borrow_and_update();
            assert!(phase.percent() >= last);
            last = phase.percent();
        }
        assert!(last >= FetchPhase::EnrichmentApplied.percent());
    }
}
