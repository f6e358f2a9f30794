//! Calendar extractor.
//!
//! For each past, non-recurring event, emits one interaction per distinct
//! (counterpart, role) across the attendee, organizer, and creator roles,
//! each carrying the event start time and the event title as the meeting
//! name. Future events and events belonging to a recurrence series are
//! excluded entirely; recurrence expansion is out of scope.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{InteractionRecord, SourceKind};

/// A person attached to an event in some role.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPerson {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Resource rooms show up as attendees; they are never counterparts.
    #[serde(default)]
    pub resource: bool,
}

/// A raw calendar event as the page client hands it over.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCalendarEvent {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// RFC 3339 datetime, or a bare date for all-day events.
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub attendees: Vec<EventPerson>,
    #[serde(default)]
    pub organizer: Option<EventPerson>,
    #[serde(default)]
    pub creator: Option<EventPerson>,
    #[serde(default)]
    pub recurring_event_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Extract normalized interactions from a page of raw events.
pub fn extract_interactions(
    events: &[RawCalendarEvent],
    user_email: &str,
    now: DateTime<Utc>,
) -> Vec<InteractionRecord> {
    let user = user_email.trim().to_lowercase();
    let mut out = Vec::new();

    for event in events {
        if event.status.as_deref() == Some("cancelled") {
            continue;
        }
        if event.recurring_event_id.is_some() {
            continue;
        }

        let start = match parse_event_datetime(&event.start) {
            Some(ts) => ts,
            None => {
                log::debug!("Skipping event {}: unparsable start {:?}", event.id, event.start);
                continue;
            }
        };
        if start >= now {
            continue;
        }

        let mut seen: HashSet<(String, &'static str)> = HashSet::new();
        let mut emit = |person: &EventPerson, role: &'static str| {
            let email = person.email.trim();
            if email.is_empty() || !email.contains('@') || person.resource {
                return;
            }
            if email.to_lowercase() == user {
                return;
            }
            if !seen.insert((email.to_lowercase(), role)) {
                return;
            }
            out.push(InteractionRecord {
                source: SourceKind::Calendar,
                counterpart_email: email.to_string(),
                counterpart_name: person
                    .display_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(email)
                    .to_string(),
                timestamp: start,
                thread_key: None,
                subject: None,
                body_preview: None,
                meeting_name: Some(event.title.clone()),
                direction: None,
            });
        };

        for attendee in &event.attendees {
            emit(attendee, "attendee");
        }
        if let Some(ref organizer) = event.organizer {
            emit(organizer, "organizer");
        }
        if let Some(ref creator) = event.creator {
            emit(creator, "creator");
        }
    }

    out
}

/// Parse an event start as RFC 3339, or a bare date as midnight UTC.
pub fn parse_event_datetime(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains('T') {
        DateTime::parse_from_rfc3339(&trimmed.replace('Z', "+00:00"))
            .or_else(|_| DateTime::parse_from_rfc3339(trimmed))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    } else {
        chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
    }
}
