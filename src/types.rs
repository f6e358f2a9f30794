//! Core data model: interaction records, canonical contacts, edit overlay
//! entries, and the persisted cache entry shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which upstream source an interaction or contact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Email,
    Calendar,
}

/// Direction of an email interaction relative to the authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

/// A single timestamped contact event from one source.
///
/// Ephemeral: produced and consumed within one reconciliation pass, never
/// persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRecord {
    pub source: SourceKind,
    pub counterpart_email: String,
    pub counterpart_name: String,
    pub timestamp: DateTime<Utc>,
    /// Provider-side thread identifier, when the source has one.
    pub thread_key: Option<String>,
    pub subject: Option<String>,
    pub body_preview: Option<String>,
    pub meeting_name: Option<String>,
    pub direction: Option<Direction>,
}

/// The single reconciled record per counterpart after cross-source merge.
///
/// `id` is the lowercased counterpart email and is unique across the
/// canonical set. `last_contact_at` is the maximum timestamp observed across
/// every contributing interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_contact_at: DateTime<Utc>,
    pub source: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_email_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_email_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_meeting_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub starred: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A field-scoped user override, persisted keyed by contact id.
///
/// Every field is optional; presence, not truthiness, determines whether it
/// overrides the canonical value. An explicit empty string, empty list, or
/// `false` all override.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactEdit {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starred: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The persisted cache payload. Round-trips exactly as
/// `{"contacts": [...], "cachedAt": epochMillis, "owner": sessionKey}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub contacts: Vec<Contact>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub cached_at: DateTime<Utc>,
    pub owner: String,
}

/// Normalize an email address for use as a contact id: trimmed + lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Contact {
    /// Build a canonical contact from a single source interaction.
    pub fn from_interaction(rec: &InteractionRecord) -> Self {
        let id = normalize_email(&rec.counterpart_email);
        let name = if rec.counterpart_name.trim().is_empty() {
            id.clone()
        } else {
            rec.counterpart_name.trim().to_string()
        };
        let (subject, preview, meeting) = match rec.source {
            SourceKind::Email => (rec.subject.clone(), rec.body_preview.clone(), None),
            SourceKind::Calendar => (None, None, rec.meeting_name.clone()),
        };
        Contact {
            id,
            email: rec.counterpart_email.trim().to_string(),
            name,
            company: None,
            last_contact_at: rec.timestamp,
            source: rec.source,
            last_email_subject: subject,
            last_email_preview: preview,
            last_meeting_name: meeting,
            photo_url: None,
            hidden: false,
            starred: false,
            tags: Vec::new(),
        }
    }
}
