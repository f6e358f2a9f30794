//! Edit overlay: durable, field-scoped user overrides applied on top of the
//! canonical contact list.
//!
//! Presence, not truthiness, governs override: an overlay field that is
//! explicitly present replaces the canonical value even when it is an empty
//! string, an empty list, or `false`. Absent fields leave the canonical
//! value untouched. The overlay store is an external collaborator; when it
//! is unavailable the overlay step degrades to a no-op.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::types::{Contact, ContactEdit};

/// Persistence seam for overlay entries, keyed by contact id.
#[async_trait]
pub trait OverlayStore: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<String, ContactEdit>, EngineError>;

    /// Upsert an edit. Present fields of the incoming edit land on top of
    /// the stored entry for the same id; absent fields are preserved.
    async fn put(&self, edit: ContactEdit) -> Result<(), EngineError>;
}

/// Apply the overlay to the canonical contacts. Contacts without an overlay
/// entry pass through unchanged.
pub fn apply_overlay(
    mut contacts: Vec<Contact>,
    overlay: &HashMap<String, ContactEdit>,
) -> Vec<Contact> {
    if overlay.is_empty() {
        return contacts;
    }
    for contact in contacts.iter_mut() {
        if let Some(edit) = overlay.get(&contact.id) {
            apply_edit(contact, edit);
        }
    }
    contacts
}

fn apply_edit(contact: &mut Contact, edit: &ContactEdit) {
    if let Some(ref name) = edit.name {
        contact.name = name.clone();
    }
    if let Some(ref email) = edit.email {
        contact.email = email.clone();
    }
    if let Some(ref company) = edit.company {
        contact.company = Some(company.clone());
    }
    if let Some(hidden) = edit.hidden {
        contact.hidden = hidden;
    }
    if let Some(starred) = edit.starred {
        contact.starred = starred;
    }
    if let Some(ref tags) = edit.tags {
        contact.tags = tags.clone();
    }
    if let Some(ref photo_url) = edit.photo_url {
        contact.photo_url = Some(photo_url.clone());
    }
}

/// Merge an incoming edit onto a stored one, field by field.
pub fn merge_edit(stored: &mut ContactEdit, incoming: ContactEdit) {
    if incoming.name.is_some() {
        stored.name = incoming.name;
    }
    if incoming.email.is_some() {
        stored.email = incoming.email;
    }
    if incoming.company.is_some() {
        stored.company = incoming.company;
    }
    if incoming.hidden.is_some() {
        stored.hidden = incoming.hidden;
    }
    if incoming.starred.is_some() {
        stored.starred = incoming.starred;
    }
    if incoming.tags.is_some() {
        stored.tags = incoming.tags;
    }
    if incoming.photo_url.is_some() {
        stored.photo_url = incoming.photo_url;
    }
    stored.updated_at = incoming.updated_at.or(Some(Utc::now()));
}

/// JSON-file-backed overlay store: one file holding the whole id → edit map.
pub struct FileOverlayStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the backing file.
    write_lock: Mutex<()>,
}

impl FileOverlayStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_map(&self) -> Result<HashMap<String, ContactEdit>, EngineError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| EngineError::Persistence(format!("Failed to read overlay: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| EngineError::Persistence(format!("Failed to parse overlay: {}", e)))
    }
}

#[async_trait]
impl OverlayStore for FileOverlayStore {
    async fn load_all(&self) -> Result<HashMap<String, ContactEdit>, EngineError> {
        self.read_map()
    }

    async fn put(&self, edit: ContactEdit) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map().unwrap_or_default();

        match map.get_mut(&edit.id) {
            Some(stored) => merge_edit(stored, edit),
            None => {
                let mut fresh = ContactEdit {
                    id: edit.id.clone(),
                    ..Default::default()
                };
                merge_edit(&mut fresh, edit);
                map.insert(fresh.id.clone(), fresh);
            }
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Persistence(format!("Failed to create dir: {}", e)))?;
        }
        let content = serde_json::to_string_pretty(&map)?;
        std::fs::write(&self.path, content)
            .map_err(|e| EngineError::Persistence(format!("Failed to write overlay: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InteractionRecord, SourceKind};
    use chrono::{TimeZone, Utc};

    fn contact(email: &str, name: &str) -> Contact {
        let mut c = Contact::from_interaction(&InteractionRecord {
            source: SourceKind::Email,
            counterpart_email: email.to_string(),
            counterpart_name: name.to_string(),
            timestamp: Utc.timestamp_opt(100, 0).unwrap(),
            thread_key: None,
            subject: None,
            body_preview: None,
            meeting_name: None,
            direction: None,
        });
        c.starred = true;
        c.tags = vec!["customer".to_string()];
        c
    }

    #[test]
    fn test_present_fields_override_including_falsy() {
        let contacts = vec![contact("a@co.com", "Alice")];
        let overlay = HashMap::from([(
            "a@co.com".to_string(),
            ContactEdit {
                id: "a@co.com".to_string(),
                name: Some(String::new()),
                starred: Some(false),
                tags: Some(Vec::new()),
                hidden: Some(true),
                ..Default::default()
            },
        )]);

        let result = apply_overlay(contacts, &overlay);
        assert_eq!(result[0].name, "");
        assert!(!result[0].starred);
        assert!(result[0].tags.is_empty());
        assert!(result[0].hidden);
    }

    #[test]
    fn test_absent_fields_leave_canonical_value() {
        let contacts = vec![contact("a@co.com", "Alice")];
        let overlay = HashMap::from([(
            "a@co.com".to_string(),
            ContactEdit {
                id: "a@co.com".to_string(),
                company: Some("Acme".to_string()),
                ..Default::default()
            },
        )]);

        let result = apply_overlay(contacts, &overlay);
        assert_eq!(result[0].company.as_deref(), Some("Acme"));
        assert_eq!(result[0].name, "Alice");
        assert!(result[0].starred);
        assert_eq!(result[0].tags, vec!["customer".to_string()]);
    }

    #[test]
    fn test_empty_overlay_is_a_noop() {
        let contacts = vec![contact("a@co.com", "Alice"), contact("b@co.com", "Bob")];
        let before = contacts.clone();
        let result = apply_overlay(contacts, &HashMap::new());
        assert_eq!(result, before);
    }

    #[test]
    fn test_contacts_without_entries_pass_through() {
        let contacts = vec![contact("a@co.com", "Alice"), contact("b@co.com", "Bob")];
        let overlay = HashMap::from([(
            "a@co.com".to_string(),
            ContactEdit {
                id: "a@co.com".to_string(),
                hidden: Some(true),
                ..Default::default()
            },
        )]);

        let result = apply_overlay(contacts, &overlay);
        assert!(result[0].hidden);
        assert!(!result[1].hidden);
        assert_eq!(result[1].name, "Bob");
    }

    #[test]
    fn test_merge_edit_is_field_scoped() {
        let mut stored = ContactEdit {
            id: "a@co.com".to_string(),
            name: Some("Alice".to_string()),
            starred: Some(true),
            ..Default::default()
        };
        merge_edit(
            &mut stored,
            ContactEdit {
                id: "a@co.com".to_string(),
                starred: Some(false),
                company: Some("Acme".to_string()),
                ..Default::default()
            },
        );

        assert_eq!(stored.name.as_deref(), Some("Alice"));
        assert_eq!(stored.starred, Some(false));
        assert_eq!(stored.company.as_deref(), Some("Acme"));
        assert!(stored.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_and_merge() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOverlayStore::new(dir.path().join("overlay.json"));

        store
            .put(ContactEdit {
                id: "a@co.com".to_string(),
                name: Some("Alice S".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .put(ContactEdit {
                id: "a@co.com".to_string(),
                starred: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let all = store.load_all().await.unwrap();
        let edit = &all["a@co.com"];
        assert_eq!(edit.name.as_deref(), Some("Alice S"));
        assert_eq!(edit.starred, Some(true));
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOverlayStore::new(dir.path().join("nope.json"));
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
