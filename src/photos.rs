//! Best-effort photo enrichment.
//!
//! Fetches a directory of `email -> avatar reference` from a secondary
//! source and attaches photo URLs by case-insensitive email match. Total
//! failure of the secondary source degrades to "no photos attached" and
//! never alters any other field of any contact.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::{normalize_email, Contact};

/// Secondary avatar directory. Implementations are free to hit Gravatar,
/// a people directory, or a fixture map.
#[async_trait]
pub trait PhotoDirectory: Send + Sync {
    async fn directory(&self) -> Result<HashMap<String, String>, SourceError>;
}

/// Attach avatar references to contacts that have none yet.
///
/// A photo set earlier in the pass (a user override) is never replaced.
pub async fn enrich_photos(contacts: &mut [Contact], directory: &dyn PhotoDirectory) {
    let photos = match directory.directory().await {
        Ok(map) => map,
        Err(e) => {
            log::warn!("Photo directory unavailable, skipping enrichment: {}", e);
            return;
        }
    };

    let by_email: HashMap<String, &String> = photos
        .iter()
        .map(|(email, url)| (normalize_email(email), url))
        .collect();

    let mut attached = 0usize;
    for contact in contacts.iter_mut() {
        if contact.photo_url.is_some() {
            continue;
        }
        if let Some(url) = by_email.get(&contact.id) {
            contact.photo_url = Some((*url).clone());
            attached += 1;
        }
    }
    log::debug!("Photo enrichment attached {} avatars", attached);
}
