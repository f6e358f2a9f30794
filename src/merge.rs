//! Cross-source merger.
//!
//! Unions the email-side and calendar-side per-counterpart maps into one
//! canonical `Contact` per counterpart, applying the recency, name-quality,
//! and metadata carry-over rules. The merger is deterministic and
//! idempotent: running it twice on the same inputs yields identical output.

use std::collections::HashMap;

use crate::types::{Contact, InteractionRecord, SourceKind};

/// Reduce a source's interactions to the latest one per counterpart.
/// The email source goes through the thread reconciler instead; this is the
/// calendar-side reduction.
pub fn latest_per_counterpart(
    interactions: Vec<InteractionRecord>,
) -> HashMap<String, InteractionRecord> {
    let mut latest: HashMap<String, InteractionRecord> = HashMap::new();
    for rec in interactions {
        let key = crate::types::normalize_email(&rec.counterpart_email);
        match latest.get(&key) {
            Some(existing) if existing.timestamp >= rec.timestamp => {}
            _ => {
                latest.insert(key, rec);
            }
        }
    }
    latest
}

/// Merge the two per-counterpart maps into the canonical contact list,
/// sorted most-recent first (id as tiebreaker) for determinism.
pub fn merge_sources(
    email: HashMap<String, InteractionRecord>,
    mut calendar: HashMap<String, InteractionRecord>,
) -> Vec<Contact> {
    let mut contacts = Vec::with_capacity(email.len() + calendar.len());

    for (key, email_rec) in email {
        match calendar.remove(&key) {
            Some(calendar_rec) => contacts.push(merge_pair(&email_rec, &calendar_rec)),
            None => contacts.push(Contact::from_interaction(&email_rec)),
        }
    }
    // Calendar-only counterparts.
    for (_, calendar_rec) in calendar {
        contacts.push(Contact::from_interaction(&calendar_rec));
    }

    contacts.sort_by(|a, b| {
        b.last_contact_at
            .cmp(&a.last_contact_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    contacts
}

/// Merge a counterpart present in both sources. Base is the email-side
/// record; this convention is arbitrary but load-bearing for determinism.
fn merge_pair(email_rec: &InteractionRecord, calendar_rec: &InteractionRecord) -> Contact {
    let mut contact = Contact::from_interaction(email_rec);
    let base_ts = email_rec.timestamp;

    // 1. Recency: the canonical last-contact time is the max across sources.
    contact.last_contact_at = base_ts.max(calendar_rec.timestamp);

    // 2. Name selection: prefer a real display name over a bare address or
    // a terse handle. Asymmetric — calendar names are never displaced by
    // email names.
    if better_name(&contact.name, &contact.id, calendar_rec) {
        contact.name = calendar_rec.counterpart_name.trim().to_string();
    }

    // 3. Metadata carry-over: a strictly newer calendar interaction brings
    // its meeting name and source along. Email-only fields are deliberately
    // left in place even then — a contact can show a meeting-driven
    // last-contact time while still displaying the older email subject.
    if calendar_rec.timestamp > base_ts {
        contact.last_meeting_name = calendar_rec.meeting_name.clone();
        contact.source = SourceKind::Calendar;
    }

    contact
}

fn better_name(base_name: &str, base_email: &str, calendar_rec: &InteractionRecord) -> bool {
    let cal_name = calendar_rec.counterpart_name.trim();
    let cal_email = calendar_rec.counterpart_email.trim();
    if cal_name.is_empty() || cal_name.eq_ignore_ascii_case(cal_email) {
        return false;
    }
    base_name.eq_ignore_ascii_case(base_email)
        || base_name.len() < cal_name.len()
        || (cal_name.contains(' ') && !base_name.contains(' '))
}
