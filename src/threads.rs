//! Email thread reconciler.
//!
//! Collapses an email thread's many messages into the single most
//! informative interaction per counterpart. Interactions are grouped by
//! `(counterpart email, subject)`; within a group the most recent received
//! and most recent sent interactions are tracked independently.
//!
//! Finalization rule: if both directions exist, received wins whenever
//! `received.timestamp >= sent.timestamp`; otherwise sent wins, but its
//! subject and body preview are backfilled from the received record —
//! sent's own body metadata is discarded in that case. A single direction
//! is used unmodified. Across all threads for the same counterpart, only
//! the greatest-timestamp interaction survives.

use std::collections::HashMap;

use crate::types::{Direction, InteractionRecord, normalize_email};

#[derive(Default)]
struct ThreadSlot {
    latest_sent: Option<InteractionRecord>,
    latest_received: Option<InteractionRecord>,
}

impl ThreadSlot {
    fn observe(&mut self, rec: InteractionRecord) {
        let slot = match rec.direction {
            Some(Direction::Received) => &mut self.latest_received,
            // Directionless email interactions are treated as sent.
            _ => &mut self.latest_sent,
        };
        match slot {
            Some(existing) if existing.timestamp >= rec.timestamp => {}
            _ => *slot = Some(rec),
        }
    }

    fn finalize(self) -> Option<InteractionRecord> {
        match (self.latest_sent, self.latest_received) {
            (Some(sent), Some(received)) => {
                if received.timestamp >= sent.timestamp {
                    Some(received)
                } else {
                    let mut winner = sent;
                    winner.subject = received.subject;
                    winner.body_preview = received.body_preview;
                    Some(winner)
                }
            }
            (Some(only), None) | (None, Some(only)) => Some(only),
            (None, None) => None,
        }
    }
}

/// Collapse email interactions to one per counterpart.
pub fn collapse_threads(
    interactions: Vec<InteractionRecord>,
) -> HashMap<String, InteractionRecord> {
    let mut threads: HashMap<(String, String), ThreadSlot> = HashMap::new();
    for rec in interactions {
        let key = (
            normalize_email(&rec.counterpart_email),
            rec.subject.clone().unwrap_or_default(),
        );
        threads.entry(key).or_default().observe(rec);
    }

    let mut per_counterpart: HashMap<String, InteractionRecord> = HashMap::new();
    for ((email, _subject), slot) in threads {
        if let Some(finalized) = slot.finalize() {
            match per_counterpart.get(&email) {
                Some(existing) if existing.timestamp >= finalized.timestamp => {}
                _ => {
                    per_counterpart.insert(email, finalized);
                }
            }
        }
    }
    per_counterpart
}
