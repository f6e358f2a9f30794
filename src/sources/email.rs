//! Email archive extractor.
//!
//! Turns raw archived messages into normalized `InteractionRecord`s: parses
//! `From`/`To` header values into `(email, display name)` pairs, decodes the
//! first text part as a body preview, and fans out one interaction per
//! direction per recipient. A record with an unparsable date is dropped; no
//! single malformed record aborts a batch.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{Direction, InteractionRecord, SourceKind};

/// How much decoded body text to keep as the preview.
const PREVIEW_MAX_CHARS: usize = 200;

/// One MIME part of a message body. `data` is URL-safe base64 as providers
/// emit it; nested multiparts recurse through `parts`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailPart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub parts: Vec<MailPart>,
}

/// A raw archived message, headers already flattened by the page client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEmailRecord {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    /// Raw `From` header value, e.g. `"Alice Smith" <alice@co.com>`.
    #[serde(default)]
    pub from: String,
    /// Raw `To` header value; may carry several comma-separated addresses.
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    /// RFC 2822 `Date` header value.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub payload: Option<MailPart>,
}

/// Extract normalized interactions from a page of raw messages.
///
/// A message with 3 `To` addresses yields 3 sent-direction interactions when
/// the authenticated user is the sender, or 1 received-direction interaction
/// (from the sender) when the user is a recipient.
pub fn extract_interactions(records: &[RawEmailRecord], user_email: &str) -> Vec<InteractionRecord> {
    let user = user_email.trim().to_lowercase();
    let mut out = Vec::new();

    for record in records {
        let timestamp = match parse_message_date(&record.date) {
            Some(ts) => ts,
            None => {
                log::debug!("Dropping message {}: unparsable date {:?}", record.id, record.date);
                continue;
            }
        };

        let sender = parse_email_addresses(&record.from).into_iter().next();
        let recipients = parse_email_addresses(&record.to);

        let subject = non_empty(&record.subject);
        let preview = record
            .payload
            .as_ref()
            .and_then(|p| extract_body_text(p, "text/plain").or_else(|| extract_body_text(p, "text/html")))
            .map(|text| truncate_preview(&text));

        let user_is_sender = sender
            .as_ref()
            .map(|(_, email)| email.to_lowercase() == user)
            .unwrap_or(false);

        if user_is_sender {
            for (name, email) in recipients {
                if email.to_lowercase() == user {
                    continue;
                }
                out.push(interaction(
                    record, email, name, timestamp, Direction::Sent,
                    subject.clone(), preview.clone(),
                ));
            }
        } else if let Some((name, email)) = sender {
            out.push(interaction(
                record, email, name, timestamp, Direction::Received,
                subject, preview,
            ));
        } else {
            log::debug!("Skipping message {}: no parsable sender", record.id);
        }
    }

    out
}

fn interaction(
    record: &RawEmailRecord,
    email: String,
    name: String,
    timestamp: DateTime<Utc>,
    direction: Direction,
    subject: Option<String>,
    preview: Option<String>,
) -> InteractionRecord {
    let name = if name.is_empty() { email.clone() } else { name };
    InteractionRecord {
        source: SourceKind::Email,
        counterpart_email: email,
        counterpart_name: name,
        timestamp,
        thread_key: non_empty(&record.thread_id),
        subject,
        body_preview: preview,
        meeting_name: None,
        direction: Some(direction),
    }
}

/// Parse email addresses from a header value like
/// `"Alice" <alice@co.com>, Bob <bob@co.com>, carol@co.com`.
pub fn parse_email_addresses(header: &str) -> Vec<(String, String)> {
    let mut results = Vec::new();
    for part in header.split(',') {
        let trimmed = part.trim();
        if let (Some(lt), Some(gt)) = (trimmed.find('<'), trimmed.find('>')) {
            if lt < gt {
                let email = trimmed[lt + 1..gt].trim().to_string();
                let name = trimmed[..lt].trim().trim_matches('"').trim().to_string();
                if email.contains('@') {
                    results.push((name, email));
                }
            }
        } else if trimmed.contains('@') {
            results.push((String::new(), trimmed.to_string()));
        }
    }
    results
}

/// Parse an RFC 2822 `Date` header. Tolerates the `(TZ)` comment suffix some
/// clients append.
pub fn parse_message_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let without_comment = match trimmed.find('(') {
        Some(idx) => trimmed[..idx].trim(),
        None => trimmed,
    };
    DateTime::parse_from_rfc2822(without_comment)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Recursively walk MIME parts to find the first body matching the target
/// type, decoding the URL-safe base64 payload data.
fn extract_body_text(part: &MailPart, target_mime: &str) -> Option<String> {
    if part.mime_type == target_mime {
        if let Some(ref data) = part.data {
            if let Some(text) = decode_url_safe_base64(data) {
                return Some(text);
            }
        }
    }
    for child in &part.parts {
        if let Some(text) = extract_body_text(child, target_mime) {
            return Some(text);
        }
    }
    None
}

fn decode_url_safe_base64(data: &str) -> Option<String> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

fn truncate_preview(text: &str) -> String {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    cleaned.chars().take(PREVIEW_MAX_CHARS).collect()
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(text: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(text)
    }

    fn message(from: &str, to: &str, date: &str) -> RawEmailRecord {
        RawEmailRecord {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            from: from.to_string(),
            to: to.to_string(),
            subject: "Intro".to_string(),
            date: date.to_string(),
            payload: Some(MailPart {
                mime_type: "text/plain".to_string(),
                data: Some(encode("Hi there, following up.")),
                parts: vec![],
            }),
        }
    }

    #[test]
    fn test_parse_email_addresses_mixed_forms() {
        let addrs = parse_email_addresses(
            r#""Alice Smith" <alice@co.com>, Bob <bob@co.com>, carol@co.com"#,
        );
        assert_eq!(addrs.len(), 3);
        assert_eq!(addrs[0], ("Alice Smith".to_string(), "alice@co.com".to_string()));
        assert_eq!(addrs[1], ("Bob".to_string(), "bob@co.com".to_string()));
        assert_eq!(addrs[2], (String::new(), "carol@co.com".to_string()));
    }

    #[test]
    fn test_sent_message_fans_out_per_recipient() {
        let msg = message(
            "Me <me@co.com>",
            "a@x.com, b@x.com, c@x.com",
            "Sun, 8 Feb 2026 09:30:00 -0500",
        );
        let interactions = extract_interactions(&[msg], "me@co.com");
        assert_eq!(interactions.len(), 3);
        assert!(interactions
            .iter()
            .all(|i| i.direction == Some(Direction::Sent)));
        let emails: Vec<&str> = interactions
            .iter()
            .map(|i| i.counterpart_email.as_str())
            .collect();
        assert_eq!(emails, vec!["a@x.com", "b@x.com", "c@x.com"]);
    }

    #[test]
    fn test_received_message_yields_one_interaction_from_sender() {
        let msg = message(
            r#""Jane Doe" <jane@customer.com>"#,
            "me@co.com, other@co.com",
            "Sun, 8 Feb 2026 09:30:00 -0500",
        );
        let interactions = extract_interactions(&[msg], "me@co.com");
        assert_eq!(interactions.len(), 1);
        let rec = &interactions[0];
        assert_eq!(rec.direction, Some(Direction::Received));
        assert_eq!(rec.counterpart_email, "jane@customer.com");
        assert_eq!(rec.counterpart_name, "Jane Doe");
        assert_eq!(rec.subject.as_deref(), Some("Intro"));
        assert_eq!(rec.body_preview.as_deref(), Some("Hi there, following up."));
    }

    #[test]
    fn test_unparsable_date_drops_record() {
        let msg = message("a@x.com", "me@co.com", "not a date");
        assert!(extract_interactions(&[msg], "me@co.com").is_empty());
    }

    #[test]
    fn test_date_with_timezone_comment() {
        let ts = parse_message_date("Sun, 8 Feb 2026 09:30:00 -0500 (EST)").unwrap();
        assert_eq!(ts.timestamp(), 1_770_561_000);
    }

    #[test]
    fn test_date_with_mismatched_weekday_is_rejected() {
        // 2026-02-08 is a Sunday; RFC 2822 parsing rejects a wrong weekday
        // name, and the record carrying it gets dropped upstream.
        assert!(parse_message_date("Sat, 8 Feb 2026 09:30:00 -0500").is_none());
        let msg = message("a@x.com", "me@co.com", "Sat, 8 Feb 2026 09:30:00 -0500");
        assert!(extract_interactions(&[msg], "me@co.com").is_empty());
    }

    #[test]
    fn test_sender_excluded_from_own_recipients() {
        let msg = message(
            "Me <me@co.com>",
            "me@co.com, peer@x.com",
            "Sun, 8 Feb 2026 09:30:00 -0500",
        );
        let interactions = extract_interactions(&[msg], "me@co.com");
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].counterpart_email, "peer@x.com");
    }

    #[test]
    fn test_preview_prefers_first_text_part_in_multipart() {
        let mut msg = message("a@x.com", "me@co.com", "Sun, 8 Feb 2026 09:30:00 -0500");
        msg.payload = Some(MailPart {
            mime_type: "multipart/alternative".to_string(),
            data: None,
            parts: vec![
                MailPart {
                    mime_type: "text/plain".to_string(),
                    data: Some(encode("plain body")),
                    parts: vec![],
                },
                MailPart {
                    mime_type: "text/html".to_string(),
                    data: Some(encode("<b>html body</b>")),
                    parts: vec![],
                },
            ],
        });
        let interactions = extract_interactions(&[msg], "me@co.com");
        assert_eq!(interactions[0].body_preview.as_deref(), Some("plain body"));
    }

    #[test]
    fn test_missing_payload_yields_no_preview() {
        let mut msg = message("a@x.com", "me@co.com", "Sun, 8 Feb 2026 09:30:00 -0500");
        msg.payload = None;
        let interactions = extract_interactions(&[msg], "me@co.com");
        assert!(interactions[0].body_preview.is_none());
    }
}
