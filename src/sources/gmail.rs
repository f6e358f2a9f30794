//! Gmail-backed page client for the email archive source.
//!
//! Lists message ids for the archive window, then fetches each message with
//! `format=full` so the extractor can decode a body preview. The caller's
//! bearer token comes from the excluded auth layer.

use async_trait::async_trait;
use serde::Deserialize;

use super::email::{MailPart, RawEmailRecord};
use super::{send_with_retry, status_to_error, RecordSource, RetryPolicy};
use crate::error::SourceError;

const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    payload: Option<WirePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<WireHeader>,
    #[serde(default)]
    body: Option<WireBody>,
    #[serde(default)]
    parts: Vec<WirePayload>,
}

#[derive(Debug, Deserialize)]
struct WireHeader {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBody {
    #[serde(default)]
    data: Option<String>,
}

/// Paged Gmail client. One instance per authenticated session.
pub struct GmailSource {
    client: reqwest::Client,
    access_token: String,
    /// Gmail search query bounding the archive window, e.g. `newer_than:90d`.
    query: String,
    page_size: u32,
    retry: RetryPolicy,
}

impl GmailSource {
    pub fn new(access_token: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: access_token.into(),
            query: query.into(),
            page_size: 100,
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl RecordSource for GmailSource {
    type Raw = RawEmailRecord;

    async fn list_ids(&self) -> Result<Vec<String>, SourceError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/messages", GMAIL_BASE))
                .bearer_auth(&self.access_token)
                .query(&[
                    ("q", self.query.as_str()),
                    ("maxResults", &self.page_size.to_string()),
                ]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let resp = send_with_retry(request, &self.retry).await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(status_to_error(status, body));
            }

            let list: MessageListResponse = resp.json().await?;
            ids.extend(list.messages.into_iter().map(|m| m.id));

            page_token = list.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(ids)
    }

    async fn fetch_record(&self, id: &str) -> Result<RawEmailRecord, SourceError> {
        let resp = send_with_retry(
            self.client
                .get(format!("{}/messages/{}", GMAIL_BASE, id))
                .bearer_auth(&self.access_token)
                .query(&[("format", "full")]),
            &self.retry,
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, body));
        }

        let detail: MessageDetail = resp
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok(into_raw_record(detail))
    }
}

fn into_raw_record(detail: MessageDetail) -> RawEmailRecord {
    let headers = detail
        .payload
        .as_ref()
        .map(|p| &p.headers[..])
        .unwrap_or(&[]);

    let get_header = |name: &str| -> String {
        headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    };

    let from = get_header("From");
    let to = get_header("To");
    let subject = get_header("Subject");
    let date = get_header("Date");

    RawEmailRecord {
        id: detail.id,
        thread_id: detail.thread_id,
        from,
        to,
        subject,
        date,
        payload: detail.payload.map(into_mail_part),
    }
}

fn into_mail_part(payload: WirePayload) -> MailPart {
    MailPart {
        mime_type: payload.mime_type,
        data: payload.body.and_then(|b| b.data),
        parts: payload.parts.into_iter().map(into_mail_part).collect(),
    }
}
