//! Google Calendar-backed page client for the calendar source.
//!
//! Lists event ids in the archive window, then fetches each event singly so
//! the throttled extraction loop can pace the provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::calendar::{EventPerson, RawCalendarEvent};
use super::{send_with_retry, status_to_error, RecordSource, RetryPolicy};
use crate::error::SourceError;

const CALENDAR_BASE: &str = "https://www.googleapis.com/calendar/v3/calendars/primary";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<EventStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventStub {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    start: Option<WireEventTime>,
    #[serde(default)]
    attendees: Vec<WirePerson>,
    #[serde(default)]
    organizer: Option<WirePerson>,
    #[serde(default)]
    creator: Option<WirePerson>,
    #[serde(default)]
    recurring_event_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEventTime {
    #[serde(default)]
    date_time: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePerson {
    #[serde(default)]
    email: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    resource: Option<bool>,
}

/// Paged Calendar client for a bounded time window ending at `time_max`.
pub struct CalendarSource {
    client: reqwest::Client,
    access_token: String,
    time_min: DateTime<Utc>,
    time_max: DateTime<Utc>,
    page_size: u32,
    retry: RetryPolicy,
}

impl CalendarSource {
    pub fn new(
        access_token: impl Into<String>,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: access_token.into(),
            time_min,
            time_max,
            page_size: 250,
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl RecordSource for CalendarSource {
    type Raw = RawCalendarEvent;

    async fn list_ids(&self) -> Result<Vec<String>, SourceError> {
        let time_min = self.time_min.to_rfc3339();
        let time_max = self.time_max.to_rfc3339();
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/events", CALENDAR_BASE))
                .bearer_auth(&self.access_token)
                .query(&[
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                    ("orderBy", "startTime"),
                    ("singleEvents", "true"),
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

            let list: EventListResponse = resp.json().await?;
            ids.extend(
                list.items
                    .into_iter()
                    .map(|e| e.id)
                    .filter(|id| !id.is_empty()),
            );

            page_token = list.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(ids)
    }

    async fn fetch_record(&self, id: &str) -> Result<RawCalendarEvent, SourceError> {
        let resp = send_with_retry(
            self.client
                .get(format!("{}/events/{}", CALENDAR_BASE, id))
                .bearer_auth(&self.access_token),
            &self.retry,
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, body));
        }

        let event: WireEvent = resp
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok(into_raw_event(event))
    }
}

fn into_raw_event(event: WireEvent) -> RawCalendarEvent {
    let start = event
        .start
        .and_then(|s| s.date_time.or(s.date))
        .unwrap_or_default();

    RawCalendarEvent {
        id: event.id,
        title: event.summary.unwrap_or_else(|| "(No title)".to_string()),
        start,
        attendees: event.attendees.into_iter().map(into_person).collect(),
        organizer: event.organizer.map(into_person),
        creator: event.creator.map(into_person),
        recurring_event_id: event.recurring_event_id,
        status: event.status,
    }
}

fn into_person(person: WirePerson) -> EventPerson {
    EventPerson {
        email: person.email,
        display_name: person.display_name,
        resource: person.resource.unwrap_or(false),
    }
}
