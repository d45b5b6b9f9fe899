//! StackExchange advanced-search source
//!
//! Searches questions with one tag ordered by last activity. The API wraps
//! results in an envelope that can also carry a `backoff` field, which must
//! be honored before the next request to the same method.

use crate::record::{RawItem, SourceKind};
use crate::sources::{
    check_status, classify_request_error, retry_after_from_headers, server_delay, FetchError,
    FetchedPage, SourceClient,
};
use crate::state::PollCursor;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// error_id the API uses for throttling
const THROTTLE_VIOLATION: u32 = 502;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    backoff: Option<u64>,
    quota_remaining: Option<u64>,
    error_id: Option<u32>,
    error_name: Option<String>,
}

impl Envelope {
    fn is_throttled(&self) -> bool {
        self.error_id == Some(THROTTLE_VIOLATION)
            || self.error_name.as_deref() == Some("throttle_violation")
    }
}

pub struct StackExchangeClient {
    name: String,
    tag: String,
    site: String,
    endpoint: String,
    key: Option<String>,
    page_size: u32,
    http: Client,
}

impl StackExchangeClient {
    pub fn new(
        name: String,
        tag: String,
        site: String,
        endpoint: String,
        key: Option<String>,
        page_size: u32,
        http: Client,
    ) -> Self {
        Self {
            name,
            tag,
            site,
            endpoint,
            key,
            page_size,
            http,
        }
    }
}

#[async_trait]
impl SourceClient for StackExchangeClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_label(&self) -> String {
        self.tag.clone()
    }

    fn request_url(&self, cursor: &PollCursor) -> Result<Url, FetchError> {
        let base = format!(
            "{}/2.3/search/advanced",
            self.endpoint.trim_end_matches('/')
        );
        let min = cursor.since.timestamp().to_string();
        let page = cursor.page.to_string();
        let page_size = self.page_size.to_string();

        let mut params = vec![
            ("order", "asc"),
            ("sort", "activity"),
            ("tagged", self.tag.as_str()),
            ("site", self.site.as_str()),
            ("min", min.as_str()),
            ("page", page.as_str()),
            ("pagesize", page_size.as_str()),
        ];
        if let Some(key) = &self.key {
            params.push(("key", key.as_str()));
        }

        Url::parse_with_params(&base, &params)
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", base, e)))
    }

    async fn fetch_page(&self, cursor: &PollCursor) -> Result<FetchedPage, FetchError> {
        let url = self.request_url(cursor)?;
        tracing::debug!(source = %self.name, tag = %self.tag, "Fetching StackExchange search page");

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(classify_request_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify_request_error)?;

        if !status.is_success() {
            // Throttling arrives as HTTP 400 with an error envelope
            if let Ok(envelope) = serde_json::from_slice::<Envelope>(&body) {
                if envelope.is_throttled() {
                    let backoff = envelope
                        .backoff
                        .map(|secs| server_delay(Duration::from_secs(secs)));
                    return Err(FetchError::RateLimited {
                        retry_after: retry_after_from_headers(&headers, Utc::now()).or(backoff),
                    });
                }
            }
            check_status(status, &headers, url.as_str())?;
        }

        let envelope: Envelope = serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if let Some(remaining) = envelope.quota_remaining {
            tracing::debug!(source = %self.name, quota_remaining = remaining, "StackExchange quota");
        }

        let newest = envelope
            .items
            .iter()
            .filter_map(|item| unix_field(item, "last_activity_date"))
            .max();

        let next_cursor = cursor.after_page(newest, envelope.has_more);

        Ok(FetchedPage {
            items: envelope
                .items
                .into_iter()
                .map(|item| RawItem::new(SourceKind::StackOverflow, item))
                .collect(),
            next_cursor,
            has_more: envelope.has_more,
            min_delay: envelope
                .backoff
                .map(|secs| server_delay(Duration::from_secs(secs))),
        })
    }
}

/// Parses a unix timestamp field as returned by the API
pub(crate) fn unix_field(item: &Value, field: &str) -> Option<DateTime<Utc>> {
    item.get(field)
        .and_then(Value::as_i64)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}
