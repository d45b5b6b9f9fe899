//! Source clients for external APIs
//!
//! This module contains everything that talks to the outside world:
//! - Building the shared HTTP client with a proper user agent
//! - The [`SourceClient`] trait implemented per API
//! - Classification of HTTP outcomes into [`FetchError`]s
//!
//! # Error classification
//!
//! | Condition                       | Result                      |
//! |---------------------------------|-----------------------------|
//! | HTTP 403 / 429                  | `RateLimited { retry_after }` |
//! | HTTP 408 / 5xx                  | `Transient`                 |
//! | Timeout / connection failure    | `Transient`                 |
//! | Other non-success status        | `Http`                      |
//! | Body is not the expected JSON   | `Decode`                    |

mod github;
mod stackexchange;

pub use github::GitHubIssuesClient;
pub use stackexchange::StackExchangeClient;

use crate::config::{SourceConfig, SourceTarget, UserAgentConfig};
use crate::record::RawItem;
use crate::state::{PollCursor, MAX_WAIT};
use crate::ConfigError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors a source can return for one page request
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient network error: {0}")]
    Transient(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Whether retrying the same request shortly may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short label used on error counters
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::RateLimited { .. } => "rate_limited",
            Self::Http { .. } => "http",
            Self::Decode { .. } => "decode",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// One page of raw items plus the cursor to use after it is persisted
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub items: Vec<RawItem>,
    pub next_cursor: PollCursor,
    /// More pages are waiting in the current window
    pub has_more: bool,
    /// Server-requested pause before the next request
    pub min_delay: Option<Duration>,
}

/// Fetches pages of raw items from one external API
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Configured source name
    fn name(&self) -> &str;

    /// Structured label for the polled target ("owner/repo" or tag)
    fn target_label(&self) -> String;

    /// URL the request for `cursor` would hit
    fn request_url(&self, cursor: &PollCursor) -> Result<Url, FetchError>;

    /// Fetches one page starting at `cursor`
    async fn fetch_page(&self, cursor: &PollCursor) -> Result<FetchedPage, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use poll_ingest::config::UserAgentConfig;
/// use poll_ingest::sources::build_http_client;
///
/// let config = UserAgentConfig {
///     client_name: "PollIngest".to_string(),
///     client_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .build()
}

/// Builds the client for one configured source
pub fn build_source_client(
    source: &SourceConfig,
    http: Client,
    page_size: u32,
) -> Result<Box<dyn SourceClient>, ConfigError> {
    let token = source.resolve_token();
    let endpoint = source.endpoint().to_string();

    let client: Box<dyn SourceClient> = match source.target()? {
        SourceTarget::Repository { owner, repo } => Box::new(GitHubIssuesClient::new(
            source.name.clone(),
            owner,
            repo,
            endpoint,
            token,
            page_size,
            http,
        )),
        SourceTarget::Tag { tag, site } => Box::new(StackExchangeClient::new(
            source.name.clone(),
            tag,
            site,
            endpoint,
            token,
            page_size,
            http,
        )),
    };

    Ok(client)
}

/// Maps a response status to an error, honoring rate-limit headers
pub(crate) fn check_status(
    status: StatusCode,
    headers: &HeaderMap,
    url: &str,
) -> Result<(), FetchError> {
    if status.is_success() {
        return Ok(());
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
        return Err(FetchError::RateLimited {
            retry_after: retry_after_from_headers(headers, Utc::now()),
        });
    }

    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return Err(FetchError::Transient(format!("HTTP {} from {}", status, url)));
    }

    Err(FetchError::Http {
        status: status.as_u16(),
        url: url.to_string(),
    })
}

/// Reads `Retry-After` (seconds or HTTP date), falling back to GitHub's
/// `x-ratelimit-reset` when the remaining quota is zero
///
/// The result never exceeds [`MAX_WAIT`].
pub(crate) fn retry_after_from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    header_delay(headers, now).map(server_delay)
}

/// Caps a delay requested by a server
pub(crate) fn server_delay(delay: Duration) -> Duration {
    delay.min(MAX_WAIT)
}

fn header_delay(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(value) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        if let Ok(date) = DateTime::parse_from_rfc2822(value) {
            return Some(until(now, date.with_timezone(&Utc)));
        }
    }

    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    if remaining == Some(0) {
        let reset = headers
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        if let Some(reset) = reset {
            return Some(until(now, reset));
        }
    }

    None
}

fn until(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (then - now).to_std().unwrap_or(Duration::ZERO)
}

/// Classifies a transport-level error
pub(crate) fn classify_request_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Transient(format!("request timeout: {}", err))
    } else if err.is_connect() {
        FetchError::Transient(format!("connection failed: {}", err))
    } else if err.is_decode() {
        FetchError::Decode {
            url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            message: err.to_string(),
        }
    } else {
        FetchError::Transient(err.to_string())
    }
}
