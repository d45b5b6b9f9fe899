//! GitHub issues source
//!
//! Lists issues of one repository updated since the cursor, oldest update
//! first, so the last item of a page carries the newest timestamp.

use crate::record::{RawItem, SourceKind};
use crate::sources::{check_status, classify_request_error, FetchError, FetchedPage, SourceClient};
use crate::state::PollCursor;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use url::Url;

pub struct GitHubIssuesClient {
    name: String,
    owner: String,
    repo: String,
    endpoint: String,
    token: Option<String>,
    page_size: u32,
    http: Client,
}

impl GitHubIssuesClient {
    pub fn new(
        name: String,
        owner: String,
        repo: String,
        endpoint: String,
        token: Option<String>,
        page_size: u32,
        http: Client,
    ) -> Self {
        Self {
            name,
            owner,
            repo,
            endpoint,
            token,
            page_size,
            http,
        }
    }
}

#[async_trait]
impl SourceClient for GitHubIssuesClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_label(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn request_url(&self, cursor: &PollCursor) -> Result<Url, FetchError> {
        let base = format!(
            "{}/repos/{}/{}/issues",
            self.endpoint.trim_end_matches('/'),
            self.owner,
            self.repo
        );
        let since = cursor.since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let per_page = self.page_size.to_string();
        let page = cursor.page.to_string();

        Url::parse_with_params(
            &base,
            &[
                ("state", "all"),
                ("sort", "updated"),
                ("direction", "asc"),
                ("since", since.as_str()),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
            ],
        )
        .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", base, e)))
    }

    async fn fetch_page(&self, cursor: &PollCursor) -> Result<FetchedPage, FetchError> {
        let url = self.request_url(cursor)?;
        tracing::debug!(source = %self.name, %url, "Fetching GitHub issues page");

        let mut request = self
            .http
            .get(url.clone())
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_request_error)?;
        check_status(response.status(), response.headers(), url.as_str())?;

        let body = response.bytes().await.map_err(classify_request_error)?;
        let issues: Vec<Value> = serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let newest = issues
            .iter()
            .filter_map(|issue| issue.get("updated_at").and_then(Value::as_str))
            .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .max();

        let has_more = issues.len() >= self.page_size as usize;
        let next_cursor = cursor.after_page(newest, has_more);

        Ok(FetchedPage {
            items: issues
                .into_iter()
                .map(|issue| RawItem::new(SourceKind::GitHub, issue))
                .collect(),
            next_cursor,
            has_more,
            min_delay: None,
        })
    }
}
