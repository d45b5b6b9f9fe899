//! HTTP-level tests of the source clients against mock APIs

use crate::common::{issue, ts};
use chrono::{TimeZone, Utc};
use poll_ingest::record::{normalize, SourceKind};
use poll_ingest::sources::{FetchError, GitHubIssuesClient, SourceClient, StackExchangeClient};
use poll_ingest::state::PollCursor;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ISSUES_PATH: &str = "/repos/acme/widgets/issues";
const SEARCH_PATH: &str = "/2.3/search/advanced";

fn cursor() -> PollCursor {
    PollCursor {
        since: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        page: 1,
    }
}

fn github(server: &MockServer, token: Option<&str>, page_size: u32) -> GitHubIssuesClient {
    GitHubIssuesClient::new(
        "widgets".to_string(),
        "acme".to_string(),
        "widgets".to_string(),
        server.uri(),
        token.map(str::to_string),
        page_size,
        Client::new(),
    )
}

fn stackexchange(server: &MockServer) -> StackExchangeClient {
    StackExchangeClient::new(
        "rust-questions".to_string(),
        "rust".to_string(),
        "stackoverflow".to_string(),
        server.uri(),
        Some("app-key".to_string()),
        2,
        Client::new(),
    )
}

#[tokio::test]
async fn test_github_full_page_moves_since_to_newest_item() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ISSUES_PATH))
        .and(query_param("since", "2024-01-01T00:00:00Z"))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "2"))
        .and(header("authorization", "Bearer secret"))
        .and(header("accept", "application/vnd.github+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            issue(1, "First", "2024-01-02T00:00:00Z"),
            issue(2, "Second", "2024-01-03T00:00:00Z"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let page = github(&server, Some("secret"), 2)
        .fetch_page(&cursor())
        .await
        .unwrap();

    assert_eq!(page.items.len(), 2);
    assert!(page.has_more);
    assert_eq!(page.next_cursor.page, 1);
    assert_eq!(page.next_cursor.since, ts("2024-01-03T00:00:00Z"));
}

fn issues_since(since: &str, body: serde_json::Value) -> Mock {
    Mock::given(method("GET"))
        .and(path(ISSUES_PATH))
        .and(query_param("since", since))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
}

#[tokio::test]
async fn test_github_item_updated_while_paging_does_not_hide_others() {
    let server = MockServer::start().await;
    // Issue 1 was first seen at 01-02 and is updated to 01-06 after page one
    issues_since(
        "2024-01-01T00:00:00Z",
        json!([
            issue(1, "A", "2024-01-02T00:00:00Z"),
            issue(2, "B", "2024-01-03T00:00:00Z"),
        ]),
    )
    .mount(&server)
    .await;
    issues_since(
        "2024-01-03T00:00:00Z",
        json!([
            issue(2, "B", "2024-01-03T00:00:00Z"),
            issue(3, "C", "2024-01-04T00:00:00Z"),
        ]),
    )
    .mount(&server)
    .await;
    issues_since(
        "2024-01-04T00:00:00Z",
        json!([
            issue(3, "C", "2024-01-04T00:00:00Z"),
            issue(4, "D", "2024-01-05T00:00:00Z"),
        ]),
    )
    .mount(&server)
    .await;
    issues_since(
        "2024-01-05T00:00:00Z",
        json!([
            issue(4, "D", "2024-01-05T00:00:00Z"),
            issue(1, "A", "2024-01-06T00:00:00Z"),
        ]),
    )
    .mount(&server)
    .await;
    issues_since(
        "2024-01-06T00:00:00Z",
        json!([issue(1, "A", "2024-01-06T00:00:00Z")]),
    )
    .mount(&server)
    .await;

    let client = github(&server, None, 2);
    let mut cursor = cursor();
    let mut seen = Vec::new();
    for _ in 0..10 {
        let page = client.fetch_page(&cursor).await.unwrap();
        for item in &page.items {
            seen.push(normalize(item, Utc::now()).unwrap().external_id);
        }
        cursor = page.next_cursor;
        if !page.has_more {
            break;
        }
    }

    for id in ["1", "2", "3", "4"] {
        assert!(seen.iter().any(|s| s == id), "issue {} never fetched", id);
    }
    assert_eq!(cursor.since, ts("2024-01-06T00:00:00Z"));
}

#[tokio::test]
async fn test_github_full_page_on_one_timestamp_pages_forward() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ISSUES_PATH))
        .and(query_param("since", "2024-01-01T00:00:00Z"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            issue(1, "A", "2024-01-01T00:00:00Z"),
            issue(2, "B", "2024-01-01T00:00:00Z"),
        ])))
        .mount(&server)
        .await;

    let page = github(&server, None, 2)
        .fetch_page(&cursor())
        .await
        .unwrap();

    assert!(page.has_more);
    assert_eq!(page.next_cursor.since, cursor().since);
    assert_eq!(page.next_cursor.page, 2);
}

#[tokio::test]
async fn test_github_short_page_closes_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ISSUES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([issue(
            1,
            "Only",
            "2024-01-05T06:07:08Z"
        )])))
        .mount(&server)
        .await;

    let page = github(&server, None, 100)
        .fetch_page(&cursor())
        .await
        .unwrap();

    assert!(!page.has_more);
    assert_eq!(page.next_cursor.page, 1);
    assert_eq!(page.next_cursor.since, ts("2024-01-05T06:07:08Z"));

    let record = normalize(&page.items[0], Utc::now()).unwrap();
    assert_eq!(record.source, SourceKind::GitHub);
    assert_eq!(record.external_id, "1");
}

#[tokio::test]
async fn test_github_empty_page_keeps_since() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ISSUES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let page = github(&server, None, 100)
        .fetch_page(&cursor())
        .await
        .unwrap();

    assert!(page.items.is_empty());
    assert_eq!(page.next_cursor, cursor());
}

#[tokio::test]
async fn test_github_429_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ISSUES_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&server)
        .await;

    let err = github(&server, None, 100)
        .fetch_page(&cursor())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(30))
        }
    );
}

#[tokio::test]
async fn test_github_403_quota_exhausted() {
    let server = MockServer::start().await;
    let reset = (Utc::now().timestamp() + 600).to_string();
    Mock::given(method("GET"))
        .and(path(ISSUES_PATH))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", reset.as_str()),
        )
        .mount(&server)
        .await;

    let err = github(&server, None, 100)
        .fetch_page(&cursor())
        .await
        .unwrap_err();

    match err {
        FetchError::RateLimited {
            retry_after: Some(delay),
        } => assert!(delay > Duration::from_secs(500) && delay <= Duration::from_secs(600)),
        other => panic!("expected rate limit with delay, got {:?}", other),
    }
}

#[tokio::test]
async fn test_github_error_classification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ISSUES_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ISSUES_PATH))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ISSUES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let client = github(&server, None, 100);

    assert!(client.fetch_page(&cursor()).await.unwrap_err().is_transient());
    assert!(matches!(
        client.fetch_page(&cursor()).await.unwrap_err(),
        FetchError::Http { status: 404, .. }
    ));
    assert!(matches!(
        client.fetch_page(&cursor()).await.unwrap_err(),
        FetchError::Decode { .. }
    ));
}

#[tokio::test]
async fn test_stackexchange_page_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("tagged", "rust"))
        .and(query_param("site", "stackoverflow"))
        .and(query_param("sort", "activity"))
        .and(query_param("min", "1704067200"))
        .and(query_param("pagesize", "2"))
        .and(query_param("key", "app-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {
                    "question_id": 11,
                    "title": "How do I use &quot;impl Trait&quot;?",
                    "link": "https://stackoverflow.com/questions/11",
                    "is_answered": true,
                    "last_activity_date": 1_704_153_600
                },
                {
                    "question_id": 12,
                    "title": "Lifetimes",
                    "link": "https://stackoverflow.com/questions/12",
                    "is_answered": false,
                    "last_activity_date": 1_704_240_000
                }
            ],
            "has_more": true,
            "backoff": 10,
            "quota_remaining": 9000
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = stackexchange(&server).fetch_page(&cursor()).await.unwrap();

    assert_eq!(page.items.len(), 2);
    assert!(page.has_more);
    assert_eq!(page.min_delay, Some(Duration::from_secs(10)));
    assert_eq!(page.next_cursor.page, 1);
    assert_eq!(
        page.next_cursor.since,
        Utc.timestamp_opt(1_704_240_000, 0).unwrap()
    );

    let record = normalize(&page.items[0], Utc::now()).unwrap();
    assert_eq!(record.source, SourceKind::StackOverflow);
    assert_eq!(record.title, "How do I use \"impl Trait\"?");
    assert_eq!(record.is_answered, Some(true));
}

#[tokio::test]
async fn test_stackexchange_throttle_violation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_id": 502,
            "error_name": "throttle_violation",
            "error_message": "too many requests from this IP"
        })))
        .mount(&server)
        .await;

    let err = stackexchange(&server)
        .fetch_page(&cursor())
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::RateLimited { retry_after: None });
}

#[tokio::test]
async fn test_stackexchange_bad_parameter_is_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_id": 400,
            "error_name": "bad_parameter",
            "error_message": "site is required"
        })))
        .mount(&server)
        .await;

    let err = stackexchange(&server)
        .fetch_page(&cursor())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Http { status: 400, .. }));
}
