//! Integration tests for sessions and the retrying transport.
//!
//! Requests go through a real reqwest client against wiremock servers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use spider_core::user_agent::default_user_agent;
use spider_core::{FetchResult, RequestOptions, RetryPolicy, Session, SessionConfig, TransportError};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, Respond, ResponseTemplate};

mod support;
use support::socket_guard::{closed_port_url, start_mock_server_or_skip};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

fn fast_session(max_retries: u32) -> Session {
    let config = SessionConfig::new().retry_policy(RetryPolicy::new(max_retries, 0.0).unwrap());
    Session::new(config).expect("session should build")
}

fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Fails the first `fail_count` requests with `status`, then answers 200.
struct FlakyResponder {
    count: Arc<AtomicUsize>,
    fail_count: usize,
    status: u16,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_count {
            ResponseTemplate::new(self.status)
        } else {
            ResponseTemplate::new(200).set_body_string("recovered")
        }
    }
}

// ==================== Session Merging ====================

#[tokio::test]
async fn test_session_defaults_reach_the_wire() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/get"))
        .and(header("x-test", "session"))
        .and(header("cookie", "a=1; b=2"))
        .and(query_param("lang", "en"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("merged"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut session = fast_session(0);
    session.set_headers(Some(&map(&[("X-Test", "session")])));
    session.set_cookies(Some(&map(&[("a", "1"), ("b", "2")])));
    session.set_params(Some(&map(&[("lang", "en"), ("page", "1")])));

    let response = session
        .get(
            &format!("{}/get", mock_server.uri()),
            RequestOptions::new().param("page", "2"),
        )
        .await
        .unwrap();

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.text().await.unwrap(), "merged");
}

#[tokio::test]
async fn test_default_user_agent_is_sent() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(header("user-agent", default_user_agent().as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = fast_session(0)
        .get(&mock_server.uri(), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_per_call_header_overrides_session_header() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(header("user-agent", "call/1.0"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut session = fast_session(0);
    session.set_headers(Some(&map(&[("User-Agent", "headers/2020")])));
    let response = session
        .get(
            &mock_server.uri(),
            RequestOptions::new().header("user-agent", "call/1.0"),
        )
        .await
        .unwrap();
    assert_eq!(response.status_code(), 200);
}

// ==================== Retry Behavior ====================

#[tokio::test]
async fn test_retryable_status_recovers() {
    let mock_server = require_mock_server!();
    let count = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(FlakyResponder {
            count: Arc::clone(&count),
            fail_count: 2,
            status: 502,
        })
        .mount(&mock_server)
        .await;

    let response = fast_session(3)
        .get(&format!("{}/flaky", mock_server.uri()), RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(response.status_code(), 200);
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retryable_status_is_returned() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let response = fast_session(2)
        .get(&mock_server.uri(), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status_code(), 500);
}

#[tokio::test]
async fn test_non_retryable_status_single_attempt() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = fast_session(3)
        .get(&mock_server.uri(), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_post_is_not_retried_by_default() {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = SessionConfig::new()
        .retry_policy(RetryPolicy::new(3, 0.0).unwrap().with_retryable_statuses([503]));
    let session = Session::new(config).unwrap();
    let response = session
        .post(&mock_server.uri(), RequestOptions::new().body("x=1"))
        .await
        .unwrap();
    assert_eq!(response.status_code(), 503);
}

#[tokio::test]
async fn test_timeouts_exhaust_into_request_timeout() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(800)))
        .mount(&mock_server)
        .await;

    let config = SessionConfig::new()
        .timeout(Duration::from_millis(100))
        .retry_policy(RetryPolicy::new(1, 0.0).unwrap());
    let session = Session::new(config).unwrap();

    let error = session
        .get(&mock_server.uri(), RequestOptions::new())
        .await
        .unwrap_err();
    assert!(
        matches!(error, TransportError::RequestTimeout { attempts: 2, .. }),
        "unexpected error: {error:?}"
    );
}

#[tokio::test]
async fn test_unreachable_host_exhausts_connection_retries() {
    let Some(url) = closed_port_url() else {
        return;
    };
    let error = fast_session(2)
        .get(&url, RequestOptions::new())
        .await
        .unwrap_err();
    assert!(
        matches!(error, TransportError::ConnectionExhausted { attempts: 3, .. }),
        "unexpected error: {error:?}"
    );
}

// ==================== Fetch ====================

#[tokio::test]
async fn test_fetch_classifies_statuses() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/created"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&mock_server)
        .await;

    let session = fast_session(0);
    let ok = session
        .fetch(&format!("{}/ok", mock_server.uri()), RequestOptions::new())
        .await;
    assert_eq!(ok.into_response().unwrap().text().await.unwrap(), "fine");

    let created = session
        .fetch(&format!("{}/created", mock_server.uri()), RequestOptions::new())
        .await;
    assert!(matches!(created, FetchResult::NoResult { status: 201 }));
}
