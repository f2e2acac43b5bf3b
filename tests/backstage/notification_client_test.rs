//! `NotificationClient` request body and status handling.

use routing_triage::backstage::{BackstageError, NotificationClient, NotificationSender};
use routing_triage::config::BackstageConfig;

use std::time::{Duration, Instant};

use crate::support::{serve_once, serve_silence, split_request};

fn client(api_url: &str) -> NotificationClient {
    let config = BackstageConfig {
        api_url: api_url.to_owned(),
        token: "s3cret".to_owned(),
        recipient_entity: "group:default/oncall".to_owned(),
        ..BackstageConfig::default()
    };
    match NotificationClient::new(&config) {
        Ok(client) => client,
        Err(err) => panic!("notification client should build: {err}"),
    }
}

#[tokio::test]
async fn posts_payload_addressed_to_the_recipient() {
    let (url, request) = serve_once("201 Created", "{}").await;
    let client = client(&url);
    assert_eq!(client.recipient(), "group:default/oncall");

    let status = client.send("Routing failure", "**Analysis:** no key").await;
    assert!(matches!(status, Ok(201)));

    let raw = match request.await {
        Ok(raw) => raw,
        Err(err) => panic!("server should capture the request: {err}"),
    };
    let (head, body) = split_request(&raw);
    assert!(head.starts_with("POST /notifications HTTP/1.1"));
    assert!(head.to_ascii_lowercase().contains("authorization: bearer s3cret"));
    assert!(head.to_ascii_lowercase().contains("content-type: application/json"));

    let body: serde_json::Value = match serde_json::from_str(body) {
        Ok(body) => body,
        Err(err) => panic!("request body should be JSON: {err}"),
    };
    assert_eq!(
        body,
        serde_json::json!({
            "payload": {"title": "Routing failure", "description": "**Analysis:** no key"},
            "recipients": {"type": "entity", "entityRef": "group:default/oncall"}
        })
    );
}

#[tokio::test]
async fn accepts_200_and_202() {
    for status_line in ["200 OK", "202 Accepted"] {
        let (url, _request) = serve_once(status_line, "").await;
        let status = client(&url).send("t", "d").await;
        assert!(status.is_ok(), "{status_line} should be accepted");
    }
}

#[tokio::test]
async fn other_statuses_are_rejected_with_sanitized_body() {
    let long_body = format!("Bearer abcdefghijklmnopqrstuvwx {}", "y".repeat(400));
    let (url, _request) = serve_once("500 Internal Server Error", &long_body).await;

    let err = match client(&url).send("t", "d").await {
        Ok(status) => panic!("500 should fail, got {status}"),
        Err(err) => err,
    };
    match err {
        BackstageError::Server { code, body } => {
            assert_eq!(code, 500);
            assert!(body.starts_with("[REDACTED]"));
            assert!(body.ends_with("...[truncated]"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn no_content_is_not_an_acknowledgement() {
    let (url, _request) = serve_once("204 No Content", "").await;
    let err = client(&url).send("t", "d").await;
    assert!(matches!(err, Err(BackstageError::Server { code: 204, .. })));
}

#[tokio::test]
async fn silent_server_times_out_as_a_network_error() {
    let config = BackstageConfig {
        api_url: serve_silence().await,
        timeout_secs: 1,
        ..BackstageConfig::default()
    };
    let client = match NotificationClient::new(&config) {
        Ok(client) => client,
        Err(err) => panic!("notification client should build: {err}"),
    };

    let started = Instant::now();
    let err = match client.send("t", "d").await {
        Ok(status) => panic!("silent server should time out, got {status}"),
        Err(err) => err,
    };

    assert!(matches!(err, BackstageError::Network(_)), "got {err:?}");
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(10));
}
