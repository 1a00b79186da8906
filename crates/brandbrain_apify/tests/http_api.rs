//! HTTP-level coverage of the Apify client against a wiremock server.

use brandbrain_apify::{ActorClient, ActorClientError, ApifyClient};
use brandbrain_protocol::ActorRunStatus;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn run_body(status: &str) -> serde_json::Value {
    json!({
        "data": {
            "id": "run-1",
            "defaultDatasetId": "ds-1",
            "status": status,
            "startedAt": "2026-01-02T03:04:05.000Z",
            "finishedAt": null
        }
    })
}

#[tokio::test]
async fn test_start_run_posts_input_and_decodes_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/acts/apify~instagram-post-scraper/runs"))
        .respond_with(ResponseTemplate::new(201).set_body_json(run_body("READY")))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApifyClient::new(&server.uri(), "test-token").unwrap();
    let info = client
        .start_run(
            "apify/instagram-post-scraper",
            &json!({"username": "acme", "resultsLimit": 30}),
        )
        .await
        .unwrap();

    assert_eq!(info.run_id, "run-1");
    assert_eq!(info.dataset_id, "ds-1");
    assert_eq!(info.status, ActorRunStatus::Running);
}

#[tokio::test]
async fn test_poll_run_reaches_terminal_status() {
    let server = MockServer::start().await;
    // First poll: still running.
    Mock::given(method("GET"))
        .and(path("/v2/actor-runs/run-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_body("RUNNING")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Then: succeeded.
    Mock::given(method("GET"))
        .and(path("/v2/actor-runs/run-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_body("SUCCEEDED")))
        .mount(&server)
        .await;

    let client = ApifyClient::new(&server.uri(), "test-token").unwrap();
    let info = client
        .poll_run("run-1", Duration::from_secs(5), Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(info.status, ActorRunStatus::Succeeded);
}

#[tokio::test]
async fn test_fetch_items_passes_limit_and_offset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/datasets/ds-1/items"))
        .and(query_param("limit", "2"))
        .and(query_param("offset", "0"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"n": 1}, {"n": 2}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ApifyClient::new(&server.uri(), "test-token").unwrap();
    let items = client.fetch_items("ds-1", 2, 0).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["n"], 1);
}

#[tokio::test]
async fn test_non_2xx_surfaces_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/actor-runs/run-x"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let client = ApifyClient::new(&server.uri(), "test-token").unwrap();
    let err = client.get_run("run-x").await.unwrap_err();
    match err {
        ActorClientError::Api { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream exploded");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // Nothing listens on this port.
    let client = ApifyClient::new("http://127.0.0.1:1", "test-token").unwrap();
    let err = client.get_run("run-1").await.unwrap_err();
    assert!(matches!(err, ActorClientError::Transport(_)));
}
