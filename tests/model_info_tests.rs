
use sdapi_rs::*;
use serde_json::json;
use std::time::Duration;
use tempfile::tempdir;
use test_helpers::*;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn catalogue_config(server: &MockServer) -> FetcherConfig {
    FetcherConfig::builder()
        .with_base_url(format!("{}/api/v1/models", server.uri()))
        .without_cache()
        .with_retry_policy(RetryPolicy::immediate())
        .with_default_timeout(Duration::from_secs(5))
        .with_default_retries(2)
        .build()
}

fn model_body() -> serde_json::Value {
    json!({"id": 4201, "name": "Realistic Vision", "type": "Checkpoint"})
}

#[tokio::test]
async fn test_lookup_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/models/4201"))
        .and(header("Accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(model_body()))
        .expect(1)
        .mount(&server)
        .await;

    let models = ModelInfoFetcher::new(catalogue_config(&server)).unwrap();
    let mut events = models.subscribe();
    let id = models.fetch_by_id("4201");

    let events = until_terminal(&mut events, id).await;
    match events.last().unwrap() {
        FetchEvent::DataFetched { request_id, data } => {
            assert_eq!(*request_id, id);
            assert_eq!(data["name"], "Realistic Vision");
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }
}

#[tokio::test]
async fn test_lookup_by_hash() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/models/by-hash/6CE0161689"))
        .respond_with(ResponseTemplate::new(200).set_body_json(model_body()))
        .expect(1)
        .mount(&server)
        .await;

    let models = ModelInfoFetcher::new(catalogue_config(&server)).unwrap();
    let mut events = models.subscribe();
    let id = models.fetch_by_hash("6CE0161689");

    let events = until_terminal(&mut events, id).await;
    assert!(matches!(events.last(), Some(FetchEvent::DataFetched { .. })));
}

#[tokio::test]
async fn test_query_without_id_or_hash_fails_at_once() {
    let server = MockServer::start().await;
    let models = ModelInfoFetcher::new(catalogue_config(&server)).unwrap();
    let mut events = models.subscribe();

    let id = models.fetch_model_info(&ModelInfoQuery::default());
    match events.try_recv().unwrap() {
        FetchEvent::FetchFailed {
            request_id,
            message,
            status,
            kind,
        } => {
            assert_eq!(request_id, id);
            assert_eq!(message, "Either model_id or model_hash must be provided");
            assert_eq!(status, 0);
            assert_eq!(kind, ErrorKind::Application);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(models.fetcher().in_flight(), 0);
    assert_eq!(request_count(&server).await, 0);
}

#[tokio::test]
async fn test_concurrent_lookups_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/models/4201"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(model_body())
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let models = ModelInfoFetcher::new(catalogue_config(&server)).unwrap();
    let mut events = models.subscribe();
    let first = models.fetch_by_id("4201");
    let second = models.fetch_by_id("4201");
    assert_eq!(first, second);

    until_terminal(&mut events, first).await;
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_server_errors_use_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/models/4201"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/models/4201"))
        .respond_with(ResponseTemplate::new(200).set_body_json(model_body()))
        .with_priority(2)
        .mount(&server)
        .await;

    let models = ModelInfoFetcher::new(catalogue_config(&server)).unwrap();
    let mut events = models.subscribe();
    let id = models.fetch_by_id("4201");

    let events = until_terminal(&mut events, id).await;
    assert!(matches!(events.last(), Some(FetchEvent::DataFetched { .. })));
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn test_prefer_cache_serves_a_stored_answer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/models/4201"))
        .respond_with(ResponseTemplate::new(200).set_body_json(model_body()))
        .mount(&server)
        .await;
    let temp = tempdir().unwrap();
    let config = FetcherConfig::builder()
        .with_base_url(format!("{}/api/v1/models", server.uri()))
        .with_cache_dir(temp.path())
        .with_retry_policy(RetryPolicy::immediate())
        .build();

    let models = ModelInfoFetcher::new(config).unwrap();
    let mut events = models.subscribe();
    let query = ModelInfoQuery::by_id("4201").prefer_cache();

    let id = models.fetch_model_info(&query);
    until_terminal(&mut events, id).await;
    let id = models.fetch_model_info(&query);
    let second = until_terminal(&mut events, id).await;

    assert!(second
        .iter()
        .any(|e| matches!(e, FetchEvent::CacheUsed { hit: true })));
    assert_eq!(request_count(&server).await, 1);

    // The default query always asks the server.
    let id = models.fetch_by_id("4201");
    until_terminal(&mut events, id).await;
    assert_eq!(request_count(&server).await, 2);
}
