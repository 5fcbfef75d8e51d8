
use sdapi_rs::*;
use serde_json::json;
use std::time::Duration;
use test_helpers::*;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn generation_response() -> serde_json::Value {
    json!({
        "images": ["iVBORw0KGgo="],
        "parameters": {"prompt": "a cat"},
        "info": "{\"seed\": 42}"
    })
}

#[tokio::test]
async fn test_txt2img_emits_started_then_completed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({"prompt": "a cat", "steps": 12})))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_response()))
        .expect(1)
        .mount(&server)
        .await;

    let client = GenerationClient::new(config_for(&server));
    let mut events = client.subscribe();
    let payload = GenerationPayload::new("a cat").steps(12);
    let id = client.txt2img(&payload).unwrap();

    match events.recv().await.unwrap() {
        GenerationEvent::Started { generation_id, kind } => {
            assert_eq!(generation_id, id);
            assert_eq!(kind, GenerationKind::Txt2Img);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match events.recv().await.unwrap() {
        GenerationEvent::Completed { generation_id, kind, data } => {
            assert_eq!(generation_id, id);
            assert_eq!(kind, GenerationKind::Txt2Img);
            assert_eq!(data, generation_response());
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        GenerationEvent::Txt2ImgCompleted { generation_id, .. } if generation_id == id
    ));
    assert_eq!(client.in_progress(), 0);
}

#[tokio::test]
async fn test_img2img_emits_kind_specific_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/img2img"))
        .and(body_partial_json(json!({"init_images": ["aW1n"], "denoising_strength": 0.5})))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_response()))
        .mount(&server)
        .await;

    let client = GenerationClient::new(config_for(&server));
    let mut events = client.subscribe();
    let payload = GenerationPayload::new("a cat")
        .init_image("aW1n")
        .denoising_strength(0.5);
    let id = client.img2img(&payload).unwrap();

    let event = wait_for(&mut events, |e| {
        matches!(e, GenerationEvent::Img2ImgCompleted { .. } | GenerationEvent::Failed { .. })
    })
    .await;
    assert!(matches!(event, GenerationEvent::Img2ImgCompleted { generation_id, .. } if generation_id == id));
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(500).set_body_string("CUDA out of memory"))
        .mount(&server)
        .await;

    let client = GenerationClient::new(config_for(&server));
    let mut events = client.subscribe();
    let id = client.txt2img(&GenerationPayload::new("a cat")).unwrap();

    let event = wait_for(&mut events, |e| matches!(e, GenerationEvent::Failed { .. })).await;
    match event {
        GenerationEvent::Failed {
            generation_id,
            message,
            status,
            error_kind,
            ..
        } => {
            assert_eq!(generation_id, id);
            assert_eq!(status, 500);
            assert_eq!(error_kind, ErrorKind::Server);
            assert!(message.contains("Details: CUDA out of memory"), "{message}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_invalid_json_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = GenerationClient::new(config_for(&server));
    let result = client
        .generate_and_wait(GenerationKind::Txt2Img, &GenerationPayload::new("a cat"))
        .await;
    match result {
        Err(SdError::GenerationFailed { message, status }) => {
            assert_eq!(message, "Invalid JSON response");
            assert_eq!(status, 500);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_generate_and_wait_returns_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_response()))
        .mount(&server)
        .await;

    let client = GenerationClient::new(config_for(&server));
    let data = client
        .generate_and_wait(GenerationKind::Txt2Img, &json!({"prompt": "a cat"}))
        .await
        .unwrap();
    assert_eq!(data["images"][0], "iVBORw0KGgo=");
}

#[tokio::test]
async fn test_generation_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let config = FetcherConfig::builder()
        .with_base_url(server.uri())
        .without_cache()
        .with_generation_timeout(Duration::from_millis(200))
        .build();
    let client = GenerationClient::new(config);
    let result = client
        .generate_and_wait(GenerationKind::Txt2Img, &GenerationPayload::new("a cat"))
        .await;
    assert!(matches!(result, Err(SdError::Timeout)), "{result:?}");
}

#[tokio::test]
async fn test_cancel_running_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let client = GenerationClient::new(config_for(&server));
    let mut events = client.subscribe();
    let id = client.txt2img(&GenerationPayload::new("a cat")).unwrap();
    assert_eq!(client.in_progress(), 1);

    assert!(client.cancel(id));
    assert!(!client.cancel(id));
    assert_eq!(client.in_progress(), 0);

    let result = GenerationClient::wait_for(&mut events, id).await;
    assert!(matches!(result, Err(SdError::Cancelled)));

    // Nothing else arrives for the aborted request.
    let rest = collect_for(&mut events, Duration::from_millis(200)).await;
    assert!(rest.is_empty(), "{rest:?}");
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_response()))
        .mount(&server)
        .await;

    let config = FetcherConfig::builder()
        .with_base_url(server.uri())
        .with_auth_token("secret")
        .without_cache()
        .build();
    let client = GenerationClient::new(config);
    let data = client
        .generate_and_wait(GenerationKind::Txt2Img, &GenerationPayload::new("a cat"))
        .await
        .unwrap();
    assert!(data["images"].is_array());
}
