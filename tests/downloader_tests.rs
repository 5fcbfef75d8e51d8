
use sdapi_rs::*;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;
use test_helpers::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn downloader() -> ImageDownloader {
    ImageDownloader::new(DownloaderConfig::default().with_timeout(Duration::from_secs(5)))
}

async fn png_server(width: u32, height: u32) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/outputs/image.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(png_bytes(width, height)),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_download_saves_decoded_image() {
    let server = png_server(8, 6).await;
    let temp = tempdir().unwrap();
    let target = temp.path().join("nested").join("image.png");

    let downloader = downloader();
    let mut events = downloader.subscribe();
    let id = downloader.download(&format!("{}/outputs/image.png", server.uri()), &target, false);
    assert_eq!(downloader.active(), 1);

    match wait_for(&mut events, |_| true).await {
        DownloadEvent::Downloaded {
            download_id,
            path,
            width,
            height,
        } => {
            assert_eq!(download_id, id);
            assert_eq!(path, target);
            assert_eq!((width, height), (8, 6));
            assert_eq!(fs::read(&path).unwrap(), png_bytes(8, 6));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(downloader.active(), 0);
}

#[tokio::test]
async fn test_existing_files_are_never_overwritten() {
    let server = png_server(4, 4).await;
    let temp = tempdir().unwrap();
    let target = temp.path().join("image.png");
    fs::write(&target, b"old").unwrap();
    fs::write(temp.path().join("image_1.png"), b"older").unwrap();

    let downloader = downloader();
    let mut events = downloader.subscribe();
    downloader.download(&format!("{}/outputs/image.png", server.uri()), &target, false);

    match wait_for(&mut events, |_| true).await {
        DownloadEvent::Downloaded { path, .. } => {
            assert_eq!(path, temp.path().join("image_2.png"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(fs::read(&target).unwrap(), b"old");
}

#[tokio::test]
async fn test_http_error_is_retried_without_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/outputs/image.png"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/outputs/image.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(2, 2)))
        .with_priority(2)
        .mount(&server)
        .await;

    let temp = tempdir().unwrap();
    let downloader = downloader();
    let mut events = downloader.subscribe();
    let id = downloader.download(
        &format!("{}/outputs/image.png", server.uri()),
        temp.path().join("image.png"),
        false,
    );

    let event = wait_for(&mut events, |_| true).await;
    assert!(matches!(event, DownloadEvent::Downloaded { download_id, .. } if download_id == id));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].headers.get("cache-control").is_none());
    let retry_cache_control = requests[1]
        .headers
        .get("cache-control")
        .and_then(|v| v.to_str().ok());
    assert_eq!(retry_cache_control, Some("no-cache"));
}

#[tokio::test]
async fn test_undecodable_body_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/outputs/image.png"))
        .respond_with(ResponseTemplate::new(200).set_body_string("definitely not an image"))
        .mount(&server)
        .await;

    let temp = tempdir().unwrap();
    let target = temp.path().join("image.png");
    let downloader = ImageDownloader::new(
        DownloaderConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_retries(2),
    );
    let mut events = downloader.subscribe();
    let url = format!("{}/outputs/image.png", server.uri());
    let id = downloader.download(&url, &target, false);

    match wait_for(&mut events, |_| true).await {
        DownloadEvent::Failed {
            download_id,
            message,
            url: failed_url,
        } => {
            assert_eq!(download_id, id);
            assert!(message.starts_with("Failed to load image"), "{message}");
            assert!(message.ends_with("(max retries reached)"), "{message}");
            assert_eq!(failed_url, url);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(request_count(&server).await, 3);
    assert!(!target.exists());
}

#[tokio::test]
async fn test_http_error_reports_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/outputs/image.png"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such file"))
        .mount(&server)
        .await;

    let temp = tempdir().unwrap();
    let downloader = ImageDownloader::new(
        DownloaderConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_retries(1),
    );
    let mut events = downloader.subscribe();
    let url = format!("{}/outputs/image.png", server.uri());
    downloader.download(&url, temp.path().join("image.png"), false);

    match wait_for(&mut events, |_| true).await {
        DownloadEvent::Failed { message, .. } => {
            assert_eq!(
                message,
                "Server returned HTTP 404: no such file (max retries reached)"
            );
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn test_timeout_is_retried_then_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/outputs/image.png"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let temp = tempdir().unwrap();
    let downloader = ImageDownloader::new(
        DownloaderConfig::default()
            .with_timeout(Duration::from_millis(150))
            .with_retries(1),
    );
    let mut events = downloader.subscribe();
    downloader.download(
        &format!("{}/outputs/image.png", server.uri()),
        temp.path().join("image.png"),
        false,
    );

    match wait_for(&mut events, |_| true).await {
        DownloadEvent::Failed { message, .. } => {
            assert_eq!(message, "Download timed out (max retries reached)");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(downloader.active(), 0);
}

#[tokio::test]
async fn test_cancel_is_silent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/outputs/image.png"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let temp = tempdir().unwrap();
    let downloader = downloader();
    let mut events = downloader.subscribe();
    let id = downloader.download(
        &format!("{}/outputs/image.png", server.uri()),
        temp.path().join("image.png"),
        false,
    );

    assert!(downloader.cancel(id));
    assert_eq!(downloader.active(), 0);
    let rest = collect_for(&mut events, Duration::from_millis(300)).await;
    assert!(rest.is_empty(), "{rest:?}");
}

#[tokio::test]
async fn test_non_http_scheme_is_rejected() {
    let downloader = downloader();
    let mut events = downloader.subscribe();
    downloader.download("file:///etc/passwd", "x.png", false);
    match events.try_recv().unwrap() {
        DownloadEvent::Failed { message, .. } => assert_eq!(message, "Invalid URL"),
        other => panic!("unexpected event: {other:?}"),
    }
}
