//! Download an image to disk without overwriting existing files.
//!
//! ```sh
//! cargo run --example download_image -- http://127.0.0.1:7860/file=outputs/img.png out/img.png
//! ```

use sdapi_rs::{DownloadEvent, DownloaderConfig, ImageDownloader};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(url), Some(save_path)) = (args.next(), args.next()) else {
        eprintln!("usage: download_image <url> <save-path>");
        return Ok(());
    };

    let downloader = ImageDownloader::new(
        DownloaderConfig::default()
            .with_timeout(Duration::from_secs(20))
            .with_retries(2),
    );
    let mut events = downloader.subscribe();
    downloader.download(&url, save_path, false);

    match events.recv().await? {
        DownloadEvent::Downloaded { path, width, height, .. } => {
            println!("Saved {width}x{height} image to {}", path.display());
        }
        DownloadEvent::Failed { message, url, .. } => {
            eprintln!("Download of {url} failed: {message}");
        }
    }
    Ok(())
}
