//! List models, VAEs, embeddings, LoRAs and styles from a WebUI server.
//!
//! Requires a running Stable Diffusion WebUI at http://127.0.0.1:7860
//! started with `--api`. Listings are cached under `.sdapi-cache`, so a
//! second run is served from disk.
//!
//! ```sh
//! RUST_LOG=sdapi_rs=debug cargo run --example list_resources
//! ```

use sdapi_rs::{ApiEvent, FetcherConfig, StableDiffusionApi};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = FetcherConfig::builder()
        .with_base_url("http://127.0.0.1:7860")
        .with_cache_dir(".sdapi-cache")
        .build();
    let api = StableDiffusionApi::new(config)?;
    let mut events = api.subscribe();

    api.check_server_status();
    let mut remaining = api.fetch_all_resources().len();

    let listen = async {
        while remaining > 0 {
            match events.recv().await {
                Ok(ApiEvent::ServerStatusChanged { available }) => {
                    println!("Server available: {available}");
                }
                Ok(ApiEvent::ResourceFetched { resource, data }) => {
                    let count = data.as_array().map_or(0, Vec::len);
                    println!("{resource:?}: {count} entries");
                    remaining -= 1;
                }
                Ok(ApiEvent::ResourceFetchFailed { resource, message, status }) => {
                    eprintln!("{resource:?} failed ({status}): {message}");
                    remaining -= 1;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(60), listen).await.is_err() {
        eprintln!("Timed out waiting for listings");
    }

    if let Some(cache) = api.fetcher().cache() {
        println!("Cache: {} entries, {} bytes", cache.len(), cache.size());
    }
    api.close();
    Ok(())
}
