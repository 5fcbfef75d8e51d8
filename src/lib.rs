//! # sdapi-rs
//!
//! Async, event-driven client for the REST API of a
//! [Stable Diffusion WebUI](https://github.com/AUTOMATIC1111/stable-diffusion-webui)
//! server.
//!
//! Every call returns an id immediately and reports its outcome later on a
//! broadcast channel. Underneath, the fetch layer coalesces duplicate calls
//! per endpoint, retries transient failures with backoff, enforces a
//! per-request timeout, and serves listings from a TTL-bearing disk cache.
//! Progress polling, one-shot image generation and image downloads are
//! built on the same primitives.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sdapi_rs::{ApiEvent, FetcherConfig, GenerationKind, GenerationPayload, StableDiffusionApi};
//!
//! # async fn example() -> sdapi_rs::Result<()> {
//! let config = FetcherConfig::builder()
//!     .with_base_url("http://127.0.0.1:7860")
//!     .with_cache_dir(".cache")
//!     .build();
//! let api = StableDiffusionApi::new(config)?;
//! let mut events = api.subscribe();
//!
//! // Listings arrive as events
//! api.fetch_all_resources();
//!
//! // Generation with progress updates
//! let payload = GenerationPayload::new("a sunset over mountains")
//!     .negative("lowres, blurry")
//!     .steps(25);
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let ApiEvent::ImageProgress { data } = event {
//!             println!("progress: {}", data["progress"]);
//!         }
//!     }
//! });
//! let result = api.generate_sync(GenerationKind::Txt2Img, &payload).await?;
//! println!("{} image(s)", result["images"].as_array().map_or(0, Vec::len));
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod generator;
pub mod model_info;
pub mod payload;
pub mod registry;
pub mod timer;
pub mod tracker;
pub mod types;

pub use api::StableDiffusionApi;
pub use cache::{CacheMeta, CachedResponse, DiskCache};
pub use config::{DownloaderConfig, FetcherConfig, FetcherConfigBuilder, RetryPolicy, TrackerConfig};
pub use downloader::ImageDownloader;
pub use error::{ErrorKind, Failure, Result, SdError};
pub use events::{ApiEvent, DownloadEvent, FetchEvent, GenerationEvent, NoticeLevel, TrackerEvent};
pub use fetcher::HttpFetcher;
pub use generator::GenerationClient;
pub use model_info::{ModelInfoFetcher, ModelInfoQuery, CIVITAI_MODELS_URL};
pub use payload::GenerationPayload;
pub use registry::RequestRegistry;
pub use timer::RequestTimer;
pub use tracker::{PollingTracker, TrackerKind};
pub use types::{
    endpoints, DownloadId, FetchOptions, GenerationId, GenerationKind, Method, RequestDescriptor,
    RequestId, Resource,
};
