use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::FetcherConfig;
use crate::error::{ErrorKind, Failure, Result};
use crate::events::FetchEvent;
use crate::fetcher::HttpFetcher;
use crate::types::{FetchOptions, RequestId};

/// Model listing root of the Civitai public API.
pub const CIVITAI_MODELS_URL: &str = "https://civitai.com/api/v1/models";

/// What to look up and how.
///
/// A model id wins over a hash when both are given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfoQuery {
    pub model_id: Option<String>,
    pub model_hash: Option<String>,
    /// Join an in-flight lookup of the same model instead of sending another.
    pub deduplicate: bool,
    /// Skip the disk cache and ask the server.
    pub force_fetch: bool,
}

impl Default for ModelInfoQuery {
    fn default() -> Self {
        Self {
            model_id: None,
            model_hash: None,
            deduplicate: true,
            force_fetch: true,
        }
    }
}

impl ModelInfoQuery {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            model_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Look a model up by the hash of one of its files (e.g. AutoV2 or SHA256).
    pub fn by_hash(hash: impl Into<String>) -> Self {
        Self {
            model_hash: Some(hash.into()),
            ..Self::default()
        }
    }

    /// Always send a new request. An in-flight lookup of the same model is
    /// superseded and will not report.
    pub fn allow_duplicates(mut self) -> Self {
        self.deduplicate = false;
        self
    }

    /// Serve a fresh cached answer when there is one.
    pub fn prefer_cache(mut self) -> Self {
        self.force_fetch = false;
        self
    }

    fn endpoint(&self) -> Option<String> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        match (present(&self.model_id), present(&self.model_hash)) {
            (Some(id), _) => Some(format!("/{id}")),
            (None, Some(hash)) => Some(format!("/by-hash/{hash}")),
            (None, None) => None,
        }
    }
}

/// Looks up checkpoint and LoRA metadata on a model catalogue such as Civitai.
///
/// A thin layer over its own [`HttpFetcher`]: lookups get the same
/// coalescing, retry and caching, and their outcomes arrive on
/// [`subscribe`](Self::subscribe) as `DataFetched` / `FetchFailed`.
#[derive(Debug, Clone)]
pub struct ModelInfoFetcher {
    fetcher: HttpFetcher,
}

impl ModelInfoFetcher {
    /// Config for the public Civitai API: 5 s timeout, 2 retries.
    pub fn default_config() -> FetcherConfig {
        FetcherConfig::builder()
            .with_base_url(CIVITAI_MODELS_URL)
            .with_default_timeout(Duration::from_secs(5))
            .with_default_retries(2)
            .build()
    }

    pub fn new(config: FetcherConfig) -> Result<Self> {
        Ok(Self::with_fetcher(HttpFetcher::new(config)?))
    }

    pub fn with_fetcher(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &HttpFetcher {
        &self.fetcher
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.fetcher.subscribe()
    }

    /// Start a lookup and return its id.
    ///
    /// A query with neither an id nor a hash fails right away with status 0.
    pub fn fetch_model_info(&self, query: &ModelInfoQuery) -> RequestId {
        let Some(endpoint) = query.endpoint() else {
            return self.fetcher.reject(Failure::new(
                ErrorKind::Application,
                "Either model_id or model_hash must be provided",
                0,
            ));
        };

        let mut options = FetchOptions::new().use_cache(!query.force_fetch);
        if !query.deduplicate {
            options = options.supersede();
        }
        tracing::info!(endpoint = %endpoint, "fetching model info");
        self.fetcher.fetch(&endpoint, options)
    }

    pub fn fetch_by_id(&self, id: &str) -> RequestId {
        self.fetch_model_info(&ModelInfoQuery::by_id(id))
    }

    pub fn fetch_by_hash(&self, hash: &str) -> RequestId {
        self.fetch_model_info(&ModelInfoQuery::by_hash(hash))
    }

    pub fn cancel(&self, id: RequestId) -> bool {
        self.fetcher.cancel(id)
    }
}
