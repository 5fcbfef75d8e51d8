use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7860";

pub(crate) fn normalize(base_url: String) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Backoff applied between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry. Doubled for every following retry.
    pub base_delay: Duration,
    /// Upper bound for the computed delay (before jitter).
    pub max_delay: Duration,
    /// Add up to 25% random jitter on top of the computed delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Re-issue failed requests without waiting.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if self.base_delay.is_zero() || retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (retry - 1).min(16);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter {
            return delay;
        }
        let extra_ms = (delay.as_millis() as u64) / 4;
        if extra_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..=extra_ms))
    }
}

/// Configuration for [`HttpFetcher`](crate::HttpFetcher) and the clients built on it.
///
/// Use [`FetcherConfig::builder()`] for ergonomic construction, or
/// [`FetcherConfig::default()`] for a local server on port 7860 with a
/// `.cache` directory.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Server root, without a trailing slash.
    pub base_url: String,

    /// Bearer token sent in the `Authorization` header.
    pub auth_token: Option<String>,

    /// Directory of the disk response cache. `None` disables caching.
    pub cache_dir: Option<PathBuf>,

    /// Lifetime of a cached response when the server sends no `max-age`.
    pub cache_ttl: Duration,

    /// Size cap of the disk cache in bytes.
    pub cache_max_bytes: u64,

    /// Per-request timeout used when a call does not set one.
    pub default_timeout: Duration,

    /// Retry budget used when a call does not set one.
    pub default_retries: u32,

    pub retry: RetryPolicy,

    /// Buffered events per subscriber before the slowest one starts lagging.
    pub event_capacity: usize,

    /// Deadline for a single generation request.
    pub generation_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: None,
            cache_dir: Some(PathBuf::from(".cache")),
            cache_ttl: Duration::from_secs(3600),
            cache_max_bytes: 100 * 1024 * 1024,
            default_timeout: Duration::from_secs(10),
            default_retries: 3,
            retry: RetryPolicy::default(),
            event_capacity: 256,
            generation_timeout: Duration::from_secs(600),
        }
    }
}

impl FetcherConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> FetcherConfigBuilder {
        FetcherConfigBuilder::default()
    }
}

/// Builder for [`FetcherConfig`].
#[derive(Default)]
pub struct FetcherConfigBuilder {
    config: FetcherConfig,
}

impl FetcherConfigBuilder {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = normalize(url.into());
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.config.auth_token = if token.trim().is_empty() {
            None
        } else {
            Some(token.trim().to_string())
        };
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    /// Turn the disk cache off entirely.
    pub fn without_cache(mut self) -> Self {
        self.config.cache_dir = None;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn with_cache_max_bytes(mut self, bytes: u64) -> Self {
        self.config.cache_max_bytes = bytes;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    pub fn with_default_retries(mut self, retries: u32) -> Self {
        self.config.default_retries = retries;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.config.generation_timeout = timeout;
        self
    }

    /// Build the final [`FetcherConfig`].
    pub fn build(self) -> FetcherConfig {
        self.config
    }
}

/// Timing of a [`PollingTracker`](crate::PollingTracker).
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Interval between regular polls.
    pub interval: Duration,
    /// Fixed window after which a `Stalled` event fires and a re-poll is forced.
    pub stall_timeout: Duration,
    /// Timeout of each poll request.
    pub poll_timeout: Duration,
    /// Retry budget of each poll request.
    pub poll_retries: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            stall_timeout: Duration::from_secs(3),
            poll_timeout: Duration::from_secs(1),
            poll_retries: 1,
        }
    }
}

impl TrackerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_poll_retries(mut self, retries: u32) -> Self {
        self.poll_retries = retries;
        self
    }
}

/// Configuration for the [`ImageDownloader`](crate::ImageDownloader).
#[derive(Debug, Clone, PartialEq)]
pub struct DownloaderConfig {
    pub timeout: Duration,
    pub retries: u32,
    pub event_capacity: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 2,
            event_capacity: 256,
        }
    }
}

impl DownloaderConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}
