use futures_util::StreamExt;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE,
};
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::cache::{self, DiskCache};
use crate::config::{normalize, FetcherConfig};
use crate::error::{classify_status, classify_transport, ErrorKind, Failure, Result, SdError};
use crate::events::FetchEvent;
use crate::registry::{AttemptId, RequestRegistry};
use crate::timer::{RequestTimer, Transport};
use crate::types::{endpoints, FetchOptions, Method, RequestDescriptor, RequestId, Resource};

/// Build the target URL: base + endpoint + encoded query parameters.
pub fn build_url(base_url: &str, endpoint: &str, params: &[(String, String)]) -> Result<Url> {
    let joined = if endpoint.starts_with('/') || endpoint.is_empty() {
        format!("{base_url}{endpoint}")
    } else {
        format!("{base_url}/{endpoint}")
    };
    let mut url = Url::parse(&joined).map_err(|e| SdError::InvalidUrl(format!("{joined}: {e}")))?;
    if !params.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    Ok(url)
}

/// Parse a response body: JSON when the content type says so, otherwise
/// the text wrapped as `{"raw": ...}`. An empty body is `null`.
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> std::result::Result<Value, String> {
    let is_json = content_type
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("application/json") || ct.contains("+json")
        })
        .unwrap_or(false);
    if body.is_empty() {
        return Ok(Value::Null);
    }
    if is_json {
        serde_json::from_slice(body).map_err(|e| e.to_string())
    } else {
        Ok(json!({ "raw": String::from_utf8_lossy(body) }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheMode {
    PreferCache,
    Network,
}

#[derive(Debug)]
struct PreparedRequest {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    cache_mode: CacheMode,
    store: bool,
    ttl: Duration,
}

#[derive(Debug)]
enum Outcome {
    Response {
        status: u16,
        content_type: Option<String>,
        body: Vec<u8>,
        from_cache: bool,
    },
    Transport(Failure),
}

/// Event-driven HTTP client for a Stable Diffusion WebUI server.
///
/// [`fetch`](Self::fetch) returns a [`RequestId`] immediately; the outcome
/// arrives later on the [`subscribe`](Self::subscribe) channel as exactly one
/// `DataFetched` or `FetchFailed`. While a request for an endpoint is in
/// flight, further calls for the same endpoint return its id instead of
/// issuing a second call. Transient failures (transport errors, timeouts,
/// HTTP 5xx) are retried transparently with a cache-bypassing re-issue of
/// the same request.
///
/// Cloning is cheap; clones share state. Must be used from within a tokio
/// runtime.
///
/// # Example
/// ```no_run
/// use sdapi_rs::{FetchEvent, FetcherConfig, HttpFetcher};
///
/// # async fn example() -> sdapi_rs::Result<()> {
/// let fetcher = HttpFetcher::new(FetcherConfig::default())?;
/// let mut events = fetcher.subscribe();
/// let id = fetcher.fetch_models();
///
/// while let Ok(event) = events.recv().await {
///     match event {
///         FetchEvent::DataFetched { request_id, data } if request_id == id => {
///             println!("{data}");
///             break;
///         }
///         FetchEvent::FetchFailed { request_id, message, .. } if request_id == id => {
///             eprintln!("{message}");
///             break;
///         }
///         _ => {}
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    inner: Arc<FetcherInner>,
}

#[derive(Debug)]
struct FetcherInner {
    http: Client,
    config: FetcherConfig,
    cache: Option<DiskCache>,
    registry: Mutex<RequestRegistry>,
    events: broadcast::Sender<FetchEvent>,
}

impl HttpFetcher {
    /// Create a fetcher, opening the disk cache if one is configured.
    pub fn new(config: FetcherConfig) -> Result<Self> {
        Self::with_http_client(config, Client::new())
    }

    /// Use a custom `reqwest::Client` (for connection pooling, proxies, TLS).
    pub fn with_http_client(mut config: FetcherConfig, http: Client) -> Result<Self> {
        config.base_url = normalize(config.base_url);
        let cache = match &config.cache_dir {
            Some(dir) => Some(DiskCache::open(dir, config.cache_max_bytes)?),
            None => None,
        };
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Ok(Self {
            inner: Arc::new(FetcherInner {
                http,
                config,
                cache,
                registry: Mutex::new(RequestRegistry::new()),
                events,
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.config.base_url
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.inner.config
    }

    /// Receive every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.inner.events.subscribe()
    }

    // ── Requests ────────────────────────────────────────────────────

    /// Start a request for `endpoint` and return its id without waiting.
    ///
    /// If a request for `endpoint` is already in flight its id is returned
    /// and nothing is sent, unless `options.supersede` is set.
    pub fn fetch(&self, endpoint: &str, options: FetchOptions) -> RequestId {
        let inner = &self.inner;
        let mut registry = inner.lock();
        let id = RequestId::new();

        if options.supersede {
            if let Some(old) = registry.replace(endpoint, id) {
                tracing::warn!(endpoint, superseded = %old, request_id = %id, "superseding active request");
            }
        } else if let Err(existing) = registry.register(endpoint, id) {
            tracing::warn!(endpoint, active = %existing, "request coalesced into active request");
            return existing;
        }

        registry.insert_descriptor(RequestDescriptor {
            id,
            endpoint: endpoint.to_string(),
            method: options.method,
            headers: options.headers,
            body: options.body,
            params: options.params,
            timeout: options.timeout.unwrap_or(inner.config.default_timeout),
            use_cache: options.use_cache.unwrap_or(true),
            retries_remaining: options.retries.unwrap_or(inner.config.default_retries),
            attempts: 0,
        });
        tracing::debug!(endpoint, request_id = %id, "starting request");

        inner.issue(&mut registry, id, false, Duration::ZERO);
        id
    }

    /// Fail a request that cannot be sent at all. A fresh id is returned and
    /// its `FetchFailed` is emitted before this returns.
    pub(crate) fn reject(&self, failure: Failure) -> RequestId {
        let id = RequestId::new();
        tracing::error!(request_id = %id, status = failure.status, "{}", failure.message);
        self.inner.emit(FetchEvent::FetchFailed {
            request_id: id,
            message: failure.message,
            status: failure.status,
            kind: failure.kind,
        });
        id
    }

    /// Abort a request. Emits a terminal `FetchFailed` with kind `Cancelled`.
    /// Unknown ids are ignored.
    pub fn cancel(&self, id: RequestId) -> bool {
        let mut registry = self.inner.lock();
        self.inner.cancel_locked(&mut registry, id)
    }

    /// Abort every in-flight request. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut registry = self.inner.lock();
        registry
            .request_ids()
            .into_iter()
            .filter(|id| self.inner.cancel_locked(&mut registry, *id))
            .count()
    }

    /// Number of requests that have not reached a terminal state.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_in_flight(&self, id: RequestId) -> bool {
        self.inner.lock().descriptor(id).is_some()
    }

    /// The request currently registered for `endpoint`.
    pub fn active_request(&self, endpoint: &str) -> Option<RequestId> {
        self.inner.lock().active_for(endpoint)
    }

    // ── Cache ───────────────────────────────────────────────────────

    pub fn cache(&self) -> Option<&DiskCache> {
        self.inner.cache.as_ref()
    }

    /// Drop every cached response.
    pub fn clear_cache(&self) -> Result<()> {
        if let Some(cache) = &self.inner.cache {
            tracing::info!(
                size_mb = cache.size() as f64 / 1024.0 / 1024.0,
                "clearing response cache"
            );
            cache.clear()?;
        }
        Ok(())
    }

    pub fn cache_size(&self) -> u64 {
        self.inner.cache.as_ref().map(DiskCache::size).unwrap_or(0)
    }

    // ── Endpoint shortcuts ──────────────────────────────────────────

    pub fn fetch_resource(&self, resource: Resource, use_cache: bool) -> RequestId {
        self.fetch(
            resource.endpoint(),
            FetchOptions::new().use_cache(use_cache),
        )
    }

    pub fn fetch_models(&self) -> RequestId {
        self.fetch_resource(Resource::Models, true)
    }

    pub fn fetch_vaes(&self) -> RequestId {
        self.fetch_resource(Resource::Vaes, true)
    }

    pub fn fetch_embeddings(&self) -> RequestId {
        self.fetch_resource(Resource::Embeddings, true)
    }

    pub fn fetch_loras(&self) -> RequestId {
        self.fetch_resource(Resource::Loras, true)
    }

    pub fn fetch_styles(&self) -> RequestId {
        self.fetch_resource(Resource::Styles, true)
    }

    pub fn fetch_upscalers(&self) -> RequestId {
        self.fetch_resource(Resource::Upscalers, true)
    }

    pub fn fetch_samplers(&self) -> RequestId {
        self.fetch_resource(Resource::Samplers, true)
    }

    pub fn fetch_options(&self) -> RequestId {
        self.fetch(endpoints::OPTIONS, FetchOptions::new().use_cache(false))
    }

    /// Ask `/sdapi/v1/version` whether the server is up. Emits
    /// `ServerAvailable` when it completes; a 401/403 answer counts as up.
    pub fn check_server(&self) -> RequestId {
        self.fetch(
            endpoints::VERSION,
            FetchOptions::new()
                .timeout(Duration::from_secs(5))
                .retries(0)
                .use_cache(false),
        )
    }

    /// Poll `/sdapi/v1/progress`: short timeout, one retry, never cached.
    pub fn fetch_progress(&self) -> RequestId {
        self.fetch(
            endpoints::PROGRESS,
            FetchOptions::new()
                .timeout(Duration::from_secs(1))
                .retries(1)
                .use_cache(false),
        )
    }

    /// Poll `/sdapi/v1/status`: short timeout, one retry, never cached.
    pub fn fetch_status(&self) -> RequestId {
        self.fetch(
            endpoints::STATUS,
            FetchOptions::new()
                .timeout(Duration::from_secs(1))
                .retries(1)
                .use_cache(false),
        )
    }

    /// Ask the server to rescan checkpoints, then drop the whole cache.
    pub fn refresh_models(&self) -> RequestId {
        self.refresh(endpoints::REFRESH_CHECKPOINTS)
    }

    /// Ask the server to rescan LoRAs, then drop the whole cache.
    pub fn refresh_loras(&self) -> RequestId {
        self.refresh(endpoints::REFRESH_LORAS)
    }

    fn refresh(&self, endpoint: &str) -> RequestId {
        let id = self.fetch(
            endpoint,
            FetchOptions::new().method(Method::Post).use_cache(false),
        );
        if let Err(e) = self.clear_cache() {
            tracing::warn!(error = %e, "failed to clear response cache");
        }
        id
    }

    /// Pre-fetch the common listings so later calls can be served from cache.
    pub fn warm_up_cache(&self) -> Vec<RequestId> {
        [
            Resource::Models,
            Resource::Vaes,
            Resource::Embeddings,
            Resource::Loras,
            Resource::Styles,
        ]
        .into_iter()
        .map(|resource| {
            let id = self.fetch_resource(resource, true);
            tracing::info!(endpoint = resource.endpoint(), request_id = %id, "warming up cache");
            id
        })
        .collect()
    }
}

impl FetcherInner {
    fn lock(&self) -> MutexGuard<'_, RequestRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: FetchEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Send one transport attempt for `id` and arm its timer.
    fn issue(
        self: &Arc<Self>,
        registry: &mut RequestRegistry,
        id: RequestId,
        bypass_cache: bool,
        delay: Duration,
    ) {
        let Some(descriptor) = registry.descriptor_mut(id) else {
            return;
        };
        descriptor.attempts += 1;
        let descriptor = descriptor.clone();

        let prepared = match self.prepare(&descriptor, bypass_cache) {
            Ok(prepared) => prepared,
            Err(e) => {
                let failure = Failure::new(
                    ErrorKind::Protocol,
                    format!("Failed to initiate request: {e}"),
                    0,
                );
                self.fail(registry, id, failure);
                return;
            }
        };
        tracing::debug!(
            request_id = %id,
            method = %descriptor.method,
            url = %prepared.url,
            attempt = descriptor.attempts,
            cache = ?prepared.cache_mode,
            "issuing request"
        );

        let attempt = registry.next_attempt_id();
        let weak = Arc::downgrade(self);
        let http = self.http.clone();
        let cache = self.cache.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = perform(&http, cache.as_ref(), prepared, &events, id).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_finished(attempt, outcome);
            }
        });
        registry.track_reply(
            attempt,
            &descriptor.endpoint,
            id,
            Transport::new(task.abort_handle()),
        );

        let weak = Arc::downgrade(self);
        let timer = RequestTimer::start(delay + descriptor.timeout, move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_timeout(id, attempt);
            }
        });
        registry.arm_timer(id, timer);
    }

    fn prepare(&self, descriptor: &RequestDescriptor, bypass_cache: bool) -> Result<PreparedRequest> {
        let url = build_url(&self.config.base_url, &descriptor.endpoint, &descriptor.params)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in &descriptor.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SdError::InvalidRequest(format!("header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SdError::InvalidRequest(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }
        if let Some(token) = &self.config.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SdError::InvalidRequest(format!("auth token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let body = match &descriptor.body {
            Some(value) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Some(serde_json::to_vec(value)?)
            }
            None => None,
        };

        let mut cache_mode = CacheMode::Network;
        if descriptor.use_cache && !bypass_cache {
            if let Some(cache) = &self.cache {
                if cache.is_expired(url.as_str()) {
                    tracing::debug!(url = %url, "cached entry expired, revalidating over network");
                } else {
                    cache_mode = CacheMode::PreferCache;
                }
            }
        }
        if bypass_cache || !descriptor.use_cache {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }

        Ok(PreparedRequest {
            url,
            method: descriptor.method,
            headers,
            body,
            cache_mode,
            store: descriptor.use_cache && descriptor.method == Method::Get && self.cache.is_some(),
            ttl: self.config.cache_ttl,
        })
    }

    fn on_finished(self: &Arc<Self>, attempt: AttemptId, outcome: Outcome) {
        let mut registry = self.lock();
        let Some((endpoint, id)) = registry.take_reply(attempt) else {
            // Timed out or cancelled while the response was in transit.
            return;
        };
        registry.stop_timer(id);

        if !registry.is_active(&endpoint, id) {
            tracing::warn!(endpoint = %endpoint, request_id = %id, "ignoring stale response");
            registry.forget(id);
            return;
        }

        let is_health_check = endpoint == endpoints::VERSION;
        match outcome {
            Outcome::Transport(failure) => {
                if is_health_check {
                    self.emit(FetchEvent::ServerAvailable { available: false });
                    self.fail(&mut registry, id, failure);
                } else {
                    self.retry_or_fail(&mut registry, id, failure);
                }
            }
            Outcome::Response {
                status,
                content_type,
                body,
                from_cache,
            } => {
                self.emit(FetchEvent::CacheUsed { hit: from_cache });
                tracing::info!(
                    endpoint = %endpoint,
                    request_id = %id,
                    status,
                    source = if from_cache { "cache" } else { "network" },
                    "response received"
                );

                if is_health_check {
                    // A server that demands credentials is still running.
                    self.emit(FetchEvent::ServerAvailable {
                        available: (200..300).contains(&status) || status == 401 || status == 403,
                    });
                }

                if status == 401 || status == 403 {
                    self.emit(FetchEvent::AuthenticationRequired);
                    let failure = Failure::new(ErrorKind::Application, "Authentication required", status);
                    self.fail(&mut registry, id, failure);
                    return;
                }

                if let Some(failure) = classify_status(status) {
                    if failure.kind.is_retryable() && !is_health_check {
                        self.retry_or_fail(&mut registry, id, failure);
                    } else {
                        self.fail(&mut registry, id, failure);
                    }
                    return;
                }

                match parse_body(content_type.as_deref(), &body) {
                    Ok(data) => {
                        registry.finish(id);
                        self.emit(FetchEvent::DataFetched {
                            request_id: id,
                            data,
                        });
                    }
                    Err(e) => {
                        let failure = Failure::new(
                            ErrorKind::Protocol,
                            format!("Failed to process response: {e}"),
                            status,
                        );
                        self.fail(&mut registry, id, failure);
                    }
                }
            }
        }
    }

    fn on_timeout(self: &Arc<Self>, id: RequestId, attempt: AttemptId) {
        let mut registry = self.lock();
        if !registry.has_reply(attempt) {
            // The attempt completed while this timer was firing.
            return;
        }
        registry.stop_timer(id);
        let Some(endpoint) = registry.abort_replies(id) else {
            return;
        };

        if !registry.is_active(&endpoint, id) {
            registry.forget(id);
            return;
        }

        tracing::warn!(endpoint = %endpoint, request_id = %id, "request timed out");
        if endpoint == endpoints::VERSION {
            self.emit(FetchEvent::ServerAvailable { available: false });
            self.fail(&mut registry, id, Failure::timed_out());
        } else {
            self.retry_or_fail(&mut registry, id, Failure::timed_out());
        }
    }

    fn retry_or_fail(self: &Arc<Self>, registry: &mut RequestRegistry, id: RequestId, failure: Failure) {
        if failure.kind.marks_server_down() {
            self.emit(FetchEvent::ServerAvailable { available: false });
        }

        let Some(descriptor) = registry.descriptor_mut(id) else {
            return;
        };
        if failure.kind.is_retryable() && descriptor.retries_remaining > 0 {
            descriptor.retries_remaining -= 1;
            let delay = self.config.retry.delay_for(descriptor.attempts);
            tracing::warn!(
                request_id = %id,
                retries_left = descriptor.retries_remaining,
                delay_ms = delay.as_millis() as u64,
                reason = %failure.message,
                "retrying request"
            );
            self.issue(registry, id, true, delay);
        } else {
            self.fail(registry, id, failure);
        }
    }

    /// Emit the terminal failure for `id` and drop its bookkeeping.
    fn fail(&self, registry: &mut RequestRegistry, id: RequestId, failure: Failure) {
        tracing::error!(
            request_id = %id,
            status = failure.status,
            kind = ?failure.kind,
            "{}",
            failure.message
        );
        registry.finish(id);
        self.emit(FetchEvent::FetchFailed {
            request_id: id,
            message: failure.message,
            status: failure.status,
            kind: failure.kind,
        });
    }

    fn cancel_locked(&self, registry: &mut RequestRegistry, id: RequestId) -> bool {
        let Some(descriptor) = registry.finish(id) else {
            return false;
        };
        tracing::info!(endpoint = %descriptor.endpoint, request_id = %id, "request cancelled");
        let failure = Failure::cancelled();
        self.emit(FetchEvent::FetchFailed {
            request_id: id,
            message: failure.message,
            status: failure.status,
            kind: failure.kind,
        });
        true
    }
}

async fn perform(
    http: &Client,
    cache: Option<&DiskCache>,
    request: PreparedRequest,
    events: &broadcast::Sender<FetchEvent>,
    id: RequestId,
) -> Outcome {
    if request.cache_mode == CacheMode::PreferCache {
        if let Some(hit) = cache.and_then(|c| c.load(request.url.as_str())) {
            return Outcome::Response {
                status: 200,
                content_type: hit.content_type,
                body: hit.body,
                from_cache: true,
            };
        }
    }

    let mut builder = http
        .request(request.method.as_reqwest(), request.url.clone())
        .headers(request.headers);
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let resp = match builder.send().await {
        Ok(resp) => resp,
        Err(e) => return Outcome::Transport(classify_transport(&e)),
    };

    let status = resp.status().as_u16();
    let content_type = header_string(resp.headers(), CONTENT_TYPE);
    let cache_control = header_string(resp.headers(), CACHE_CONTROL);
    let total = resp.content_length();

    let mut body = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                body.extend_from_slice(&bytes);
                let _ = events.send(FetchEvent::Progress {
                    request_id: id,
                    received: body.len() as u64,
                    total,
                });
            }
            Err(e) => return Outcome::Transport(classify_transport(&e)),
        }
    }

    if request.store && (200..300).contains(&status) {
        if let Some(cache) = cache {
            let ttl = match cache::ttl_from_cache_control(cache_control.as_deref()) {
                Some(None) => None,
                Some(Some(ttl)) => Some(ttl),
                None => Some(request.ttl),
            };
            if let Some(ttl) = ttl {
                if let Err(e) = cache.store(request.url.as_str(), content_type.as_deref(), &body, ttl) {
                    tracing::warn!(url = %request.url, error = %e, "failed to store response in cache");
                }
            }
        }
    }

    Outcome::Response {
        status,
        content_type,
        body,
        from_cache: false,
    }
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_joins_and_encodes() {
        let url = build_url("http://127.0.0.1:7860", "/sdapi/v1/sd-models", &[]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:7860/sdapi/v1/sd-models");

        let params = vec![("q".to_string(), "a b&c".to_string())];
        let url = build_url("http://127.0.0.1:7860", "sdapi/v1/lora", &params).unwrap();
        assert_eq!(url.path(), "/sdapi/v1/lora");
        assert_eq!(url.query(), Some("q=a+b%26c"));
    }

    #[test]
    fn test_build_url_rejects_garbage() {
        let err = build_url("not a url", "/x", &[]).unwrap_err();
        assert!(matches!(err, SdError::InvalidUrl(_)));
    }

    #[test]
    fn test_parse_body_json_and_raw() {
        let value = parse_body(Some("application/json; charset=utf-8"), br#"{"a":1}"#).unwrap();
        assert_eq!(value, json!({"a": 1}));

        let value = parse_body(Some("application/problem+json"), b"[1]").unwrap();
        assert_eq!(value, json!([1]));

        let value = parse_body(Some("text/plain"), b"hello").unwrap();
        assert_eq!(value, json!({"raw": "hello"}));

        let value = parse_body(None, b"hello").unwrap();
        assert_eq!(value, json!({"raw": "hello"}));
    }

    #[test]
    fn test_parse_body_empty_and_invalid() {
        assert_eq!(parse_body(Some("application/json"), b"").unwrap(), Value::Null);
        assert!(parse_body(Some("application/json"), b"{oops").is_err());
    }

    #[tokio::test]
    async fn test_without_cache_reports_zero_size() {
        let config = FetcherConfig::builder().without_cache().build();
        let fetcher = HttpFetcher::new(config).unwrap();
        assert!(fetcher.cache().is_none());
        assert_eq!(fetcher.cache_size(), 0);
        assert!(fetcher.clear_cache().is_ok());
        assert_eq!(fetcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_is_ignored() {
        let config = FetcherConfig::builder().without_cache().build();
        let fetcher = HttpFetcher::new(config).unwrap();
        let mut events = fetcher.subscribe();
        assert!(!fetcher.cancel(RequestId::new()));
        assert!(events.try_recv().is_err());
    }
}
