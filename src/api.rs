use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::config::{FetcherConfig, TrackerConfig};
use crate::error::{Result, SdError};
use crate::events::{ApiEvent, FetchEvent, GenerationEvent, NoticeLevel, TrackerEvent};
use crate::fetcher::HttpFetcher;
use crate::generator::GenerationClient;
use crate::tracker::PollingTracker;
use crate::types::{endpoints, FetchOptions, GenerationId, GenerationKind, Method, RequestId, Resource};

/// What an outstanding facade request was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Resource(Resource),
    RefreshModels,
    RefreshLoras,
}

#[derive(Debug, Default)]
struct ApiState {
    pending: HashMap<RequestId, Pending>,
    active_generation: Option<GenerationId>,
}

/// High-level entry point for a Stable Diffusion WebUI server.
///
/// Composes an [`HttpFetcher`], a [`GenerationClient`] and two
/// [`PollingTracker`]s (progress and status) and re-dispatches their events
/// as resource-specific [`ApiEvent`]s. Only one generation may run at a
/// time; progress monitoring starts with it and stops when it finishes.
///
/// Must be created from within a tokio runtime.
///
/// # Example
/// ```no_run
/// use sdapi_rs::{ApiEvent, FetcherConfig, GenerationPayload, StableDiffusionApi};
///
/// # async fn example() -> sdapi_rs::Result<()> {
/// let api = StableDiffusionApi::new(FetcherConfig::default())?;
/// let mut events = api.subscribe();
///
/// api.get_models();
/// api.generate_txt_image(&GenerationPayload::new("a red fox").steps(20))?;
///
/// while let Ok(event) = events.recv().await {
///     match event {
///         ApiEvent::ResourceFetched { resource, data } => println!("{resource:?}: {data}"),
///         ApiEvent::ImageProgress { data } => println!("progress {}", data["progress"]),
///         ApiEvent::ImageGenerated { .. } | ApiEvent::ImageGenerationFailed { .. } => break,
///         _ => {}
///     }
/// }
/// api.close();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StableDiffusionApi {
    fetcher: HttpFetcher,
    generator: GenerationClient,
    progress: Arc<PollingTracker>,
    status: PollingTracker,
    events: broadcast::Sender<ApiEvent>,
    state: Arc<Mutex<ApiState>>,
    dispatchers: Vec<JoinHandle<()>>,
}

impl StableDiffusionApi {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        Self::with_tracker_config(config, TrackerConfig::default())
    }

    /// Like [`new`](Self::new) with custom polling timings for the trackers.
    pub fn with_tracker_config(config: FetcherConfig, tracker: TrackerConfig) -> Result<Self> {
        let http = Client::new();
        let fetcher = HttpFetcher::with_http_client(config.clone(), http.clone())?;
        let generator = GenerationClient::with_http_client(config.clone(), http);
        let progress = Arc::new(PollingTracker::progress(fetcher.clone(), tracker.clone()));
        let status = PollingTracker::status(fetcher.clone(), tracker);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let state = Arc::new(Mutex::new(ApiState::default()));

        let dispatchers = vec![
            tokio::spawn(dispatch_fetch_events(
                fetcher.subscribe(),
                events.clone(),
                Arc::clone(&state),
            )),
            tokio::spawn(dispatch_generation_events(
                generator.subscribe(),
                events.clone(),
                Arc::clone(&state),
                Arc::clone(&progress),
            )),
            tokio::spawn(dispatch_progress_events(progress.subscribe(), events.clone())),
        ];

        Ok(Self {
            fetcher,
            generator,
            progress,
            status,
            events,
            state,
            dispatchers,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApiEvent> {
        self.events.subscribe()
    }

    pub fn base_url(&self) -> &str {
        self.fetcher.base_url()
    }

    pub fn fetcher(&self) -> &HttpFetcher {
        &self.fetcher
    }

    pub fn generator(&self) -> &GenerationClient {
        &self.generator
    }

    pub fn progress_tracker(&self) -> &PollingTracker {
        &self.progress
    }

    pub fn status_tracker(&self) -> &PollingTracker {
        &self.status
    }

    fn lock(&self) -> MutexGuard<'_, ApiState> {
        lock_state(&self.state)
    }

    // ── Resources ───────────────────────────────────────────────────

    /// Fetch a resource list; the result arrives as `ResourceFetched` or
    /// `ResourceFetchFailed`.
    pub fn get_resource(&self, resource: Resource) -> RequestId {
        // Held across the fetch so the dispatcher cannot see the outcome
        // before the request is recorded.
        let mut state = self.lock();
        let id = self.fetcher.fetch_resource(resource, true);
        state.pending.insert(id, Pending::Resource(resource));
        id
    }

    pub fn get_models(&self) -> RequestId {
        self.get_resource(Resource::Models)
    }

    pub fn get_vaes(&self) -> RequestId {
        self.get_resource(Resource::Vaes)
    }

    pub fn get_embeddings(&self) -> RequestId {
        self.get_resource(Resource::Embeddings)
    }

    pub fn get_loras(&self) -> RequestId {
        self.get_resource(Resource::Loras)
    }

    pub fn get_styles(&self) -> RequestId {
        self.get_resource(Resource::Styles)
    }

    pub fn get_upscalers(&self) -> RequestId {
        self.get_resource(Resource::Upscalers)
    }

    pub fn get_samplers(&self) -> RequestId {
        self.get_resource(Resource::Samplers)
    }

    /// Fetch models, VAEs, embeddings, LoRAs and styles.
    pub fn fetch_all_resources(&self) -> Vec<RequestId> {
        [
            Resource::Models,
            Resource::Vaes,
            Resource::Embeddings,
            Resource::Loras,
            Resource::Styles,
        ]
        .into_iter()
        .map(|resource| self.get_resource(resource))
        .collect()
    }

    /// Rescan checkpoints on the server and drop the whole response cache.
    /// Emits `ModelsRefreshed` when the server confirms.
    pub fn refresh_models(&self) -> RequestId {
        let mut state = self.lock();
        let id = self.fetcher.refresh_models();
        state.pending.insert(id, Pending::RefreshModels);
        id
    }

    /// Rescan LoRAs on the server and drop the whole response cache.
    /// Emits `LorasRefreshed` when the server confirms.
    pub fn refresh_loras(&self) -> RequestId {
        let mut state = self.lock();
        let id = self.fetcher.refresh_loras();
        state.pending.insert(id, Pending::RefreshLoras);
        id
    }

    /// Check whether the server is reachable. The answer arrives as `ServerStatusChanged`.
    pub fn check_server_status(&self) -> RequestId {
        self.fetcher.check_server()
    }

    // ── Generation ──────────────────────────────────────────────────

    pub fn is_generating(&self) -> bool {
        self.lock().active_generation.is_some()
    }

    /// Start a generation unless one is already running.
    pub fn generate<P: Serialize + ?Sized>(&self, kind: GenerationKind, payload: &P) -> Result<GenerationId> {
        let mut state = self.lock();
        if let Some(active) = state.active_generation {
            tracing::info!(active = %active, "generation already in progress");
            let _ = self.events.send(ApiEvent::Notice {
                level: NoticeLevel::Warning,
                message: "Generation already in progress".to_string(),
            });
            return Err(SdError::GenerationInProgress);
        }

        let id = self.generator.submit(kind, payload)?;
        state.active_generation = Some(id);
        self.progress.start();
        Ok(id)
    }

    pub fn generate_txt_image<P: Serialize + ?Sized>(&self, payload: &P) -> Result<GenerationId> {
        self.generate(GenerationKind::Txt2Img, payload)
    }

    pub fn generate_img2img_image<P: Serialize + ?Sized>(&self, payload: &P) -> Result<GenerationId> {
        self.generate(GenerationKind::Img2Img, payload)
    }

    /// Run a generation and wait for its result.
    pub async fn generate_sync<P: Serialize + ?Sized>(&self, kind: GenerationKind, payload: &P) -> Result<Value> {
        let mut events = self.generator.subscribe();
        let id = self.generate(kind, payload)?;
        GenerationClient::wait_for(&mut events, id).await
    }

    /// Abort the local request of the running generation.
    pub fn cancel_generation(&self) -> bool {
        let active = self.lock().active_generation;
        active.is_some_and(|id| self.generator.cancel(id))
    }

    /// Ask the server to stop the job it is currently running.
    pub fn interrupt_generation(&self) -> RequestId {
        self.fetcher.fetch(
            endpoints::INTERRUPT,
            FetchOptions::new()
                .method(Method::Post)
                .use_cache(false)
                .retries(0),
        )
    }

    // ── Monitoring ──────────────────────────────────────────────────

    pub fn start_progress_monitoring(&self, interval: Duration) {
        self.progress.start_monitoring(interval);
    }

    pub fn stop_progress_monitoring(&self) {
        self.progress.stop_monitoring();
    }

    pub fn start_status_monitoring(&self, interval: Duration) {
        self.status.start_monitoring(interval);
    }

    pub fn stop_status_monitoring(&self) {
        self.status.stop_monitoring();
    }

    /// Cancel every request and generation and stop both trackers.
    pub fn close(&self) {
        let cancelled = self.fetcher.cancel_all() + self.generator.cancel_all();
        self.progress.stop_monitoring();
        self.status.stop_monitoring();
        tracing::info!(cancelled, "api closed");
    }
}

impl Drop for StableDiffusionApi {
    fn drop(&mut self) {
        for task in &self.dispatchers {
            task.abort();
        }
    }
}

fn lock_state(state: &Mutex<ApiState>) -> MutexGuard<'_, ApiState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

async fn dispatch_fetch_events(
    mut rx: broadcast::Receiver<FetchEvent>,
    events: broadcast::Sender<ApiEvent>,
    state: Arc<Mutex<ApiState>>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "api lagged behind fetch events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let routed = match event {
            FetchEvent::DataFetched { request_id, data } => {
                match lock_state(&state).pending.remove(&request_id) {
                    Some(Pending::Resource(resource)) => Some(ApiEvent::ResourceFetched { resource, data }),
                    Some(Pending::RefreshModels) => Some(ApiEvent::ModelsRefreshed),
                    Some(Pending::RefreshLoras) => Some(ApiEvent::LorasRefreshed),
                    None => None,
                }
            }
            FetchEvent::FetchFailed {
                request_id,
                message,
                status,
                ..
            } => match lock_state(&state).pending.remove(&request_id) {
                Some(Pending::Resource(resource)) => Some(ApiEvent::ResourceFetchFailed {
                    resource,
                    message,
                    status,
                }),
                Some(Pending::RefreshModels) => Some(ApiEvent::Notice {
                    level: NoticeLevel::Error,
                    message: format!("Failed to refresh models: {message}"),
                }),
                Some(Pending::RefreshLoras) => Some(ApiEvent::Notice {
                    level: NoticeLevel::Error,
                    message: format!("Failed to refresh LoRAs: {message}"),
                }),
                None => None,
            },
            FetchEvent::ServerAvailable { available } => Some(ApiEvent::ServerStatusChanged { available }),
            FetchEvent::AuthenticationRequired => Some(ApiEvent::AuthenticationRequired),
            FetchEvent::Progress { .. } | FetchEvent::CacheUsed { .. } => None,
        };

        if let Some(event) = routed {
            let _ = events.send(event);
        }
    }
}

async fn dispatch_generation_events(
    mut rx: broadcast::Receiver<GenerationEvent>,
    events: broadcast::Sender<ApiEvent>,
    state: Arc<Mutex<ApiState>>,
    progress: Arc<PollingTracker>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "api lagged behind generation events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let routed = match event {
            GenerationEvent::Completed {
                generation_id,
                kind,
                data,
            } => Some((
                generation_id,
                ApiEvent::ImageGenerated {
                    generation_id,
                    kind,
                    data,
                },
            )),
            GenerationEvent::Failed {
                generation_id,
                message,
                status,
                ..
            } => Some((
                generation_id,
                ApiEvent::ImageGenerationFailed {
                    generation_id,
                    message,
                    status,
                },
            )),
            _ => None,
        };

        if let Some((generation_id, event)) = routed {
            {
                let mut state = lock_state(&state);
                if state.active_generation == Some(generation_id) {
                    state.active_generation = None;
                    progress.stop_monitoring();
                }
            }
            let _ = events.send(event);
        }
    }
}

async fn dispatch_progress_events(mut rx: broadcast::Receiver<TrackerEvent>, events: broadcast::Sender<ApiEvent>) {
    loop {
        match rx.recv().await {
            Ok(TrackerEvent::Data { data }) => {
                let _ = events.send(ApiEvent::ImageProgress { data });
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "api lagged behind progress events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
