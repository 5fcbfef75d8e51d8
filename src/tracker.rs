use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::TrackerConfig;
use crate::error::ErrorKind;
use crate::events::{FetchEvent, TrackerEvent};
use crate::fetcher::HttpFetcher;
use crate::types::{endpoints, FetchOptions, RequestId};

/// Which endpoint a tracker polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    /// `/sdapi/v1/progress`; also emits `TrackerEvent::Progress`.
    Progress,
    /// `/sdapi/v1/status`.
    Status,
}

impl TrackerKind {
    pub fn endpoint(self) -> &'static str {
        match self {
            TrackerKind::Progress => endpoints::PROGRESS,
            TrackerKind::Status => endpoints::STATUS,
        }
    }
}

/// Polls a fixed endpoint on an interval while monitoring is on.
///
/// The first poll is issued immediately. A failed poll (other than an
/// authentication failure) triggers an immediate re-poll. A separate stall
/// timer fires every `stall_timeout` regardless of poll outcomes, emitting
/// `Stalled` and forcing a re-poll.
#[derive(Debug)]
pub struct PollingTracker {
    fetcher: HttpFetcher,
    kind: TrackerKind,
    config: TrackerConfig,
    events: broadcast::Sender<TrackerEvent>,
    last_progress: Arc<Mutex<f64>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingTracker {
    pub fn new(fetcher: HttpFetcher, kind: TrackerKind, config: TrackerConfig) -> Self {
        let (events, _) = broadcast::channel(fetcher.config().event_capacity.max(1));
        Self {
            fetcher,
            kind,
            config,
            events,
            last_progress: Arc::new(Mutex::new(0.0)),
            task: Mutex::new(None),
        }
    }

    /// Tracker for `/sdapi/v1/progress`.
    pub fn progress(fetcher: HttpFetcher, config: TrackerConfig) -> Self {
        Self::new(fetcher, TrackerKind::Progress, config)
    }

    /// Tracker for `/sdapi/v1/status`, polling every 1.5 s by default.
    pub fn status(fetcher: HttpFetcher, config: TrackerConfig) -> Self {
        let config = if config == TrackerConfig::default() {
            config.with_interval(Duration::from_millis(1500))
        } else {
            config
        };
        Self::new(fetcher, TrackerKind::Status, config)
    }

    pub fn kind(&self) -> TrackerKind {
        self.kind
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Last fraction read from a progress payload (0.0 before the first one).
    pub fn last_progress(&self) -> f64 {
        *self.last_progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start polling at the configured interval.
    pub fn start(&self) {
        self.start_monitoring(self.config.interval);
    }

    /// Start polling every `interval`. No-op while already monitoring.
    pub fn start_monitoring(&self, interval: Duration) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        tracing::debug!(endpoint = self.kind.endpoint(), interval_ms = interval.as_millis() as u64, "monitoring started");

        let poller = Poller {
            fetcher: self.fetcher.clone(),
            kind: self.kind,
            config: self.config.clone(),
            events: self.events.clone(),
            last_progress: Arc::clone(&self.last_progress),
        };
        // Subscribe before the first poll is issued so its result is not missed.
        let fetch_events = self.fetcher.subscribe();
        *task = Some(tokio::spawn(poller.run(interval.max(Duration::from_millis(1)), fetch_events)));
    }

    /// Stop polling. Idempotent.
    pub fn stop_monitoring(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
            tracing::debug!(endpoint = self.kind.endpoint(), "monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl Drop for PollingTracker {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

struct Poller {
    fetcher: HttpFetcher,
    kind: TrackerKind,
    config: TrackerConfig,
    events: broadcast::Sender<TrackerEvent>,
    last_progress: Arc<Mutex<f64>>,
}

impl Poller {
    async fn run(self, interval: Duration, mut fetch_events: broadcast::Receiver<FetchEvent>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stall_period = self.config.stall_timeout.max(Duration::from_millis(1));
        let mut stall = tokio::time::interval_at(Instant::now() + stall_period, stall_period);
        let mut current: Option<RequestId> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    current = Some(self.poll());
                }
                _ = stall.tick() => {
                    tracing::warn!(endpoint = self.kind.endpoint(), "polling stalled, forcing re-poll");
                    let _ = self.events.send(TrackerEvent::Stalled);
                    current = Some(self.poll());
                }
                event = fetch_events.recv() => match event {
                    Ok(FetchEvent::DataFetched { request_id, data }) if Some(request_id) == current => {
                        current = None;
                        self.on_data(data);
                    }
                    Ok(FetchEvent::FetchFailed { request_id, status, kind, .. }) if Some(request_id) == current => {
                        current = None;
                        if status != 401 && status != 403 && kind != ErrorKind::Cancelled {
                            current = Some(self.poll());
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(endpoint = self.kind.endpoint(), skipped, "tracker lagged behind fetch events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    fn poll(&self) -> RequestId {
        self.fetcher.fetch(
            self.kind.endpoint(),
            FetchOptions::new()
                .use_cache(false)
                .timeout(self.config.poll_timeout)
                .retries(self.config.poll_retries),
        )
    }

    fn on_data(&self, data: Value) {
        if self.kind == TrackerKind::Progress {
            let value = progress_fraction(&data);
            *self.last_progress.lock().unwrap_or_else(|e| e.into_inner()) = value;
            let _ = self.events.send(TrackerEvent::Progress { value });
        }
        let _ = self.events.send(TrackerEvent::Data { data });
    }
}

/// The `progress` field of a progress payload, 0.0 when absent.
pub fn progress_fraction(data: &Value) -> f64 {
    data.get("progress").and_then(Value::as_f64).unwrap_or(0.0)
}
