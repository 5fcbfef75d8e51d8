use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::config::{normalize, FetcherConfig};
use crate::error::{classify_status, classify_transport, ErrorKind, Failure, Result, SdError};
use crate::events::GenerationEvent;
use crate::fetcher::build_url;
use crate::timer::Transport;
use crate::types::{GenerationId, GenerationKind};

#[derive(Debug)]
struct Job {
    kind: GenerationKind,
    transport: Transport,
}

/// One-shot client for the txt2img / img2img endpoints.
///
/// Unlike [`HttpFetcher`](crate::HttpFetcher), a generation is never retried
/// and never coalesced: re-submitting a job costs server compute, so a
/// failure is always reported to the caller as a terminal `Failed` event.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    inner: Arc<GeneratorInner>,
}

#[derive(Debug)]
struct GeneratorInner {
    http: Client,
    config: FetcherConfig,
    events: broadcast::Sender<GenerationEvent>,
    jobs: Mutex<HashMap<GenerationId, Job>>,
}

impl GenerationClient {
    pub fn new(config: FetcherConfig) -> Self {
        Self::with_http_client(config, Client::new())
    }

    pub fn with_http_client(mut config: FetcherConfig, http: Client) -> Self {
        config.base_url = normalize(config.base_url);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(GeneratorInner {
                http,
                config,
                events,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.inner.events.subscribe()
    }

    /// Number of generations that have not finished yet.
    pub fn in_progress(&self) -> usize {
        self.inner.lock().len()
    }

    /// Start a generation and return its id without waiting.
    ///
    /// Emits `Started` on success. If the payload cannot be serialized or
    /// the request cannot be built, emits `Failed` and returns the error.
    pub fn submit<P: Serialize + ?Sized>(&self, kind: GenerationKind, payload: &P) -> Result<GenerationId> {
        let id = GenerationId::new();
        let inner = &self.inner;

        let prepared = serde_json::to_vec(payload)
            .map_err(SdError::from)
            .and_then(|body| Ok((build_url(&inner.config.base_url, kind.endpoint(), &[])?, body)));
        let (url, body) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                let failure = Failure::new(ErrorKind::Protocol, format!("Request failed: {e}"), 0);
                inner.emit_failure(id, kind, failure);
                return Err(e);
            }
        };

        let mut request = inner
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .timeout(inner.config.generation_timeout)
            .body(body);
        if let Some(token) = &inner.config.auth_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        // Held until `Started` is sent so the task's terminal event always follows it.
        let mut jobs = inner.lock();
        let weak = Arc::downgrade(inner);
        let task = tokio::spawn(async move {
            let outcome = perform(request).await;
            if let Some(inner) = weak.upgrade() {
                inner.finish(id, outcome);
            }
        });
        jobs.insert(
            id,
            Job {
                kind,
                transport: Transport::new(task.abort_handle()),
            },
        );
        tracing::info!(generation_id = %id, kind = kind.as_str(), "generation started");
        inner.emit(GenerationEvent::Started {
            generation_id: id,
            kind,
        });
        drop(jobs);
        Ok(id)
    }

    pub fn txt2img<P: Serialize + ?Sized>(&self, payload: &P) -> Result<GenerationId> {
        self.submit(GenerationKind::Txt2Img, payload)
    }

    pub fn img2img<P: Serialize + ?Sized>(&self, payload: &P) -> Result<GenerationId> {
        self.submit(GenerationKind::Img2Img, payload)
    }

    /// Abort a local generation request. Emits `Failed` with kind `Cancelled`.
    ///
    /// The server may keep working on the job; use the facade's
    /// `interrupt_generation` to stop it there.
    pub fn cancel(&self, id: GenerationId) -> bool {
        let job = self.inner.lock().remove(&id);
        match job {
            Some(job) => {
                drop(job.transport);
                self.inner.emit_failure(id, job.kind, Failure::cancelled());
                true
            }
            None => false,
        }
    }

    /// Cancel every running generation.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<GenerationId> = self.inner.lock().keys().copied().collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Submit and wait for this generation's terminal event.
    pub async fn generate_and_wait<P: Serialize + ?Sized>(
        &self,
        kind: GenerationKind,
        payload: &P,
    ) -> Result<Value> {
        let mut events = self.subscribe();
        let id = self.submit(kind, payload)?;
        Self::wait_for(&mut events, id).await
    }

    /// Wait on `events` until generation `id` completes or fails.
    ///
    /// `events` must have been subscribed before `id` was submitted.
    pub async fn wait_for(
        events: &mut broadcast::Receiver<GenerationEvent>,
        id: GenerationId,
    ) -> Result<Value> {
        loop {
            match events.recv().await {
                Ok(GenerationEvent::Completed { generation_id, data, .. }) if generation_id == id => {
                    return Ok(data);
                }
                Ok(GenerationEvent::Failed {
                    generation_id,
                    message,
                    status,
                    error_kind,
                    ..
                }) if generation_id == id => {
                    return Err(match error_kind {
                        ErrorKind::Cancelled => SdError::Cancelled,
                        ErrorKind::Timeout => SdError::Timeout,
                        _ => SdError::GenerationFailed { message, status },
                    });
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(generation_id = %id, skipped, "generation waiter lagged");
                }
                Err(RecvError::Closed) => return Err(SdError::ChannelClosed),
            }
        }
    }
}

impl GeneratorInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<GenerationId, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: GenerationEvent) {
        let _ = self.events.send(event);
    }

    fn emit_failure(&self, id: GenerationId, kind: GenerationKind, failure: Failure) {
        tracing::error!(
            generation_id = %id,
            kind = kind.as_str(),
            status = failure.status,
            "generation failed: {}",
            failure.message
        );
        self.emit(GenerationEvent::Failed {
            generation_id: id,
            kind,
            message: failure.message,
            status: failure.status,
            error_kind: failure.kind,
        });
    }

    fn finish(&self, id: GenerationId, outcome: std::result::Result<Value, Failure>) {
        let Some(job) = self.lock().remove(&id) else {
            return;
        };
        job.transport.disarm();

        match outcome {
            Ok(data) => {
                tracing::info!(generation_id = %id, kind = job.kind.as_str(), "generation completed");
                self.emit(GenerationEvent::Completed {
                    generation_id: id,
                    kind: job.kind,
                    data: data.clone(),
                });
                self.emit(match job.kind {
                    GenerationKind::Txt2Img => GenerationEvent::Txt2ImgCompleted {
                        generation_id: id,
                        data,
                    },
                    GenerationKind::Img2Img => GenerationEvent::Img2ImgCompleted {
                        generation_id: id,
                        data,
                    },
                });
            }
            Err(failure) => self.emit_failure(id, job.kind, failure),
        }
    }
}

async fn perform(request: reqwest::RequestBuilder) -> std::result::Result<Value, Failure> {
    let resp = request.send().await.map_err(|e| classify_transport(&e))?;
    let status = resp.status().as_u16();
    let body = resp.bytes().await.map_err(|e| classify_transport(&e))?;

    if let Some(mut failure) = classify_status(status) {
        let detail = String::from_utf8_lossy(&body);
        let detail = detail.trim();
        if !detail.is_empty() {
            let detail: String = detail.chars().take(500).collect();
            failure.message = format!("{} | Details: {detail}", failure.message);
        }
        return Err(failure);
    }

    serde_json::from_slice(&body)
        .map_err(|_| Failure::new(ErrorKind::Protocol, "Invalid JSON response", 500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unbuildable_request_fails_synchronously() {
        let config = FetcherConfig::builder()
            .with_base_url("not a url")
            .without_cache()
            .build();
        let client = GenerationClient::new(config);
        let mut events = client.subscribe();

        let result = client.txt2img(&json!({"prompt": "x"}));
        assert!(matches!(result, Err(SdError::InvalidUrl(_))));
        match events.try_recv().unwrap() {
            GenerationEvent::Failed { status, error_kind, .. } => {
                assert_eq!(status, 0);
                assert_eq!(error_kind, ErrorKind::Protocol);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(client.in_progress(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_generation() {
        let client = GenerationClient::new(FetcherConfig::builder().without_cache().build());
        assert!(!client.cancel(GenerationId::new()));
        assert_eq!(client.cancel_all(), 0);
    }
}
