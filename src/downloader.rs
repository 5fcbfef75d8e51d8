use image::GenericImageView;
use reqwest::header::CACHE_CONTROL;
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::config::DownloaderConfig;
use crate::error::{Result, SdError};
use crate::events::DownloadEvent;
use crate::timer::{RequestTimer, Transport};
use crate::types::DownloadId;

#[derive(Debug)]
struct Session {
    url: Url,
    save_path: PathBuf,
    retries_left: u32,
    attempt: u64,
    transport: Transport,
    timer: RequestTimer,
}

#[derive(Debug)]
struct Fetched {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

/// Downloads single images to disk.
///
/// Each download is checked to decode as an image before it is written, and
/// is saved next to any existing file instead of overwriting it
/// (`x.jpg` → `x_1.jpg` → `x_2.jpg`). Network errors, timeouts, HTTP errors
/// and undecodable bodies are retried with a cache-bypassing request under
/// the same [`DownloadId`].
#[derive(Debug, Clone)]
pub struct ImageDownloader {
    inner: Arc<DownloaderInner>,
}

#[derive(Debug)]
struct DownloaderInner {
    http: Client,
    config: DownloaderConfig,
    events: broadcast::Sender<DownloadEvent>,
    sessions: Mutex<HashMap<DownloadId, Session>>,
    next_attempt: AtomicU64,
}

impl Default for ImageDownloader {
    fn default() -> Self {
        Self::new(DownloaderConfig::default())
    }
}

impl ImageDownloader {
    pub fn new(config: DownloaderConfig) -> Self {
        Self::with_http_client(config, Client::new())
    }

    pub fn with_http_client(config: DownloaderConfig, http: Client) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(DownloaderInner {
                http,
                config,
                events,
                sessions: Mutex::new(HashMap::new()),
                next_attempt: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.events.subscribe()
    }

    /// Downloads that have not finished yet.
    pub fn active(&self) -> usize {
        self.inner.lock().len()
    }

    /// Start downloading `url` to `save_path` and return the download id.
    ///
    /// An invalid URL emits `Failed` right away. `force_fetch` sends
    /// `Cache-Control: no-cache`.
    pub fn download(&self, url: &str, save_path: impl Into<PathBuf>, force_fetch: bool) -> DownloadId {
        let id = DownloadId::new();
        let parsed = match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => parsed,
            _ => {
                tracing::error!(download_id = %id, url, "invalid download URL");
                let _ = self.inner.events.send(DownloadEvent::Failed {
                    download_id: id,
                    message: "Invalid URL".to_string(),
                    url: url.to_string(),
                });
                return id;
            }
        };

        tracing::info!(download_id = %id, url, "download started");
        let mut sessions = self.inner.lock();
        self.inner.start(
            &mut sessions,
            id,
            parsed,
            save_path.into(),
            self.inner.config.retries,
            force_fetch,
        );
        id
    }

    /// Abort a download. No event is emitted; unknown ids are ignored.
    pub fn cancel(&self, id: DownloadId) -> bool {
        let session = self.inner.lock().remove(&id);
        match session {
            Some(_) => {
                tracing::info!(download_id = %id, "download cancelled");
                true
            }
            None => false,
        }
    }
}

impl DownloaderInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<DownloadId, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start(
        self: &Arc<Self>,
        sessions: &mut HashMap<DownloadId, Session>,
        id: DownloadId,
        url: Url,
        save_path: PathBuf,
        retries_left: u32,
        force_fetch: bool,
    ) {
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed) + 1;

        let mut request = self.http.get(url.clone());
        if force_fetch {
            request = request.header(CACHE_CONTROL, "no-cache");
        }
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let outcome = fetch_image(request).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_finished(id, attempt, outcome);
            }
        });

        let weak = Arc::downgrade(self);
        let timer = RequestTimer::start(self.config.timeout, move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_timeout(id, attempt);
            }
        });

        sessions.insert(
            id,
            Session {
                url,
                save_path,
                retries_left,
                attempt,
                transport: Transport::new(task.abort_handle()),
                timer,
            },
        );
    }

    /// Remove the session if `attempt` is still its current one.
    fn take_session(&self, id: DownloadId, attempt: u64) -> Option<Session> {
        let mut sessions = self.lock();
        if sessions.get(&id).map(|s| s.attempt) != Some(attempt) {
            return None;
        }
        sessions.remove(&id)
    }

    fn on_finished(self: &Arc<Self>, id: DownloadId, attempt: u64, outcome: Result<Fetched>) {
        let Some(session) = self.take_session(id, attempt) else {
            return;
        };
        session.timer.stop();
        session.transport.disarm();

        let fetched = match outcome {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::error!(download_id = %id, url = %session.url, error = %err, "download failed");
                self.retry_or_fail(id, session.url, session.save_path, session.retries_left, err.to_string());
                return;
            }
        };

        match save_unique(&session.save_path, &fetched.bytes) {
            Ok(path) => {
                tracing::info!(download_id = %id, path = %path.display(), "image saved");
                let _ = self.events.send(DownloadEvent::Downloaded {
                    download_id: id,
                    path,
                    width: fetched.width,
                    height: fetched.height,
                });
            }
            Err(e) => {
                tracing::error!(download_id = %id, path = %session.save_path.display(), error = %e, "failed to save image");
                let _ = self.events.send(DownloadEvent::Failed {
                    download_id: id,
                    message: format!("Failed to save image: {e}"),
                    url: session.url.to_string(),
                });
            }
        }
    }

    fn on_timeout(self: &Arc<Self>, id: DownloadId, attempt: u64) {
        let Some(session) = self.take_session(id, attempt) else {
            return;
        };
        tracing::warn!(download_id = %id, url = %session.url, "download timed out");
        // Dropping the transport aborts the call.
        self.retry_or_fail(
            id,
            session.url,
            session.save_path,
            session.retries_left,
            "Download timed out".to_string(),
        );
    }

    fn retry_or_fail(
        self: &Arc<Self>,
        id: DownloadId,
        url: Url,
        save_path: PathBuf,
        retries_left: u32,
        message: String,
    ) {
        if retries_left > 0 {
            tracing::info!(download_id = %id, retries_left = retries_left - 1, "retrying download");
            let mut sessions = self.lock();
            self.start(&mut sessions, id, url, save_path, retries_left - 1, true);
        } else {
            tracing::error!(download_id = %id, url = %url, "max retries reached");
            let _ = self.events.send(DownloadEvent::Failed {
                download_id: id,
                message: format!("{message} (max retries reached)"),
                url: url.to_string(),
            });
        }
    }
}

const ERROR_BODY_LIMIT: usize = 200;

async fn fetch_image(request: reqwest::RequestBuilder) -> Result<Fetched> {
    let resp = request.send().await.map_err(|source| SdError::Network {
        context: "Download request failed".to_string(),
        source,
    })?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(SdError::Http {
            status: status.as_u16(),
            body: body.chars().take(ERROR_BODY_LIMIT).collect(),
        });
    }
    let bytes = resp.bytes().await.map_err(|source| SdError::Network {
        context: "Failed to read download body".to_string(),
        source,
    })?;
    decode_image(bytes.to_vec())
}

/// Keep `bytes` only if they decode as an image.
fn decode_image(bytes: Vec<u8>) -> Result<Fetched> {
    let (width, height) = image::load_from_memory(&bytes)?.dimensions();
    Ok(Fetched {
        bytes,
        width,
        height,
    })
}

fn numbered_path(path: &Path, n: u32) -> PathBuf {
    if n == 0 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}

/// Write `bytes` to the first free numbered variant of `path`.
///
/// Files are created with `create_new`, so two concurrent downloads to the
/// same path never overwrite each other.
fn save_unique(path: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut n = 0;
    loop {
        let candidate = numbered_path(path, n);
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut file) => {
                if let Err(e) = file.write_all(bytes) {
                    drop(file);
                    let _ = fs::remove_file(&candidate);
                    return Err(e);
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}
