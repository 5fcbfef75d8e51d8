use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::error::ErrorKind;
use crate::types::{DownloadId, GenerationId, GenerationKind, RequestId, Resource};

/// Emitted by [`HttpFetcher`](crate::HttpFetcher).
///
/// Every request ends in exactly one `DataFetched` or `FetchFailed`.
/// Retries are never surfaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FetchEvent {
    /// Parsed JSON body, or `{"raw": text}` for non-JSON responses.
    DataFetched { request_id: RequestId, data: Value },
    FetchFailed {
        request_id: RequestId,
        message: String,
        status: u16,
        kind: ErrorKind,
    },
    /// Body bytes received so far.
    Progress {
        request_id: RequestId,
        received: u64,
        total: Option<u64>,
    },
    ServerAvailable { available: bool },
    CacheUsed { hit: bool },
    AuthenticationRequired,
}

impl FetchEvent {
    /// The request this event belongs to, if any.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            FetchEvent::DataFetched { request_id, .. }
            | FetchEvent::FetchFailed { request_id, .. }
            | FetchEvent::Progress { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }
}

/// Emitted by [`GenerationClient`](crate::GenerationClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GenerationEvent {
    Started {
        generation_id: GenerationId,
        kind: GenerationKind,
    },
    Completed {
        generation_id: GenerationId,
        kind: GenerationKind,
        data: Value,
    },
    Txt2ImgCompleted {
        generation_id: GenerationId,
        data: Value,
    },
    Img2ImgCompleted {
        generation_id: GenerationId,
        data: Value,
    },
    Failed {
        generation_id: GenerationId,
        kind: GenerationKind,
        message: String,
        status: u16,
        error_kind: ErrorKind,
    },
}

impl GenerationEvent {
    pub fn generation_id(&self) -> GenerationId {
        match self {
            GenerationEvent::Started { generation_id, .. }
            | GenerationEvent::Completed { generation_id, .. }
            | GenerationEvent::Txt2ImgCompleted { generation_id, .. }
            | GenerationEvent::Img2ImgCompleted { generation_id, .. }
            | GenerationEvent::Failed { generation_id, .. } => *generation_id,
        }
    }
}

/// Emitted by [`PollingTracker`](crate::PollingTracker).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TrackerEvent {
    /// Full poll payload.
    Data { data: Value },
    /// Fraction read from the payload's `progress` field (progress tracker only).
    Progress { value: f64 },
    /// No confirmation within the stall window.
    Stalled,
}

/// Emitted by [`ImageDownloader`](crate::ImageDownloader).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DownloadEvent {
    Downloaded {
        download_id: DownloadId,
        path: PathBuf,
        width: u32,
        height: u32,
    },
    Failed {
        download_id: DownloadId,
        message: String,
        url: String,
    },
}

/// Severity of a facade notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Emitted by [`StableDiffusionApi`](crate::StableDiffusionApi).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ApiEvent {
    ResourceFetched {
        resource: Resource,
        data: Value,
    },
    ResourceFetchFailed {
        resource: Resource,
        message: String,
        status: u16,
    },
    ModelsRefreshed,
    LorasRefreshed,
    ServerStatusChanged {
        available: bool,
    },
    AuthenticationRequired,
    ImageProgress {
        data: Value,
    },
    ImageGenerated {
        generation_id: GenerationId,
        kind: GenerationKind,
        data: Value,
    },
    ImageGenerationFailed {
        generation_id: GenerationId,
        message: String,
        status: u16,
    },
    Notice {
        level: NoticeLevel,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetch_event_serialization() {
        let id = RequestId::new();
        let event = FetchEvent::FetchFailed {
            request_id: id,
            message: "Server error".into(),
            status: 502,
            kind: ErrorKind::Server,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "fetchFailed");
        assert_eq!(value["requestId"], json!(id.to_string()));
        assert_eq!(value["status"], 502);
        assert_eq!(value["kind"], "server");
    }

    #[test]
    fn test_fetch_event_request_id() {
        let id = RequestId::new();
        let event = FetchEvent::DataFetched {
            request_id: id,
            data: json!({}),
        };
        assert_eq!(event.request_id(), Some(id));
        assert_eq!(FetchEvent::AuthenticationRequired.request_id(), None);
    }

    #[test]
    fn test_generation_event_id() {
        let id = GenerationId::new();
        let event = GenerationEvent::Started {
            generation_id: id,
            kind: GenerationKind::Txt2Img,
        };
        assert_eq!(event.generation_id(), id);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "txt2img");
    }
}
