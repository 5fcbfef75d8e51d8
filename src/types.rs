use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// REST paths exposed by a Stable Diffusion WebUI server.
pub mod endpoints {
    pub const VERSION: &str = "/sdapi/v1/version";
    pub const MODELS: &str = "/sdapi/v1/sd-models";
    pub const VAES: &str = "/sdapi/v1/sd-vae";
    pub const EMBEDDINGS: &str = "/sdapi/v1/embeddings";
    pub const LORAS: &str = "/sdapi/v1/lora";
    pub const STYLES: &str = "/sdapi/v1/prompt-styles";
    pub const REFRESH_CHECKPOINTS: &str = "/sdapi/v1/refresh-checkpoints";
    pub const REFRESH_LORAS: &str = "/sdapi/v1/refresh-loras";
    pub const PROGRESS: &str = "/sdapi/v1/progress";
    pub const OPTIONS: &str = "/sdapi/v1/options";
    pub const UPSCALERS: &str = "/sdapi/v1/upscalers";
    pub const SAMPLERS: &str = "/sdapi/v1/samplers";
    pub const STATUS: &str = "/sdapi/v1/status";
    pub const TXT2IMG: &str = "/sdapi/v1/txt2img";
    pub const IMG2IMG: &str = "/sdapi/v1/img2img";
    pub const INTERRUPT: &str = "/sdapi/v1/interrupt";
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Identifies one logical fetch. Stable across retries.
    RequestId
);
uuid_id!(
    /// Identifies one generation submission.
    GenerationId
);
uuid_id!(
    /// Identifies one download, including its retries.
    DownloadId
);

/// HTTP verbs the fetcher issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        })
    }
}

/// Per-call parameters for [`HttpFetcher::fetch`](crate::HttpFetcher::fetch).
///
/// `timeout` and `retries` fall back to the fetcher's configured defaults
/// when left unset.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub params: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    /// Prefer a cached response (default `true`).
    pub use_cache: Option<bool>,
    /// Register a fresh request even if one is in flight for the endpoint.
    pub supersede: bool,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// JSON request body.
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a query parameter. Values are percent-encoded when the URL is built.
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.use_cache = Some(enabled);
        self
    }

    /// Replace any in-flight request for the endpoint instead of coalescing
    /// into it. The replaced request's eventual response is dropped.
    pub fn supersede(mut self) -> Self {
        self.supersede = true;
        self
    }
}

/// In-memory record of one logical request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub id: RequestId,
    pub endpoint: String,
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub params: Vec<(String, String)>,
    pub timeout: Duration,
    pub use_cache: bool,
    pub retries_remaining: u32,
    /// Transport attempts issued so far.
    pub attempts: u32,
}

/// The two generation endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Txt2Img,
    Img2Img,
}

impl GenerationKind {
    pub fn endpoint(self) -> &'static str {
        match self {
            GenerationKind::Txt2Img => endpoints::TXT2IMG,
            GenerationKind::Img2Img => endpoints::IMG2IMG,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationKind::Txt2Img => "txt2img",
            GenerationKind::Img2Img => "img2img",
        }
    }
}

/// Server resources the facade knows how to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resource {
    Models,
    Vaes,
    Embeddings,
    Loras,
    Styles,
    Upscalers,
    Samplers,
}

impl Resource {
    pub const ALL: [Resource; 7] = [
        Resource::Models,
        Resource::Vaes,
        Resource::Embeddings,
        Resource::Loras,
        Resource::Styles,
        Resource::Upscalers,
        Resource::Samplers,
    ];

    pub fn endpoint(self) -> &'static str {
        match self {
            Resource::Models => endpoints::MODELS,
            Resource::Vaes => endpoints::VAES,
            Resource::Embeddings => endpoints::EMBEDDINGS,
            Resource::Loras => endpoints::LORAS,
            Resource::Styles => endpoints::STYLES,
            Resource::Upscalers => endpoints::UPSCALERS,
            Resource::Samplers => endpoints::SAMPLERS,
        }
    }
}
