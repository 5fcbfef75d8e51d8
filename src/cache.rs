use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

const META_EXTENSION: &str = "meta.json";
const BODY_EXTENSION: &str = "body";

/// Metadata stored next to each cached body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheMeta {
    pub url: String,
    pub content_type: Option<String>,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub size: u64,
}

impl CacheMeta {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// A response served from the disk cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Disk-backed response cache keyed by normalized URL.
///
/// Each entry is a `<hash>.body` file plus a `<hash>.meta.json` sidecar
/// carrying its expiration time. The directory may be shared by several
/// fetchers; writes go through a temporary file and a rename.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    max_bytes: u64,
}

impl DiskCache {
    /// Open (or create) a cache directory.
    pub fn open(dir: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_bytes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Metadata of the entry for `url`, expired or not.
    pub fn metadata(&self, url: &str) -> Option<CacheMeta> {
        let raw = fs::read(self.meta_path(url)).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// True when an entry exists for `url` and its expiration has passed.
    pub fn is_expired(&self, url: &str) -> bool {
        self.metadata(url).map(|m| m.is_expired()).unwrap_or(false)
    }

    /// Load a fresh entry. Expired or missing entries yield `None`.
    pub fn load(&self, url: &str) -> Option<CachedResponse> {
        let meta = self.metadata(url)?;
        if meta.is_expired() {
            return None;
        }
        let body = fs::read(self.body_path(url)).ok()?;
        Some(CachedResponse {
            content_type: meta.content_type,
            body,
        })
    }

    /// Store a response body for `ttl`, then evict the oldest entries while
    /// the cache exceeds its size cap.
    pub fn store(
        &self,
        url: &str,
        content_type: Option<&str>,
        body: &[u8],
        ttl: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        let meta = CacheMeta {
            url: normalize_url(url),
            content_type: content_type.map(str::to_string),
            stored_at: now,
            expires_at: now + ttl,
            size: body.len() as u64,
        };

        write_atomic(&self.body_path(url), body)?;
        write_atomic(&self.meta_path(url), &serde_json::to_vec(&meta)?)?;
        self.enforce_limit()?;
        Ok(())
    }

    /// Overwrite the expiration of an existing entry.
    pub fn set_expiration(&self, url: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        let Some(mut meta) = self.metadata(url) else {
            return Ok(false);
        };
        meta.expires_at = expires_at;
        write_atomic(&self.meta_path(url), &serde_json::to_vec(&meta)?)?;
        Ok(true)
    }

    pub fn remove(&self, url: &str) -> Result<()> {
        remove_if_exists(&self.body_path(url))?;
        remove_if_exists(&self.meta_path(url))?;
        Ok(())
    }

    /// Remove every entry. Files the cache did not write are left alone.
    pub fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if is_cache_file(&name.to_string_lossy()) && entry.path().is_file() {
                remove_if_exists(&entry.path())?;
            }
        }
        Ok(())
    }

    /// Total size of cached bodies in bytes.
    pub fn size(&self) -> u64 {
        self.entries().iter().map(|(_, meta)| meta.size).sum()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> Vec<(String, CacheMeta)> {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        read_dir
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let key = name.strip_suffix(&format!(".{META_EXTENSION}"))?.to_string();
                let raw = fs::read(entry.path()).ok()?;
                let meta: CacheMeta = serde_json::from_slice(&raw).ok()?;
                Some((key, meta))
            })
            .collect()
    }

    fn enforce_limit(&self) -> Result<()> {
        let mut entries = self.entries();
        let mut total: u64 = entries.iter().map(|(_, meta)| meta.size).sum();
        if total <= self.max_bytes {
            return Ok(());
        }

        entries.sort_by_key(|(_, meta)| meta.stored_at);
        for (key, meta) in entries {
            if total <= self.max_bytes {
                break;
            }
            remove_if_exists(&self.dir.join(format!("{key}.{BODY_EXTENSION}")))?;
            remove_if_exists(&self.dir.join(format!("{key}.{META_EXTENSION}")))?;
            total = total.saturating_sub(meta.size);
            tracing::debug!(url = %meta.url, "evicted cache entry");
        }
        Ok(())
    }

    fn body_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.{BODY_EXTENSION}", cache_key(url)))
    }

    fn meta_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.{META_EXTENSION}", cache_key(url)))
    }
}

/// Canonical form of a URL used as the cache key.
pub fn normalize_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().to_string(),
    }
}

const KEY_LEN: usize = 32;

fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_url(url).as_bytes());
    hex::encode(&hasher.finalize()[..KEY_LEN / 2])
}

/// Body, sidecar, or leftover temp file written by this cache.
fn is_cache_file(name: &str) -> bool {
    let Some((key, rest)) = name.split_once('.') else {
        return false;
    };
    if key.len() != KEY_LEN || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
        return false;
    }
    rest == BODY_EXTENSION
        || rest == META_EXTENSION
        || rest.starts_with("tmp-")
        || rest.starts_with("meta.tmp-")
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Lifetime requested by a `Cache-Control` header.
///
/// `Some(None)` means "do not store"; `None` means the header does not say.
pub(crate) fn ttl_from_cache_control(header: Option<&str>) -> Option<Option<Duration>> {
    let header = header?.to_ascii_lowercase();
    let mut max_age = None;
    for directive in header.split(',').map(str::trim) {
        if directive == "no-store" {
            return Some(None);
        }
        if let Some(value) = directive.strip_prefix("max-age=") {
            if let Ok(secs) = value.trim_matches('"').parse::<u64>() {
                max_age = Some(Duration::from_secs(secs));
            }
        }
    }
    max_age.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const URL: &str = "http://127.0.0.1:7860/sdapi/v1/sd-models";

    #[test]
    fn test_store_and_load() {
        let temp = tempdir().unwrap();
        let cache = DiskCache::open(temp.path(), 1024 * 1024).unwrap();
        cache
            .store(URL, Some("application/json"), b"[1,2,3]", Duration::from_secs(60))
            .unwrap();

        let hit = cache.load(URL).unwrap();
        assert_eq!(hit.body, b"[1,2,3]");
        assert_eq!(hit.content_type.as_deref(), Some("application/json"));
        assert!(!cache.is_expired(URL));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 7);
    }

    #[test]
    fn test_expired_entry_is_not_served() {
        let temp = tempdir().unwrap();
        let cache = DiskCache::open(temp.path(), 1024 * 1024).unwrap();
        cache.store(URL, None, b"old", Duration::from_secs(60)).unwrap();
        cache
            .set_expiration(URL, Utc::now() - chrono::Duration::seconds(1))
            .unwrap();

        assert!(cache.is_expired(URL));
        assert!(cache.load(URL).is_none());
        assert!(cache.metadata(URL).is_some());
    }

    #[test]
    fn test_missing_entry_is_not_expired() {
        let temp = tempdir().unwrap();
        let cache = DiskCache::open(temp.path(), 1024).unwrap();
        assert!(!cache.is_expired(URL));
        assert!(cache.load(URL).is_none());
    }

    #[test]
    fn test_clear_removes_everything() {
        let temp = tempdir().unwrap();
        let cache = DiskCache::open(temp.path(), 1024 * 1024).unwrap();
        cache.store(URL, None, b"a", Duration::from_secs(60)).unwrap();
        cache
            .store("http://127.0.0.1:7860/sdapi/v1/lora", None, b"b", Duration::from_secs(60))
            .unwrap();
        assert_eq!(cache.len(), 2);

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert!(cache.load(URL).is_none());
    }

    #[test]
    fn test_oldest_entries_evicted_over_limit() {
        let temp = tempdir().unwrap();
        let cache = DiskCache::open(temp.path(), 10).unwrap();
        cache.store("http://h/a", None, b"123456", Duration::from_secs(60)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.store("http://h/b", None, b"123456", Duration::from_secs(60)).unwrap();

        assert!(cache.load("http://h/a").is_none());
        assert!(cache.load("http://h/b").is_some());
        assert!(cache.size() <= 10);
    }

    #[test]
    fn test_normalized_urls_share_an_entry() {
        let temp = tempdir().unwrap();
        let cache = DiskCache::open(temp.path(), 1024).unwrap();
        cache
            .store("HTTP://Example.com/path#frag", None, b"x", Duration::from_secs(60))
            .unwrap();
        assert!(cache.load("http://example.com/path").is_some());
    }

    #[test]
    fn test_cache_control_parsing() {
        assert_eq!(ttl_from_cache_control(None), None);
        assert_eq!(ttl_from_cache_control(Some("public")), None);
        assert_eq!(
            ttl_from_cache_control(Some("public, max-age=120")),
            Some(Some(Duration::from_secs(120)))
        );
        assert_eq!(ttl_from_cache_control(Some("no-store")), Some(None));
    }

    #[test]
    fn test_clear_keeps_foreign_files() {
        let temp = tempdir().unwrap();
        let notes = temp.path().join("user_notes.txt");
        let lookalike = temp.path().join("model.body");
        fs::write(&notes, b"keep me").unwrap();
        fs::write(&lookalike, b"not ours").unwrap();

        let cache = DiskCache::open(temp.path(), 1024 * 1024).unwrap();
        cache.store(URL, None, b"a", Duration::from_secs(60)).unwrap();
        cache.clear().unwrap();

        assert!(cache.is_empty());
        assert_eq!(fs::read(&notes).unwrap(), b"keep me");
        assert!(lookalike.exists());
    }

    #[test]
    fn test_cache_file_names() {
        let key = cache_key(URL);
        assert_eq!(key.len(), 32);
        assert!(is_cache_file(&format!("{key}.body")));
        assert!(is_cache_file(&format!("{key}.meta.json")));
        assert!(is_cache_file(&format!("{key}.tmp-0f3a")));
        assert!(is_cache_file(&format!("{key}.meta.tmp-0f3a")));
        assert!(!is_cache_file("user_notes.txt"));
        assert!(!is_cache_file(&format!("{key}.png")));
    }
}
