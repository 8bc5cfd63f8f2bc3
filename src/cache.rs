//! Content-addressed, TTL-bounded on-disk cache
//!
//! Every entry is keyed by the SHA-256 of the canonical URL: the raw body
//! lives in `<sha256>`, the response headers in `<sha256>.headers`, and the
//! extraction result in `<sha256>.json`. Writes go through a `.tmp` file and
//! a rename so concurrent readers never observe a partial entry. Read-side
//! races (a file expiring and vanishing between the existence check and the
//! open) are treated as a cache miss.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

use crate::url::Url;

/// Shared read-mostly handle; workers never write the same key because URL
/// keys partition by registrable domain.
pub struct ContentCache {
    dir: PathBuf,
    max_age: Duration,
}

impl ContentCache {
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("cache dir {} not creatable: {e}", dir.display());
        }
        Self { dir, max_age }
    }

    fn body_path(&self, url: &Url) -> PathBuf {
        self.dir.join(url.sha256_hex())
    }

    /// Freshness: the entry's mtime is readable, not in the future, and
    /// within `max_age`.
    fn is_fresh(&self, path: &Path) -> bool {
        let Ok(meta) = fs::metadata(path) else {
            return false;
        };
        let Ok(mtime) = meta.modified() else {
            return false;
        };
        match SystemTime::now().duration_since(mtime) {
            Ok(age) => age <= self.max_age,
            // mtime in the future: treat as expired
            Err(_) => false,
        }
    }

    pub fn is_cached(&self, url: &Url) -> bool {
        self.is_fresh(&self.body_path(url))
    }

    /// The cached body, if present and fresh.
    pub fn fetch(&self, url: &Url) -> Option<Vec<u8>> {
        let path = self.body_path(url);
        if !self.is_fresh(&path) {
            return None;
        }
        // The file may vanish between the check and the read.
        fs::read(&path).ok()
    }

    pub fn store_body(&self, url: &Url, body: &[u8]) {
        self.write_atomic(&self.body_path(url), body);
    }

    /// Header sidecar: a JSON object mapping header name to value. Repeated
    /// header names collapse to the last value.
    pub fn store_headers(&self, url: &Url, headers: &[(String, String)]) {
        let mut map = serde_json::Map::new();
        for (name, value) in headers {
            map.insert(name.clone(), Value::String(value.clone()));
        }
        let path = self.body_path(url).with_extension("headers");
        self.write_json(&path, &Value::Object(map));
    }

    /// Extraction record, pretty-printed with a trailing newline.
    pub fn store_extraction(&self, url: &Url, record: &Value) {
        let path = self.body_path(url).with_extension("json");
        self.write_json(&path, record);
    }

    fn write_json(&self, path: &Path, value: &Value) {
        match serde_json::to_string_pretty(value) {
            Ok(mut text) => {
                text.push('\n');
                self.write_atomic(path, text.as_bytes());
            }
            Err(e) => warn!("cache: serializing {} failed: {e}", path.display()),
        }
    }

    /// tmp + rename; failures are logged and dropped (a lost entry only
    /// costs a refetch).
    fn write_atomic(&self, path: &Path, bytes: &[u8]) {
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        if let Err(e) = fs::write(&tmp, bytes).and_then(|()| fs::rename(&tmp, path)) {
            warn!("cache write {} failed: {e}", path.display());
            let _ = fs::remove_file(&tmp);
        }
    }
}
