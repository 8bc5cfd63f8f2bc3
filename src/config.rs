//! Crawler configuration
//!
//! A single JSON file located by trying, in order:
//! `$HOME/.cache/crawler/conf.json`, `./crawler/conf.json`,
//! `/etc/crawler/conf.json`. The first existing file wins and its absence is
//! fatal at startup. The configuration is read once and passed by value into
//! the supervisor; nothing mutates it afterwards.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::url::Url;

/// Pacing applied to domains without an explicit `rate_limit_ms` entry.
const DEFAULT_RATE_LIMIT_MS: u64 = 500;

fn default_cache_age_limit() -> u64 {
    86_400
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("conf.json not found in any search location")]
    Missing,
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root of the content cache.
    pub cache_dir: PathBuf,
    /// Seed frontier directory.
    pub data_dir: PathBuf,
    /// Reserved; not used by the core.
    #[serde(default)]
    pub plugins_dir: Option<PathBuf>,
    /// Root of per-domain extraction recipes.
    pub script_dir: PathBuf,
    /// Root of persisted intermediates and per-host bundles.
    pub pem_dir: PathBuf,
    /// Line-delimited user-agent file; `#` and `;` begin comments.
    pub user_agent_list: PathBuf,
    /// Cache freshness in seconds.
    #[serde(default = "default_cache_age_limit")]
    pub cache_age_limit_s: u64,
    /// Per-domain pacing in milliseconds, keyed by registrable domain.
    #[serde(default)]
    pub rate_limit_ms: HashMap<String, u64>,
}

impl Config {
    /// Load from the first existing search location.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::candidates()
            .into_iter()
            .find(|p| p.exists())
            .ok_or(ConfigError::Missing)?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn candidates() -> Vec<PathBuf> {
        let mut dirs = Vec::with_capacity(3);
        if let Some(home) = std::env::var_os("HOME") {
            dirs.push(PathBuf::from(home).join(".cache").join("crawler"));
        }
        if let Ok(cwd) = std::env::current_dir() {
            dirs.push(cwd.join("crawler"));
        }
        dirs.push(PathBuf::from("/etc").join("crawler"));
        dirs.into_iter().map(|d| d.join("conf.json")).collect()
    }

    pub fn cache_age_limit(&self) -> Duration {
        Duration::from_secs(self.cache_age_limit_s)
    }

    /// Pacing interval for a domain; missing entries fall back to 500 ms.
    pub fn rate_limit_for(&self, domain: &Url) -> Duration {
        let ms = self
            .rate_limit_ms
            .get(domain.canonical())
            .copied()
            .unwrap_or(DEFAULT_RATE_LIMIT_MS);
        Duration::from_millis(ms)
    }
}
