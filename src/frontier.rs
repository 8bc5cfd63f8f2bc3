//! Seed frontier: per-domain URL sets on disk
//!
//! The frontier directory holds one-URL-per-line list files. At startup the
//! whole directory is loaded and grouped by registrable domain; during a run
//! each worker appends newly discovered same-domain URLs to its own
//! `<sha256(domain)>.list` file. Appends are sorted, deduplicated against
//! themselves, newline-terminated, and written in a single call; lines are
//! never removed.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::url::Url;

#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("frontier directory does not exist: {0}")]
    MissingDir(PathBuf),
    #[error("frontier directory is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to read frontier directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },
}

/// One domain's slice of the frontier, immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct DomainBatch {
    pub domain: Url,
    pub seeds: BTreeSet<Url>,
    pub rate_limit: Duration,
}

/// On-disk frontier store. The in-memory map produced by [`load`] is
/// read-only after startup; `append` only ever grows per-domain files.
///
/// [`load`]: FrontierStore::load
pub struct FrontierStore {
    dir: PathBuf,
}

impl FrontierStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, FrontierError> {
        let dir = dir.into();
        if !dir.exists() {
            return Err(FrontierError::MissingDir(dir));
        }
        if !dir.is_dir() {
            return Err(FrontierError::NotADirectory(dir));
        }
        Ok(Self { dir })
    }

    /// Read every regular file under the frontier directory, one URL per
    /// non-blank line, dropping invalid URLs, grouped by registrable domain.
    pub fn load(&self) -> Result<BTreeMap<Url, BTreeSet<Url>>, FrontierError> {
        let mut batches: BTreeMap<Url, BTreeSet<Url>> = BTreeMap::new();

        let entries = fs::read_dir(&self.dir).map_err(|source| FrontierError::Io {
            path: self.dir.clone(),
            source,
        })?;

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("frontier: unreadable directory entry: {e}");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!("frontier: failed to load {}: {e}", path.display());
                    continue;
                }
            };
            debug!("frontier: loading {}", path.display());
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let url = Url::parse(line);
                if !url.is_valid() {
                    continue;
                }
                batches.entry(url.domain()).or_default().insert(url);
            }
        }

        Ok(batches)
    }

    /// Append URLs to a domain's frontier file. The batch is canonicalized,
    /// stripped of embedded CR/LF, sorted, and deduplicated before a single
    /// append write. When the existing file does not end with a newline, a
    /// leading newline keeps the first new line from joining the last old
    /// one.
    pub fn append(&self, domain: &Url, urls: &BTreeSet<Url>) -> io::Result<()> {
        if urls.is_empty() {
            return Ok(());
        }

        let mut lines: Vec<String> = urls
            .iter()
            .map(|u| {
                u.canonical()
                    .chars()
                    .filter(|c| *c != '\r' && *c != '\n')
                    .collect::<String>()
            })
            .filter(|s| !s.is_empty())
            .collect();
        if lines.is_empty() {
            return Ok(());
        }
        lines.sort();
        lines.dedup();

        let path = self.dir.join(format!("{}.list", domain.sha256_hex()));

        let mut blob = String::with_capacity(lines.len() * 64);
        if file_lacks_trailing_newline(&path)? {
            blob.push('\n');
        }
        for line in &lines {
            blob.push_str(line);
            blob.push('\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(blob.as_bytes())?;
        file.flush()
    }
}

fn file_lacks_trailing_newline(path: &Path) -> io::Result<bool> {
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_file(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn urls(list: &[&str]) -> BTreeSet<Url> {
        list.iter().map(|s| Url::parse(s)).collect()
    }

    #[test]
    fn missing_directory_fails() {
        assert!(matches!(
            FrontierStore::new("/nonexistent/frontier"),
            Err(FrontierError::MissingDir(_))
        ));
    }

    #[test]
    fn load_groups_by_registrable_domain_and_drops_invalid() {
        let dir = tempfile::tempdir().unwrap();
        seed_file(
            dir.path(),
            "seed.list",
            "https://a.example.com/1\n\nnot a url with spaces\nhttps://example.com/2\nhttps://other.net/3\n",
        );

        let store = FrontierStore::new(dir.path()).unwrap();
        let batches = store.load().unwrap();

        assert_eq!(batches.len(), 2);
        let example = batches.get(&Url::parse("example.com")).unwrap();
        assert_eq!(example.len(), 2);
        let other = batches.get(&Url::parse("other.net")).unwrap();
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn append_then_reload_yields_sorted_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrontierStore::new(dir.path()).unwrap();
        let domain = Url::parse("example.com");

        store
            .append(
                &domain,
                &urls(&[
                    "https://example.com/b",
                    "https://example.com/a",
                    "https://example.com/b",
                ]),
            )
            .unwrap();

        let path = dir.path().join(format!("{}.list", domain.sha256_hex()));
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "https://example.com/a\nhttps://example.com/b\n");

        let reloaded = store.load().unwrap();
        let set = reloaded.get(&domain).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn append_to_file_without_trailing_newline_inserts_guard() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrontierStore::new(dir.path()).unwrap();
        let domain = Url::parse("example.com");
        let path = dir.path().join(format!("{}.list", domain.sha256_hex()));

        fs::write(&path, "https://example.com/old").unwrap(); // no trailing \n
        store
            .append(&domain, &urls(&["https://example.com/new"]))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "https://example.com/old\nhttps://example.com/new\n");
    }

    #[test]
    fn append_never_removes_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrontierStore::new(dir.path()).unwrap();
        let domain = Url::parse("example.com");
        let path = dir.path().join(format!("{}.list", domain.sha256_hex()));

        store
            .append(&domain, &urls(&["https://example.com/1"]))
            .unwrap();
        store
            .append(&domain, &urls(&["https://example.com/2"]))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "https://example.com/1\nhttps://example.com/2\n");
    }

    #[test]
    fn append_empty_set_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrontierStore::new(dir.path()).unwrap();
        let domain = Url::parse("example.com");
        store.append(&domain, &BTreeSet::new()).unwrap();
        assert!(!dir
            .path()
            .join(format!("{}.list", domain.sha256_hex()))
            .exists());
    }
}
