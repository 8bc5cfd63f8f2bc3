//! Per-domain crawl loop
//!
//! A worker owns everything it touches except the cache and the frontier
//! store, which are shared handles safe by key partitioning. For each seed
//! it runs at most three attempts of: cache lookup → (pace + fetch + store)
//! → extract → store record → frontier update → optional client-redirect
//! hop. Client redirects share the attempt budget, so a redirect loop
//! cannot pin the worker.

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::ContentCache;
use crate::extract::{ClientRedirect, Extractor};
use crate::frontier::{DomainBatch, FrontierStore};
use crate::url::Url;

use super::fetcher::Fetcher;
use super::pacer::RateGate;

const MAX_ATTEMPTS: u32 = 3;

pub struct DomainWorker {
    domain: Url,
    seeds: BTreeSet<Url>,
    pacer: RateGate,
    cache: Arc<ContentCache>,
    extractor: Box<dyn Extractor>,
    frontier: Arc<FrontierStore>,
    fetcher: Fetcher,
}

impl DomainWorker {
    pub fn new(
        batch: DomainBatch,
        cache: Arc<ContentCache>,
        extractor: Box<dyn Extractor>,
        frontier: Arc<FrontierStore>,
        fetcher: Fetcher,
    ) -> Self {
        Self {
            domain: batch.domain,
            seeds: batch.seeds,
            pacer: RateGate::new(batch.rate_limit),
            cache,
            extractor,
            frontier,
            fetcher,
        }
    }

    pub async fn run(mut self) {
        let seeds = std::mem::take(&mut self.seeds);
        for seed in seeds {
            self.crawl_one(seed).await;
        }
    }

    async fn crawl_one(&mut self, seed: Url) {
        let mut current = seed;
        let mut attempt = 1;

        while attempt <= MAX_ATTEMPTS {
            debug!(
                "domain {} attempt {attempt}: {current} ({})",
                self.domain,
                current.sha256_hex()
            );

            let mut content = self.cache.fetch(&current);
            if content.is_none() {
                // Pacing guards the network, never the cache.
                self.pacer.wait().await;
                let Some(response) = self.fetcher.fetch(&current).await else {
                    attempt += 1;
                    continue;
                };
                if !response.is_okay() {
                    debug!("{current} answered HTTP {}", response.status);
                    attempt += 1;
                    continue;
                }
                self.cache.store_body(&current, response.body());
                self.cache.store_headers(&current, response.headers());
                content = Some(response.into_body());
            }

            let body = String::from_utf8_lossy(content.as_deref().unwrap_or_default()).into_owned();
            let Some(record) = self.extractor.extract(&current, &body) else {
                debug!("extraction produced nothing for {current}");
                attempt += 1;
                continue;
            };

            self.cache.store_extraction(&current, &record);
            self.update_frontier(&current, &record);

            let Some(redirect) = client_redirect(&record) else {
                break; // seed done
            };

            let target = match redirect.base.as_deref() {
                Some(base) => Url::parse(base).resolve(&redirect.url),
                None => current.resolve(&redirect.url),
            };
            debug!("client redirect {current} -> {target} (delay {}s)", redirect.delay);
            if redirect.delay > 0 {
                tokio::time::sleep(Duration::from_secs(redirect.delay)).await;
            }
            current = target;
            attempt += 1; // redirects share the attempt budget
        }
    }

    /// Append extracted same-domain URLs to the frontier. Candidates resolve
    /// against the page they were found on; anything leaving the domain is
    /// silently dropped.
    fn update_frontier(&self, current: &Url, record: &Value) {
        let Some(candidates) = record.get("urls").and_then(Value::as_array) else {
            return;
        };

        let mut fresh: BTreeSet<Url> = BTreeSet::new();
        for candidate in candidates {
            let Some(raw) = candidate.as_str() else {
                continue;
            };
            let resolved = current.resolve(raw);
            if !resolved.is_valid() {
                continue;
            }
            if resolved.domain() != self.domain {
                continue;
            }
            fresh.insert(resolved);
        }

        if fresh.is_empty() {
            return;
        }
        if let Err(e) = self.frontier.append(&self.domain, &fresh) {
            warn!("frontier append for {} failed: {e}", self.domain);
        }
    }
}

fn client_redirect(record: &Value) -> Option<ClientRedirect> {
    let value = record.get("client_redirect")?;
    if value.is_null() {
        return None;
    }
    serde_json::from_value(value.clone())
        .map_err(|e| debug!("unusable client_redirect: {e}"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::UserAgentPool;
    use crate::extract::HtmlExtractor;
    use crate::trust::TrustStore;
    use std::io::Write;
    use std::path::Path;

    struct Fixture {
        _root: tempfile::TempDir,
        cache: Arc<ContentCache>,
        frontier: Arc<FrontierStore>,
        cache_dir: std::path::PathBuf,
        frontier_dir: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let cache_dir = root.path().join("cache");
        let frontier_dir = root.path().join("frontier");
        std::fs::create_dir_all(&frontier_dir).unwrap();
        let cache = Arc::new(ContentCache::new(&cache_dir, Duration::from_secs(3600)));
        let frontier = Arc::new(FrontierStore::new(&frontier_dir).unwrap());
        Fixture {
            _root: root,
            cache,
            frontier,
            cache_dir,
            frontier_dir,
        }
    }

    fn offline_fetcher() -> Fetcher {
        let mut ua = tempfile::NamedTempFile::new().unwrap();
        writeln!(ua, "TestAgent/1.0").unwrap();
        let agents = Arc::new(UserAgentPool::load(ua.path()).unwrap());
        let trust = TrustStore::new(
            std::env::temp_dir().join("unused-pems"),
            std::env::temp_dir().join("unused-ca.pem"),
        );
        Fetcher::new(agents, trust).unwrap()
    }

    fn worker(fx: &Fixture, domain: &str, seeds: &[&str]) -> DomainWorker {
        let domain = Url::parse(domain);
        let batch = DomainBatch {
            domain: domain.clone(),
            seeds: seeds.iter().map(|s| Url::parse(s)).collect(),
            rate_limit: Duration::ZERO,
        };
        DomainWorker::new(
            batch,
            fx.cache.clone(),
            Box::new(HtmlExtractor::new(domain)),
            fx.frontier.clone(),
            offline_fetcher(),
        )
    }

    fn extraction_for(fx: &Fixture, url: &Url) -> Option<Value> {
        let path = fx.cache_dir.join(format!("{}.json", url.sha256_hex()));
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn frontier_lines(fx: &Fixture, domain: &Url) -> Vec<String> {
        let path = fx
            .frontier_dir
            .join(format!("{}.list", domain.sha256_hex()));
        match std::fs::read_to_string(path) {
            Ok(text) => text.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn frontier_file_exists(fx: &Fixture, domain: &Url) -> bool {
        fx.frontier_dir
            .join(format!("{}.list", domain.sha256_hex()))
            .exists()
    }

    #[tokio::test]
    async fn cached_page_is_extracted_without_network() {
        let fx = fixture();
        let url = Url::parse("https://example.com/path");
        fx.cache.store_body(
            &url,
            b"<html><head><title> Hello World </title></head></html>",
        );

        worker(&fx, "example.com", &["https://example.com/path"])
            .run()
            .await;

        let record = extraction_for(&fx, &url).unwrap();
        assert_eq!(record["title"], "Hello World");
        assert_eq!(record["url"], "https://example.com/path");
        assert!(record.get("urls").is_none());
        assert!(!frontier_file_exists(&fx, &Url::parse("example.com")));
    }

    #[tokio::test]
    async fn same_domain_links_feed_the_frontier() {
        let fx = fixture();
        let url = Url::parse("https://example.com/page");
        fx.cache.store_body(
            &url,
            br#"<html><body>
                <a href="/about">a</a>
                <a href="https://example.com/contact">b</a>
                <a href="https://sub.example.com/deep">c</a>
                <a href="https://other.net/out">d</a>
            </body></html>"#,
        );

        worker(&fx, "example.com", &["https://example.com/page"])
            .run()
            .await;

        let domain = Url::parse("example.com");
        let lines = frontier_lines(&fx, &domain);
        assert_eq!(
            lines,
            vec![
                "https://example.com/about",
                "https://example.com/contact",
                "https://sub.example.com/deep",
            ]
        );
        // every appended URL belongs to the worker's domain
        for line in lines {
            assert_eq!(Url::parse(&line).registrable_domain(), "example.com");
        }
    }

    #[tokio::test]
    async fn client_redirect_is_followed_within_the_budget() {
        let fx = fixture();
        let start = Url::parse("https://example.com/start");
        let next = Url::parse("https://example.com/next");
        fx.cache.store_body(
            &start,
            br#"<html><head>
                <base href="https://example.com/dir/">
                <meta http-equiv="refresh" content="0; URL=../next">
            </head></html>"#,
        );
        fx.cache
            .store_body(&next, b"<html><head><title>Landed</title></head></html>");

        worker(&fx, "example.com", &["https://example.com/start"])
            .run()
            .await;

        let first = extraction_for(&fx, &start).unwrap();
        assert_eq!(first["client_redirect"]["url"], "../next");
        let second = extraction_for(&fx, &next).unwrap();
        assert_eq!(second["title"], "Landed");
    }

    #[tokio::test]
    async fn redirect_loop_exhausts_the_attempt_budget() {
        let fx = fixture();
        let a = Url::parse("https://example.com/a");
        let b = Url::parse("https://example.com/b");
        let loop_a = br#"<meta http-equiv="refresh" content="0; url=/b">"#;
        let loop_b = br#"<meta http-equiv="refresh" content="0; url=/a">"#;
        fx.cache.store_body(&a, loop_a);
        fx.cache.store_body(&b, loop_b);

        // Terminates despite the loop: three attempts, then the seed is
        // abandoned.
        worker(&fx, "example.com", &["https://example.com/a"])
            .run()
            .await;

        assert!(extraction_for(&fx, &a).is_some());
        assert!(extraction_for(&fx, &b).is_some());
    }

    #[tokio::test]
    async fn null_client_redirect_is_ignored() {
        let record = serde_json::json!({"title": "t", "client_redirect": null});
        assert!(client_redirect(&record).is_none());

        let record = serde_json::json!({
            "title": "t",
            "client_redirect": {"type": "meta", "delay": 0, "url": "/x"}
        });
        let cr = client_redirect(&record).unwrap();
        assert_eq!(cr.url, "/x");
        assert!(cr.base.is_none());
    }
}
