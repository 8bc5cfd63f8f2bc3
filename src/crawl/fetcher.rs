//! Single-URL HTTPS fetch with layered failure recovery
//!
//! The happy path is one GET on a strictly-verifying HTTP/2-capable client.
//! Two failure classes get one retry each:
//!
//! - HTTP/2 stream failures and partial transfers downgrade the client to
//!   HTTP/1.1 (some origins negotiate h2 and then mishandle it).
//! - Peer-verification failures hand the URL to the trust store; when AIA
//!   augmentation discovers a usable intermediate, the retry runs on a
//!   strictly-verifying client that additionally trusts the per-host bundle.
//!
//! Everything else collapses to `None` and costs the caller an attempt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::agent::UserAgentPool;
use crate::trust::TrustStore;
use crate::url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(45);
/// Stand-in for a 1 B/s low-speed floor over 60 s: a read that stalls for
/// a minute is as good as dead.
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const KEEPALIVE: Duration = Duration::from_secs(60);
const MAX_REDIRECTS: usize = 10;

/// A completed HTTP exchange. Headers keep their wire order; lookup is
/// case-insensitive.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    pub redirect_count: u32,
    pub effective_url: Url,
}

impl HttpResponse {
    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn is_okay(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    /// HTTP/2 stream failure or partial transfer; retry on HTTP/1.1.
    Downgrade,
    /// Peer verification failure; try trust augmentation.
    TlsVerification,
    Other,
}

/// Classify a transport error by walking its source chain. String matching
/// is the only portable signal the TLS and h2 layers expose.
fn classify(error: &reqwest::Error) -> ErrorClass {
    let mut text = error.to_string().to_ascii_lowercase();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        text.push('\n');
        text.push_str(&inner.to_string().to_ascii_lowercase());
        source = inner.source();
    }

    const TLS_MARKERS: &[&str] = &[
        "unable to get local issuer certificate",
        "certificate verify failed",
        "self signed certificate",
        "self-signed certificate",
        "invalid peer certificate",
        "unknown issuer",
    ];
    if TLS_MARKERS.iter().any(|m| text.contains(m)) {
        return ErrorClass::TlsVerification;
    }

    const DOWNGRADE_MARKERS: &[&str] = &[
        "http2 error",
        "h2 protocol error",
        "stream error",
        "partial",
        "connection closed before message completed",
        "unexpected end of file",
    ];
    if DOWNGRADE_MARKERS.iter().any(|m| text.contains(m)) {
        return ErrorClass::Downgrade;
    }

    ErrorClass::Other
}

/// Per-worker fetch handle. Owns its HTTP client, its trust store, and the
/// redirect counter shared with the client's redirect policy.
pub struct Fetcher {
    agents: Arc<UserAgentPool>,
    trust: TrustStore,
    client: reqwest::Client,
    redirect_count: Arc<AtomicUsize>,
}

impl Fetcher {
    pub fn new(agents: Arc<UserAgentPool>, trust: TrustStore) -> anyhow::Result<Self> {
        let redirect_count = Arc::new(AtomicUsize::new(0));
        let client = build_client(&redirect_count, false, &[])?;
        Ok(Self {
            agents,
            trust,
            client,
            redirect_count,
        })
    }

    /// Fetch one URL. Transport failures are recovered once where the error
    /// class allows it; anything else is logged and returns `None`.
    pub async fn fetch(&mut self, url: &Url) -> Option<HttpResponse> {
        let error = match self.request(&self.client, url).await {
            Ok(response) => return Some(response),
            Err(e) => e,
        };

        match classify(&error) {
            ErrorClass::Downgrade => {
                debug!("downgrading {url} to HTTP/1.1: {error}");
                let client = match build_client(&self.redirect_count, true, &[]) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("HTTP/1.1 client build failed: {e}");
                        return None;
                    }
                };
                match self.request(&client, url).await {
                    Ok(response) => {
                        // The origin mishandles h2; stay downgraded.
                        self.client = client;
                        Some(response)
                    }
                    Err(e) => {
                        warn!("fetch {url} failed after downgrade: {e}");
                        None
                    }
                }
            }
            ErrorClass::TlsVerification => {
                debug!("tls verification failed for {url}: {error}");
                let bundle = self.trust.augment(url).await?;
                let roots = match bundle_roots(bundle.path()) {
                    Ok(roots) => roots,
                    Err(e) => {
                        warn!("bundle {} unusable: {e}", bundle.path().display());
                        return None;
                    }
                };
                let client = match build_client(&self.redirect_count, false, &roots) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("augmented client build failed: {e}");
                        return None;
                    }
                };
                // Strict verification stays on; only the root set grew. The
                // bundle handle must outlive this retry (a temp bundle is
                // unlinked on drop).
                let result = self.request(&client, url).await;
                drop(bundle);
                match result {
                    Ok(response) => {
                        self.client = client;
                        Some(response)
                    }
                    Err(e) => {
                        warn!("fetch {url} failed after trust augmentation: {e}");
                        None
                    }
                }
            }
            ErrorClass::Other => {
                warn!("fetch {url} failed: {error}");
                None
            }
        }
    }

    async fn request(&self, client: &reqwest::Client, url: &Url) -> reqwest::Result<HttpResponse> {
        self.redirect_count.store(0, Ordering::Relaxed);

        let response = client
            .get(url.canonical())
            .header(reqwest::header::USER_AGENT, self.agents.random())
            .send()
            .await?;

        let status = response.status().as_u16();
        let effective_url = Url::parse(response.url().as_str());
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
            redirect_count: self.redirect_count.load(Ordering::Relaxed) as u32,
            effective_url,
        })
    }
}

/// Build the fetch client: strict verification, redirect cap with count
/// capture, auto-referer, transparent decompression, keep-alive.
fn build_client(
    redirect_count: &Arc<AtomicUsize>,
    http1_only: bool,
    extra_roots: &[reqwest::Certificate],
) -> reqwest::Result<reqwest::Client> {
    let counter = redirect_count.clone();
    let policy = reqwest::redirect::Policy::custom(move |attempt| {
        counter.store(attempt.previous().len(), Ordering::Relaxed);
        if attempt.previous().len() > MAX_REDIRECTS {
            attempt.stop()
        } else {
            attempt.follow()
        }
    });

    let mut builder = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(TOTAL_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .tcp_keepalive(KEEPALIVE)
        .redirect(policy)
        .referer(true)
        .gzip(true)
        .brotli(true)
        .deflate(true);

    if http1_only {
        builder = builder.http1_only();
    }
    for root in extra_roots {
        builder = builder.add_root_certificate(root.clone());
    }

    builder.build()
}

/// Parse every certificate in a PEM bundle file into client roots.
fn bundle_roots(path: &std::path::Path) -> anyhow::Result<Vec<reqwest::Certificate>> {
    let bytes = std::fs::read(path)?;
    let mut roots = Vec::new();
    for block in pem::parse_many(&bytes)? {
        if block.tag() != "CERTIFICATE" {
            continue;
        }
        roots.push(reqwest::Certificate::from_der(block.contents())?);
    }
    Ok(roots)
}
