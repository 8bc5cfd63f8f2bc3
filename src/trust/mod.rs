//! TLS trust augmentation
//!
//! Some hosts serve a leaf certificate without the intermediate that links
//! it to a root, and verification fails with "unable to get local issuer
//! certificate". The fix is mechanical: read the leaf's AIA "CA Issuers"
//! URLs, download the intermediates, normalize them to PEM, and verify again
//! with a CA bundle that includes them. This module owns that pipeline plus
//! the persistent per-host bundles under `pem_dir`.
//!
//! A `TrustStore` is owned by exactly one `Fetcher` and its caches are
//! per-instance: no locking, and a poisoned cache can only ever affect one
//! worker. The AIA probe deliberately disables
//! verification (it only wants the raw leaf, not a trusted chain) and that
//! relaxed connector never leaves this module.

mod pem;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::url::Url;

/// Positive AIA cache lifetime.
const AIA_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Negative (no AIA URLs found) cache lifetime.
const AIA_NEG_TTL: Duration = Duration::from_secs(10 * 60);
/// Either index is cleared wholesale past this size.
const AIA_CACHE_CAP: usize = 4096;

/// Probe budget: we only need the handshake, not a response.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(4);
const PROBE_TOTAL_TIMEOUT: Duration = Duration::from_secs(8);

/// Issuer download budget.
const ISSUER_CONNECT_TIMEOUT: Duration = Duration::from_secs(4);
const ISSUER_TOTAL_TIMEOUT: Duration = Duration::from_secs(10);

const ISSUER_ACCEPT: &str = "application/pkix-cert, application/pkcs7-mime, \
     application/x-pkcs7-certificates, application/x-x509-ca-cert;q=0.9, */*;q=0.5";

/// Candidate system CA bundle locations, first match wins.
const SYSTEM_CA_PATHS: &[&str] = &[
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/ssl/cert.pem",
];

/// The first system CA bundle that exists, or the conventional default.
pub fn system_ca_path() -> PathBuf {
    SYSTEM_CA_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from(SYSTEM_CA_PATHS[0]))
}

#[derive(Debug, Clone)]
struct AiaEntry {
    urls: Vec<String>,
    negative: bool,
    expires: Instant,
}

/// A CA bundle ready to be applied to an HTTPS client for one retry. The
/// temporary variant deletes its file on drop, so it must be kept alive
/// until the retry completes.
pub enum AppliedBundle {
    /// Persistent per-host bundle under `pem_dir/bundles/`.
    Host(PathBuf),
    /// One-shot fallback bundle.
    Temp(tempfile::NamedTempFile),
}

impl AppliedBundle {
    pub fn path(&self) -> &Path {
        match self {
            AppliedBundle::Host(path) => path,
            AppliedBundle::Temp(file) => file.path(),
        }
    }
}

/// Per-fetcher trust state: AIA caches, persisted issuer PEMs, and per-host
/// bundle paths.
pub struct TrustStore {
    pem_dir: PathBuf,
    base_ca_path: PathBuf,
    aia_by_host: HashMap<String, AiaEntry>,
    aia_by_fingerprint: HashMap<String, AiaEntry>,
    issuer_pem_by_cn: HashMap<String, String>,
    bundle_path_by_host: HashMap<String, PathBuf>,
    issuer_client: reqwest::Client,
}

impl TrustStore {
    pub fn new(pem_dir: impl Into<PathBuf>, base_ca_path: impl Into<PathBuf>) -> Self {
        let issuer_client = reqwest::Client::builder()
            .connect_timeout(ISSUER_CONNECT_TIMEOUT)
            .timeout(ISSUER_TOTAL_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            pem_dir: pem_dir.into(),
            base_ca_path: base_ca_path.into(),
            aia_by_host: HashMap::new(),
            aia_by_fingerprint: HashMap::new(),
            issuer_pem_by_cn: HashMap::new(),
            bundle_path_by_host: HashMap::new(),
            issuer_client,
        }
    }

    pub fn base_ca_path(&self) -> &Path {
        &self.base_ca_path
    }

    /// AIA "CA Issuers" URLs for the leaf certificate served at `url`.
    ///
    /// Consults the host index, then probes the server with verification
    /// disabled (we only want the leaf), then consults the fingerprint
    /// index, which is authoritative across hosts sharing one leaf, before
    /// parsing the extension. Results, including empty ones, are cached in
    /// both indices with a 24 h positive / 10 m negative TTL.
    pub async fn extract_aia_urls(&mut self, url: &Url) -> Vec<String> {
        let now = Instant::now();
        let (host, port) = split_host_port(url.host());

        if let Some(entry) = self.aia_by_host.get(&host) {
            if entry.expires > now {
                return entry.urls.clone();
            }
        }

        let Some(leaf_der) = probe_leaf_der(&host, port).await else {
            debug!("aia probe of {host}:{port} yielded no certificate");
            return Vec::new();
        };

        let fingerprint = pem::sha256_fingerprint_hex(&leaf_der);
        if let Some(entry) = self.aia_by_fingerprint.get(&fingerprint) {
            if entry.expires > now {
                let entry = entry.clone();
                self.aia_by_host.insert(host, entry.clone());
                return entry.urls;
            }
        }

        let urls = pem::ca_issuer_urls(&leaf_der);
        self.insert_aia(&host, &fingerprint, urls.clone(), now);
        urls
    }

    fn insert_aia(&mut self, host: &str, fingerprint: &str, urls: Vec<String>, now: Instant) {
        let negative = urls.is_empty();
        let entry = AiaEntry {
            urls,
            negative,
            expires: now + if negative { AIA_NEG_TTL } else { AIA_TTL },
        };
        debug!(
            "aia for {host}: {} url(s), negative={}",
            entry.urls.len(),
            entry.negative
        );

        if !fingerprint.is_empty() {
            self.aia_by_fingerprint
                .insert(fingerprint.to_string(), entry.clone());
        }
        self.aia_by_host.insert(host.to_string(), entry);

        // Coarse caps: clearing wholesale beats tracking recency.
        if self.aia_by_fingerprint.len() > AIA_CACHE_CAP {
            self.aia_by_fingerprint.clear();
        }
        if self.aia_by_host.len() > AIA_CACHE_CAP {
            self.aia_by_host.clear();
        }
    }

    /// Fetch intermediates named by the leaf's AIA URLs, persist the new
    /// ones, and assemble a CA bundle for the host. `None` means nothing new
    /// was discovered (or nothing was usable) and trust is unchanged.
    pub async fn augment(&mut self, url: &Url) -> Option<AppliedBundle> {
        let aia_urls = self.extract_aia_urls(url).await;
        if aia_urls.is_empty() {
            return None;
        }

        let (host, _) = split_host_port(url.host());
        let mut extras: Vec<String> = Vec::new();

        for issuer_url in &aia_urls {
            if issuer_url.starts_with("ldap://") {
                continue;
            }
            let Some(raw) = self.download_issuer(issuer_url).await else {
                continue;
            };
            let pem_text = pem::ensure_pem(&raw);
            if pem_text.is_empty() {
                debug!("unusable issuer payload from {issuer_url}");
                continue;
            }
            let Some(issuer_cn) = pem::issuer_common_name(&pem_text) else {
                continue;
            };
            if self.issuer_pem_by_cn.contains_key(&issuer_cn) {
                continue;
            }
            self.issuer_pem_by_cn
                .insert(issuer_cn.clone(), pem_text.clone());
            if let Err(e) = self.persist_pem(&host, &issuer_cn, &pem_text) {
                warn!("failed to persist issuer {issuer_cn} for {host}: {e}");
            }
            extras.push(pem_text);
        }

        if extras.is_empty() {
            return None;
        }

        match self.rebuild_host_bundle(&host) {
            Ok(path) => Some(AppliedBundle::Host(path)),
            Err(e) => {
                warn!("host bundle for {host} failed ({e}); using one-shot bundle");
                match self.write_temp_bundle(&extras) {
                    Ok(file) => Some(AppliedBundle::Temp(file)),
                    Err(e) => {
                        warn!("one-shot bundle failed: {e}");
                        None
                    }
                }
            }
        }
    }

    async fn download_issuer(&self, issuer_url: &str) -> Option<Vec<u8>> {
        let response = self
            .issuer_client
            .get(issuer_url)
            .header(reqwest::header::ACCEPT, ISSUER_ACCEPT)
            .send()
            .await
            .map_err(|e| debug!("issuer fetch {issuer_url} failed: {e}"))
            .ok()?;
        if !response.status().is_success() {
            debug!("issuer fetch {issuer_url} returned {}", response.status());
            return None;
        }
        response.bytes().await.ok().map(|b| b.to_vec())
    }

    /// Persist one issuer PEM as `<sanitized_host>__<sanitized_cn>.pem`.
    fn persist_pem(&self, host: &str, issuer_cn: &str, pem_text: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.pem_dir)?;
        let name = format!(
            "{}__{}.pem",
            pem::sanitize_component(host),
            pem::sanitize_component(issuer_cn)
        );
        let path = self.pem_dir.join(name);
        fs::write(&path, pem_text)?;
        Ok(path)
    }

    /// Concatenate the base CA bundle with every `<host>__*.pem` persisted
    /// for this host, newline-guarded, into
    /// `<pem_dir>/bundles/<host>.bundle.pem` (tmp + rename).
    fn rebuild_host_bundle(&mut self, host: &str) -> io::Result<PathBuf> {
        let mut combined = fs::read_to_string(&self.base_ca_path)?;
        if !combined.ends_with('\n') {
            combined.push('\n');
        }

        let prefix = format!("{}__", pem::sanitize_component(host));
        let mut issuer_files: Vec<PathBuf> = fs::read_dir(&self.pem_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".pem"))
            })
            .collect();
        issuer_files.sort();

        for path in issuer_files {
            let text = fs::read_to_string(&path)?;
            combined.push_str(&text);
            if !combined.ends_with('\n') {
                combined.push('\n');
            }
        }

        let bundle_dir = self.pem_dir.join("bundles");
        fs::create_dir_all(&bundle_dir)?;
        let bundle_path = bundle_dir.join(format!("{}.bundle.pem", pem::sanitize_component(host)));
        let tmp = bundle_dir.join(format!("{}.bundle.pem.tmp", pem::sanitize_component(host)));
        fs::write(&tmp, &combined)?;
        fs::rename(&tmp, &bundle_path)?;

        self.bundle_path_by_host
            .insert(host.to_string(), bundle_path.clone());
        Ok(bundle_path)
    }

    /// Base bundle plus the given extras in a temp file that lives exactly
    /// as long as the returned handle.
    fn write_temp_bundle(&self, extras: &[String]) -> io::Result<tempfile::NamedTempFile> {
        let mut combined = fs::read_to_string(&self.base_ca_path)?;
        if !combined.ends_with('\n') {
            combined.push('\n');
        }
        for pem_text in extras {
            combined.push_str(pem_text);
            if !combined.ends_with('\n') {
                combined.push('\n');
            }
        }

        let mut file = tempfile::Builder::new()
            .prefix("cabundle_")
            .suffix(".pem")
            .tempfile()?;
        io::Write::write_all(&mut file, combined.as_bytes())?;
        Ok(file)
    }
}

/// TLS-handshake the server and return its leaf certificate in DER, with
/// verification disabled. The relaxed connector exists only inside this
/// function.
async fn probe_leaf_der(host: &str, port: u16) -> Option<Vec<u8>> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| debug!("probe connector: {e}"))
        .ok()?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    let handshake = async {
        let stream = tokio::time::timeout(
            PROBE_CONNECT_TIMEOUT,
            TcpStream::connect((host, port)),
        )
        .await
        .ok()?
        .ok()?;
        connector.connect(host, stream).await.ok()
    };

    let tls = tokio::time::timeout(PROBE_TOTAL_TIMEOUT, handshake)
        .await
        .ok()??;
    let cert = tls.get_ref().peer_certificate().ok()??;
    cert.to_der().ok()
}

/// Split an authority into host and port, defaulting to 443. Handles
/// bracketed IPv6 literals.
fn split_host_port(authority: &str) -> (String, u16) {
    if let Some(rest) = authority.strip_prefix('[') {
        // [v6] or [v6]:port
        if let Some((inside, after)) = rest.split_once(']') {
            let port = after
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(443);
            return (inside.to_string(), port);
        }
        return (authority.to_string(), 443);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => {
            (host.to_string(), port.parse().unwrap_or(443))
        }
        _ => (authority.to_string(), 443),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const LEAF_PEM: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/data/leaf.pem"
    ));
    const INTERMEDIATE_PEM: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/data/intermediate.pem"
    ));

    fn store_in(dir: &Path) -> TrustStore {
        TrustStore::new(dir.join("pems"), dir.join("base.pem"))
    }

    fn write_base(dir: &Path) {
        fs::write(dir.join("base.pem"), "-----BEGIN CERTIFICATE-----\nBASE\n-----END CERTIFICATE-----").unwrap();
    }

    #[test]
    fn split_host_port_variants() {
        assert_eq!(split_host_port("example.com"), ("example.com".into(), 443));
        assert_eq!(split_host_port("example.com:8443"), ("example.com".into(), 8443));
        assert_eq!(split_host_port("[2001:db8::1]"), ("2001:db8::1".into(), 443));
        assert_eq!(split_host_port("[2001:db8::1]:444"), ("2001:db8::1".into(), 444));
    }

    #[tokio::test(start_paused = true)]
    async fn positive_entry_survives_almost_a_day() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        let now = Instant::now();
        store.insert_aia("h", "fp", vec!["http://ca/i.der".into()], now);

        tokio::time::advance(Duration::from_secs(23 * 60 * 60)).await;
        let entry = store.aia_by_host.get("h").unwrap();
        assert!(entry.expires > Instant::now());
        assert!(!entry.negative);

        tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;
        assert!(store.aia_by_host.get("h").unwrap().expires <= Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn negative_entry_expires_after_ten_minutes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.insert_aia("h", "fp", Vec::new(), Instant::now());

        let entry = store.aia_by_host.get("h").unwrap();
        assert!(entry.negative);

        tokio::time::advance(Duration::from_secs(9 * 60)).await;
        assert!(store.aia_by_host.get("h").unwrap().expires > Instant::now());

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        assert!(store.aia_by_host.get("h").unwrap().expires <= Instant::now());
    }

    #[tokio::test]
    async fn indices_clear_wholesale_past_the_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        let now = Instant::now();
        for i in 0..=AIA_CACHE_CAP {
            store.insert_aia(&format!("host{i}"), &format!("fp{i}"), vec!["u".into()], now);
        }
        // one past the cap cleared both indices
        assert!(store.aia_by_host.len() <= 1);
        assert!(store.aia_by_fingerprint.len() <= 1);
    }

    #[test]
    fn persist_pem_uses_sanitized_names() {
        let dir = tempfile::tempdir().unwrap();
        write_base(dir.path());
        let store = store_in(dir.path());

        let path = store
            .persist_pem("host.example.test", "Intermediate CA/1", LEAF_PEM)
            .unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "host.example.test__Intermediate_CA_1.pem"
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), LEAF_PEM);
    }

    #[test]
    fn host_bundle_concatenates_base_and_host_pems() {
        let dir = tempfile::tempdir().unwrap();
        write_base(dir.path());
        let mut store = store_in(dir.path());

        store
            .persist_pem("host.example.test", "Unit Test Intermediate CA", INTERMEDIATE_PEM)
            .unwrap();
        // a different host's pem must not leak into this bundle
        store
            .persist_pem("other.example.test", "Other CA", LEAF_PEM)
            .unwrap();

        let bundle = store.rebuild_host_bundle("host.example.test").unwrap();
        assert_eq!(
            bundle.file_name().unwrap().to_str().unwrap(),
            "host.example.test.bundle.pem"
        );

        let text = fs::read_to_string(&bundle).unwrap();
        assert!(text.starts_with("-----BEGIN CERTIFICATE-----\nBASE"));
        assert!(text.contains(INTERMEDIATE_PEM.trim_end()));
        assert!(!text.contains(LEAF_PEM.trim_end()));
        assert!(text.ends_with('\n'));

        assert_eq!(
            store.bundle_path_by_host.get("host.example.test"),
            Some(&bundle)
        );
    }

    #[test]
    fn missing_base_bundle_fails_host_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        fs::create_dir_all(dir.path().join("pems")).unwrap();
        assert!(store.rebuild_host_bundle("host").is_err());
    }

    #[test]
    fn temp_bundle_is_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        write_base(dir.path());
        let store = store_in(dir.path());

        let file = store
            .write_temp_bundle(&[INTERMEDIATE_PEM.to_string()])
            .unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("BASE"));
        assert!(text.contains(INTERMEDIATE_PEM.trim_end()));

        drop(file);
        assert!(!path.exists());
    }
}
