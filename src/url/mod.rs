//! URL value type shared by caches, frontiers, and rate limiters
//!
//! The crawler's URL is deliberately more forgiving than a general-purpose
//! URL parser: seed files and allow-list arguments name bare hosts
//! ("example.com") with no scheme, and those must still work as map keys.
//! Parsing therefore accepts `[(scheme)://](host)[/path][?query][#fragment]`
//! and never fails: unparseable input yields a value with empty scheme and
//! host for which `is_valid()` is false, and consumers drop it.
//!
//! Two URLs are equal iff their canonical string forms are equal; ordering
//! is lexicographic on the canonical form. The SHA-256 of the canonical
//! form (lowercase hex) is the content-cache and frontier file key.

mod suffix;

use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use suffix::suffix_label_count;

/// Immutable URL with lazily computed content hash and query parameters.
#[derive(Debug, Clone, Default)]
pub struct Url {
    scheme: String,
    host: String,
    path: String,
    /// Raw query including the leading `?`, or empty.
    query: String,
    /// Fragment without the leading `#`.
    fragment: String,
    canonical: String,
    sha256: OnceLock<String>,
    params: OnceLock<Vec<(String, Option<String>)>>,
}

impl Url {
    /// Parse a URL string. Never fails: invalid input produces a URL with
    /// empty scheme and host (`is_valid() == false`).
    pub fn parse(input: &str) -> Self {
        let input = input.trim();

        // "://" only separates a scheme when it appears before any path,
        // query, or fragment delimiter.
        let (scheme, rest) = match input.find("://") {
            Some(pos) if !input[..pos].contains(['/', '?', '#']) => {
                let scheme = &input[..pos];
                if scheme != "http" && scheme != "https" {
                    return Self::default();
                }
                (scheme, &input[pos + 3..])
            }
            _ => ("", input),
        };

        let (rest, fragment) = match rest.find('#') {
            Some(pos) => (&rest[..pos], &rest[pos + 1..]),
            None => (rest, ""),
        };
        let (rest, query) = match rest.find('?') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };
        let (host, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };

        if host.is_empty() {
            return Self::default();
        }

        Self::from_parts(scheme, host, path, query, fragment)
    }

    fn from_parts(scheme: &str, host: &str, path: &str, query: &str, fragment: &str) -> Self {
        let mut canonical = String::with_capacity(
            scheme.len() + host.len() + path.len() + query.len() + fragment.len() + 8,
        );
        if !scheme.is_empty() {
            canonical.push_str(scheme);
            canonical.push_str("://");
        }
        canonical.push_str(&host.to_ascii_lowercase());
        if !path.is_empty() {
            if !path.starts_with('/') {
                canonical.push('/');
            }
            canonical.push_str(path);
        }
        canonical.push_str(query);
        if !fragment.is_empty() {
            canonical.push('#');
            canonical.push_str(fragment);
        }

        Self {
            scheme: scheme.to_string(),
            host: host.to_ascii_lowercase(),
            path: path.to_string(),
            query: query.to_string(),
            fragment: fragment.to_string(),
            canonical,
            sha256: OnceLock::new(),
            params: OnceLock::new(),
        }
    }

    /// A URL is valid when both scheme and host are present.
    pub fn is_valid(&self) -> bool {
        !self.scheme.is_empty() && !self.host.is_empty()
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string including the leading `?` (empty when absent).
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// Canonical string form: `scheme://host[path][?query][#fragment]` with
    /// the host lowercased.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// SHA-256 of the canonical form as lowercase hex, computed on first use.
    pub fn sha256_hex(&self) -> &str {
        self.sha256
            .get_or_init(|| format!("{:x}", Sha256::digest(self.canonical.as_bytes())))
    }

    /// Resolve a reference against this URL, RFC 3986 in essence.
    pub fn resolve(&self, reference: &str) -> Url {
        let reference = reference.trim();

        // Absolute reference
        if reference.contains("://") {
            return Url::parse(reference);
        }

        // Protocol-relative: inherit the base scheme
        if reference.starts_with("//") {
            return Url::parse(&format!("{}:{}", self.scheme, reference));
        }

        let (rest, fragment) = match reference.find('#') {
            Some(pos) => (&reference[..pos], &reference[pos + 1..]),
            None => (reference, ""),
        };
        let (ref_path, ref_query) = match rest.find('?') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };

        let origin = if self.scheme.is_empty() {
            String::new()
        } else {
            format!("{}://{}", self.scheme, self.host)
        };

        let path = if ref_path.is_empty() {
            if self.path.is_empty() {
                "/".to_string()
            } else {
                self.path.clone()
            }
        } else if ref_path.starts_with('/') {
            normalize_path(ref_path)
        } else {
            // Relative to the base directory (up to and including the last
            // `/`, defaulting to the root).
            let base_dir = match self.path.rfind('/') {
                Some(pos) => &self.path[..=pos],
                None => "/",
            };
            normalize_path(&format!("{base_dir}{ref_path}"))
        };

        // Query: the reference wins; the base query is inherited only when
        // the reference has neither path nor query.
        let query = if !ref_query.is_empty() {
            ref_query
        } else if ref_path.is_empty() {
            self.query.as_str()
        } else {
            ""
        };

        let frag = if fragment.is_empty() {
            String::new()
        } else {
            format!("#{fragment}")
        };
        Url::parse(&format!("{origin}{path}{query}{frag}"))
    }

    /// The registrable domain as a URL value, usable as a map key.
    pub fn domain(&self) -> Url {
        Url::parse(&self.registrable_domain())
    }

    /// Longest suffix from the compiled-in multi-label list (whole-label
    /// match), else the last label. IP literals have no public suffix.
    pub fn public_suffix(&self) -> String {
        if self.host_is_ipv4() || self.host_is_ipv6() {
            return String::new();
        }
        let labels: Vec<&str> = self.host.split('.').collect();
        let ps_len = suffix_label_count(&self.host);
        if ps_len == 0 || ps_len > labels.len() {
            return String::new();
        }
        labels[labels.len() - ps_len..].join(".")
    }

    /// eTLD+1: one label left of the public suffix plus the suffix itself.
    /// IP literals echo the host; a host that *is* a public suffix has no
    /// registrable domain.
    pub fn registrable_domain(&self) -> String {
        if self.host_is_ipv4() || self.host_is_ipv6() {
            return self.host.clone();
        }
        let labels: Vec<&str> = self.host.split('.').collect();
        let ps_len = suffix_label_count(&self.host);
        if ps_len == 0 || labels.len() <= ps_len {
            return String::new();
        }
        labels[labels.len() - ps_len - 1..].join(".")
    }

    /// The single label immediately left of the public suffix, empty when
    /// not applicable.
    pub fn second_level_domain(&self) -> String {
        if self.host_is_ipv4() || self.host_is_ipv6() {
            return String::new();
        }
        let labels: Vec<&str> = self.host.split('.').collect();
        let ps_len = suffix_label_count(&self.host);
        if ps_len == 0 || labels.len() <= ps_len {
            return String::new();
        }
        labels[labels.len() - ps_len - 1].to_string()
    }

    /// Labels left of the registrable domain, left to right:
    /// `["a", "b"]` for `a.b.example.com`.
    pub fn subdomains(&self) -> Vec<String> {
        if self.host_is_ipv4() || self.host_is_ipv6() {
            return Vec::new();
        }
        let labels: Vec<&str> = self.host.split('.').collect();
        let ps_len = suffix_label_count(&self.host);
        if ps_len == 0 || labels.len() <= ps_len + 1 {
            return Vec::new();
        }
        labels[..labels.len() - ps_len - 1]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Dotted-quad check, light enough to avoid label-splitting hosts that
    /// are actually addresses.
    pub fn host_is_ipv4(&self) -> bool {
        let labels: Vec<&str> = self.host.split('.').collect();
        labels.len() == 4
            && labels
                .iter()
                .all(|l| !l.is_empty() && l.bytes().all(|b| b.is_ascii_digit()))
    }

    /// Bracketed IPv6 literal check.
    pub fn host_is_ipv6(&self) -> bool {
        self.host.starts_with('[') && self.host.ends_with(']')
    }

    /// All values for a query key, in insertion order. A key present with no
    /// `=` yields an entry with no value. `None` when the key is absent.
    pub fn query_params(&self, key: &str) -> Option<Vec<Option<String>>> {
        let values: Vec<Option<String>> = self
            .parsed_params()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values)
        }
    }

    fn parsed_params(&self) -> &[(String, Option<String>)] {
        self.params.get_or_init(|| {
            let mut out = Vec::new();
            let Some(query) = self.query.strip_prefix('?') else {
                return out;
            };
            for piece in query.split('&') {
                if piece.is_empty() {
                    continue;
                }
                match piece.split_once('=') {
                    Some((key, value)) => {
                        if !key.is_empty() {
                            out.push((key.to_string(), Some(value.to_string())));
                        }
                    }
                    None => out.push((piece.to_string(), None)),
                }
            }
            out
        })
    }
}

/// Collapse `.` and `..` segments; the result never escapes the root and
/// always begins with `/`.
fn normalize_path(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            ".." => {
                parts.pop();
            }
            "" | "." => {}
            other => parts.push(other),
        }
    }
    let mut out = String::with_capacity(raw.len());
    out.push('/');
    out.push_str(&parts.join("/"));
    out
}

impl PartialEq for Url {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Url {}

impl PartialOrd for Url {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Url {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl Hash for Url {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}
