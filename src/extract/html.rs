//! Built-in HTML extractor
//!
//! Fills the extraction contract the way the per-domain recipes do: title,
//! echoed URL, outbound link candidates, and a detected (never executed)
//! client-side redirect. Link candidates are reported raw (possibly
//! relative) and resolved by the worker, which owns the same-domain filter.

use scraper::{Html, Selector};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

use super::{redirect, Extractor};
use crate::url::Url;

/// Generic per-domain HTML extractor. Constructed for a domain only when a
/// recipe directory for it exists under `script_dir`.
pub struct HtmlExtractor {
    domain: Url,
}

impl HtmlExtractor {
    pub fn new(domain: Url) -> Self {
        Self { domain }
    }

    /// The recipe-presence gate: a domain without `script_dir/<domain>/` has
    /// no extractor, and its worker completes without fetching.
    pub fn for_domain(script_dir: &Path, domain: &Url) -> Option<Self> {
        let recipe = script_dir.join(domain.canonical());
        if !recipe.exists() {
            debug!("no extraction recipe at {}", recipe.display());
            return None;
        }
        Some(Self::new(domain.clone()))
    }

    pub fn domain(&self) -> &Url {
        &self.domain
    }
}

impl Extractor for HtmlExtractor {
    fn extract(&self, url: &Url, body: &str) -> Option<Value> {
        if url.domain() != self.domain {
            debug!("extractor for {} ignoring {url}", self.domain);
            return None;
        }

        let doc = Html::parse_document(body);

        let title = Selector::parse("title")
            .ok()
            .and_then(|sel| {
                doc.select(&sel)
                    .next()
                    .map(|el| el.text().collect::<String>())
            })
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        let links: Vec<Value> = Selector::parse("a[href]")
            .ok()
            .map(|sel| {
                doc.select(&sel)
                    .filter_map(|el| el.value().attr("href"))
                    .map(|href| Value::String(href.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let base = Selector::parse("base[href]").ok().and_then(|sel| {
            doc.select(&sel)
                .next()
                .and_then(|el| el.value().attr("href"))
                .map(str::to_string)
        });

        let mut record = Map::new();
        record.insert("title".to_string(), Value::String(title));
        record.insert("url".to_string(), Value::String(url.canonical().to_string()));
        if !links.is_empty() {
            record.insert("urls".to_string(), Value::Array(links));
        }
        if let Some(cr) = redirect::detect(&doc, base.as_deref()) {
            match serde_json::to_value(&cr) {
                Ok(value) => {
                    record.insert("client_redirect".to_string(), value);
                }
                Err(e) => debug!("client_redirect not serializable: {e}"),
            }
        }

        Some(Value::Object(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> HtmlExtractor {
        HtmlExtractor::new(Url::parse("example.com"))
    }

    #[test]
    fn title_and_url_only_for_plain_page() {
        let url = Url::parse("https://example.com/path");
        let body = "<html><head><title> Hello World </title></head></html>";
        let record = extractor().extract(&url, body).unwrap();

        assert_eq!(record["title"], "Hello World");
        assert_eq!(record["url"], "https://example.com/path");
        assert!(record.get("urls").is_none());
        assert!(record.get("client_redirect").is_none());
    }

    #[test]
    fn missing_title_yields_empty_string() {
        let url = Url::parse("https://example.com/page");
        let body = "<html><head></head><body>No title here</body></html>";
        let record = extractor().extract(&url, body).unwrap();
        assert_eq!(record["title"], "");
    }

    #[test]
    fn links_are_reported_raw() {
        let url = Url::parse("https://example.com/page");
        let body = r#"
            <a href="/about">About</a>
            <a href="https://example.com/contact">Contact</a>
            <a href='https://other.net/page'>Other</a>
        "#;
        let record = extractor().extract(&url, body).unwrap();
        let urls = record["urls"].as_array().unwrap();
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[0], "/about");
        assert_eq!(urls[2], "https://other.net/page");
    }

    #[test]
    fn meta_refresh_with_base_href() {
        let url = Url::parse("https://example.com/start");
        let body = r#"<html><head>
            <base href="https://example.com/dir/">
            <meta http-equiv="refresh" content="0; URL=../next">
            <title>t</title>
        </head><body></body></html>"#;
        let record = extractor().extract(&url, body).unwrap();
        let cr = &record["client_redirect"];
        assert_eq!(cr["type"], "meta");
        assert_eq!(cr["delay"], 0);
        assert_eq!(cr["url"], "../next");
        assert_eq!(cr["base"], "https://example.com/dir/");
    }

    #[test]
    fn js_href_wins_over_replace() {
        let url = Url::parse("https://example.com/p");
        let body = r#"<script>
            location.replace("https://example.net/replace");
            window.location.href = "https://example.net/href";
        </script>"#;
        let record = extractor().extract(&url, body).unwrap();
        let cr = &record["client_redirect"];
        assert_eq!(cr["type"], "js");
        assert_eq!(cr["url"], "https://example.net/href");
    }

    #[test]
    fn other_domain_is_rejected() {
        let url = Url::parse("https://other.net/p");
        assert!(extractor().extract(&url, "<html></html>").is_none());
    }

    #[test]
    fn recipe_gate_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        let domain = Url::parse("example.com");
        assert!(HtmlExtractor::for_domain(dir.path(), &domain).is_none());

        std::fs::create_dir_all(dir.path().join("example.com")).unwrap();
        assert!(HtmlExtractor::for_domain(dir.path(), &domain).is_some());
    }
}
