//! Extraction capability
//!
//! The engine consumes extraction through the [`Extractor`] trait: given the
//! canonical URL and the fetched body, an extractor returns an optional JSON
//! record. The engine reads two fields back out of the record, `urls` (to
//! grow the frontier) and `client_redirect` (to reassign the current URL),
//! and stores the rest verbatim. Extractors are side-effect-free and must
//! not suspend.

mod html;
mod redirect;

pub use html::HtmlExtractor;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::url::Url;

/// Per-domain extraction capability. One extractor instance is owned by one
/// worker task.
pub trait Extractor: Send {
    /// Transform `(url, body)` into a JSON record, or `None` when the body
    /// could not be processed.
    fn extract(&self, url: &Url, body: &str) -> Option<Value>;
}

/// How a client-side redirect was expressed in the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectKind {
    Meta,
    Js,
}

/// A detected client-side redirect directive. The engine resolves `url`
/// against `base` when present, else against the current URL, sleeps
/// `delay` seconds, and retries within the shared attempt budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRedirect {
    #[serde(rename = "type")]
    pub kind: RedirectKind,
    #[serde(default)]
    pub delay: u64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
}
