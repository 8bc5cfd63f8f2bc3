//! Client-side redirect detection
//!
//! Finds `<meta http-equiv="refresh">` directives and the common JavaScript
//! location-assignment idioms without executing anything. Meta refresh wins
//! over script patterns; among script patterns, `location.href` assignment
//! outranks a plain `location` assignment, which outranks `assign()`, which
//! outranks `replace()`. Within a single pattern the first occurrence wins.

use regex_lite::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;

use super::{ClientRedirect, RedirectKind};

static RE_BLOCK_COMMENT: OnceLock<Regex> = OnceLock::new();
static RE_JS_HREF: OnceLock<Regex> = OnceLock::new();
static RE_JS_LOCATION: OnceLock<Regex> = OnceLock::new();
static RE_JS_ASSIGN: OnceLock<Regex> = OnceLock::new();
static RE_JS_REPLACE: OnceLock<Regex> = OnceLock::new();

/// Detect a client redirect in a parsed document. `base` is the first
/// `<base href>` of the document, when present.
pub(crate) fn detect(doc: &Html, base: Option<&str>) -> Option<ClientRedirect> {
    if let Some((delay, target)) = meta_refresh(doc) {
        return Some(ClientRedirect {
            kind: RedirectKind::Meta,
            delay,
            url: target,
            base: base.map(str::to_string),
        });
    }

    js_redirect(doc).map(|target| ClientRedirect {
        kind: RedirectKind::Js,
        delay: 0,
        url: target,
        base: base.map(str::to_string),
    })
}

/// `<meta http-equiv="refresh" content="5; url=...">`. The attribute value
/// comparison is case-insensitive; entities in `content` have already been
/// decoded by the HTML parser.
fn meta_refresh(doc: &Html) -> Option<(u64, String)> {
    let Ok(selector) = Selector::parse("meta[http-equiv][content]") else {
        return None;
    };
    for element in doc.select(&selector) {
        let equiv = element.value().attr("http-equiv").unwrap_or_default();
        if !equiv.eq_ignore_ascii_case("refresh") {
            continue;
        }
        let content = element.value().attr("content").unwrap_or_default();
        if let Some(parsed) = parse_refresh_content(content) {
            return Some(parsed);
        }
    }
    None
}

/// Parse `"<delay>; url=<target>"`. The delay defaults to 0; the `url=` key
/// is case-insensitive and the target may be single- or double-quoted. A
/// refresh without a target reloads the same page and is not a redirect.
fn parse_refresh_content(content: &str) -> Option<(u64, String)> {
    let (delay_part, rest) = match content.split_once(';') {
        Some((d, r)) => (d, r),
        None => return None,
    };
    let delay = delay_part.trim().parse::<u64>().unwrap_or(0);

    let lower = rest.to_ascii_lowercase();
    let key = lower.find("url")?;
    let after = rest[key + 3..].trim_start();
    let value = after.strip_prefix('=')?.trim();
    let value = value.trim_matches(|c| c == '\'' || c == '"').trim();
    if value.is_empty() {
        return None;
    }
    Some((delay, value.to_string()))
}

/// Scan the concatenated `<script>` text for location assignments.
fn js_redirect(doc: &Html) -> Option<String> {
    let Ok(selector) = Selector::parse("script") else {
        return None;
    };
    let mut script = String::new();
    for element in doc.select(&selector) {
        for piece in element.text() {
            script.push_str(piece);
            script.push('\n');
        }
    }
    if script.is_empty() {
        return None;
    }

    // Block comments may sit between any two tokens; strip them up front so
    // the patterns only have to tolerate whitespace.
    let stripped = RE_BLOCK_COMMENT
        .get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("static regex"))
        .replace_all(&script, " ");

    let href = RE_JS_HREF.get_or_init(|| {
        Regex::new(
            r#"(?:(?:window|document|top)\s*\.\s*)?location\s*\.\s*href\s*=\s*["']([^"']+)["']"#,
        )
        .expect("static regex")
    });
    let location = RE_JS_LOCATION.get_or_init(|| {
        Regex::new(r#"(?:window|document|top)\s*\.\s*location\s*=\s*["']([^"']+)["']"#)
            .expect("static regex")
    });
    let assign = RE_JS_ASSIGN.get_or_init(|| {
        Regex::new(r#"location\s*\.\s*assign\s*\(\s*["']([^"']+)["']"#).expect("static regex")
    });
    let replace = RE_JS_REPLACE.get_or_init(|| {
        Regex::new(r#"location\s*\.\s*replace\s*\(\s*["']([^"']+)["']"#).expect("static regex")
    });

    for pattern in [href, location, assign, replace] {
        if let Some(caps) = pattern.captures(&stripped) {
            return Some(caps[1].to_string());
        }
    }
    None
}
