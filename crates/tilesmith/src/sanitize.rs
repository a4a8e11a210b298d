//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Source URLs may carry credentials or signed query strings; these
//! functions keep them out of logs.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Strips userinfo, query and fragment from a URL.
///
/// - `https://user:pw@host/a.tif?sig=xyz` → `https://****@host/a.tif?****`
/// - `https://host/a.tif` → `https://host/a.tif` (no change)
/// - unparseable input → `<invalid url>`
pub fn redact_url(url: &str) -> String {
    let Ok(mut parsed) = reqwest::Url::parse(url.trim()) else {
        return "<invalid url>".to_string();
    };

    let had_userinfo = !parsed.username().is_empty() || parsed.password().is_some();
    let had_query = parsed.query().is_some();

    if had_userinfo {
        let _ = parsed.set_username("****");
        let _ = parsed.set_password(None);
    }
    parsed.set_query(None);
    parsed.set_fragment(None);

    let mut redacted = parsed.to_string();
    if had_query {
        redacted.push_str("?****");
    }
    redacted
}
