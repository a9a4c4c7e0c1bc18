//! Stack-trace location extraction and framework sniffing.

use std::sync::LazyLock;

use regex::Regex;

/// Matches `at Fn (url:line:col)` and bare `at url:line:col` frames.
static FRAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"at (?:.+? \()?(.+?):(\d+):(\d+)\)?").ok());

/// Leading `scheme://host[:port]`.
static ORIGIN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^/]+").ok());

/// Source position of the top stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Path with origin and query string removed.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// Extracts the first frame's location from a stack trace.
#[must_use]
pub fn extract_location(stack: &str) -> Option<Location> {
    let frame = FRAME.as_ref()?;
    let caps = frame.captures(stack)?;
    let file = clean_path(caps.get(1)?.as_str());
    let line = caps.get(2)?.as_str().parse().ok()?;
    let column = caps.get(3)?.as_str().parse().ok()?;
    Some(Location { file, line, column })
}

/// Strips `scheme://host` and any query string or fragment from a URL.
#[must_use]
pub fn clean_path(url: &str) -> String {
    let without_origin = ORIGIN
        .as_ref()
        .map_or(url, |re| re.find(url).map_or(url, |m| &url[m.end()..]));
    let end = without_origin
        .find(['?', '#'])
        .unwrap_or(without_origin.len());
    without_origin[..end].to_string()
}

/// Guesses the UI framework from stack and message text.
#[must_use]
pub fn guess_framework(stack: Option<&str>, message: &str) -> Option<String> {
    let haystack = format!("{} {}", stack.unwrap_or_default(), message).to_lowercase();
    let name = if haystack.contains("/_next/") || haystack.contains("next/dist") {
        "next"
    } else if haystack.contains("react") {
        "react"
    } else if haystack.contains("vue") {
        "vue"
    } else if haystack.contains("svelte") {
        "svelte"
    } else if haystack.contains("angular") {
        "angular"
    } else {
        return None;
    };
    Some(name.to_string())
}
