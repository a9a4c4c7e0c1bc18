//! Display classification for non-marker log lines.

use std::fmt;

/// How a log line is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LineKind {
    #[default]
    Stdout,
    Stderr,
    /// Output from the remediation service.
    Fix,
    /// Lifecycle chatter from the container or tooling.
    System,
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Fix => "fix",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

const FIX_GLYPHS: &[&str] = &["🔧", "🩹", "🛠"];
const FIX_WORDS: &[&str] = &["[fix]", "auto-fix", "autofix", "applying fix", "applying patch"];
const ERR_GLYPHS: &[&str] = &["❌", "✗", "✖", "⚠"];
const ERR_WORDS: &[&str] = &["error", "err!", "traceback", "exception", "failed", "fatal", "panic"];
const SYSTEM_GLYPHS: &[&str] = &["✓", "✔", "✅", "🚀", "📦", "==>"];
const SYSTEM_WORDS: &[&str] = &[
    "[system]",
    "listening on",
    "server running",
    "ready in",
    "compiled successfully",
    "installing dependencies",
    "starting container",
];

/// Guesses a [`LineKind`] from glyphs and keywords. Fix beats stderr beats
/// system.
#[must_use]
pub fn classify_line(line: &str) -> LineKind {
    let trimmed = line.trim_start();
    let lower = trimmed.to_lowercase();
    let starts = |glyphs: &[&str]| glyphs.iter().any(|g| trimmed.starts_with(g));
    let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if starts(FIX_GLYPHS) || mentions(FIX_WORDS) {
        LineKind::Fix
    } else if starts(ERR_GLYPHS) || mentions(ERR_WORDS) {
        LineKind::Stderr
    } else if starts(SYSTEM_GLYPHS) || mentions(SYSTEM_WORDS) {
        LineKind::System
    } else {
        LineKind::Stdout
    }
}
