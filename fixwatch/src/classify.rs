//! Pattern classifier: pure `(source, message) -> (type, severity)` mapping.
//!
//! Used by both the capture agent and the error collector. The ignore list
//! runs first and unconditionally suppresses known noise; the pattern table
//! is then tested top-to-bottom against the lower-cased message and the
//! first match wins.

use std::sync::LazyLock;

use fixwatch_proto::entry::{ErrorSource, Severity};
use regex::{Regex, RegexBuilder};

/// Ordered severity table. First match wins.
const PATTERN_TABLE: &[(&str, Severity)] = &[
    (r"\b(?:syntax|type|reference|range)error\b", Severity::Error),
    (
        r"cannot find module|module not found|failed to resolve import|could not resolve",
        Severity::Error,
    ),
    (r"\buncaught\b|\bunhandled\b", Severity::Error),
    (r"npm err!|\berr!", Severity::Error),
    (r"traceback \(most recent call last\)", Severity::Error),
    (r"\b(?:eaddrinuse|econnrefused|enoent|eacces)\b", Severity::Error),
    (
        r"segmentation fault|heap out of memory|out of memory",
        Severity::Error,
    ),
    (
        r"failed to compile|compilation failed|build failed",
        Severity::Error,
    ),
    (r"\bexception\b", Severity::Error),
    (r"\berror\b", Severity::Error),
    (r"\bfatal\b", Severity::Error),
    (r"\bdeprecat", Severity::Warning),
    (r"\bwarn(?:ing)?\b", Severity::Warning),
];

/// Known non-actionable noise, checked before the pattern table.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    r"resizeobserver loop",
    r"^script error\.?$",
    r"extension context invalidated",
    r"(?:chrome|moz|safari)-extension://",
    r"non-error promise rejection captured",
    r"download the react devtools",
    r"\[vite\] (?:connecting|connected)",
    r"\[hmr\] waiting for update signal",
];

static DEFAULT_TABLE: LazyLock<Vec<(Regex, Severity)>> = LazyLock::new(|| {
    PATTERN_TABLE
        .iter()
        .filter_map(|(p, sev)| compile(p).ok().map(|re| (re, *sev)))
        .collect()
});

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Case-insensitive list of patterns whose matches are dropped outright.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    patterns: Vec<Regex>,
}

impl IgnoreList {
    /// Compiles an ignore list from pattern strings.
    ///
    /// # Errors
    ///
    /// Returns the first pattern that fails to compile.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| compile(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// The built-in noise list.
    #[must_use]
    pub fn defaults() -> Self {
        Self::from_patterns(DEFAULT_IGNORE_PATTERNS).unwrap_or_default()
    }

    /// Whether `message` matches any ignore pattern.
    #[must_use]
    pub fn matches(&self, message: &str) -> bool {
        let trimmed = message.trim();
        self.patterns.iter().any(|re| re.is_match(trimmed))
    }

    /// Number of compiled patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Outcome of classifying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Vetoed by the ignore list.
    Ignored,
    /// Matched a pattern table entry.
    Matched(Severity),
    /// Nothing matched.
    Unmatched,
}

impl Verdict {
    /// Severity implied by the verdict; unmatched and ignored map to `Info`.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::Matched(s) => s,
            Self::Ignored | Self::Unmatched => Severity::Info,
        }
    }
}

/// Ignore list plus ordered severity table.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    table: Vec<(Regex, Severity)>,
    ignore: IgnoreList,
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(IgnoreList::defaults())
    }
}

impl PatternClassifier {
    /// Classifier with the built-in severity table.
    #[must_use]
    pub fn new(ignore: IgnoreList) -> Self {
        Self {
            table: DEFAULT_TABLE.clone(),
            ignore,
        }
    }

    /// Classifier with a caller-supplied table, tested in order.
    #[must_use]
    pub fn with_table(table: Vec<(Regex, Severity)>, ignore: IgnoreList) -> Self {
        Self { table, ignore }
    }

    /// Replaces the ignore list.
    pub fn set_ignore(&mut self, ignore: IgnoreList) {
        self.ignore = ignore;
    }

    /// Whether `message` is known noise.
    #[must_use]
    pub fn is_ignored(&self, message: &str) -> bool {
        self.ignore.matches(message)
    }

    /// Classifies a message.
    #[must_use]
    pub fn classify(&self, message: &str) -> Verdict {
        if self.is_ignored(message) {
            return Verdict::Ignored;
        }
        let lower = message.to_lowercase();
        self.table
            .iter()
            .find(|(re, _)| re.is_match(&lower))
            .map_or(Verdict::Unmatched, |(_, sev)| Verdict::Matched(*sev))
    }

    /// Severity for a message, `Info` when nothing matches.
    #[must_use]
    pub fn severity(&self, message: &str) -> Severity {
        self.classify(message).severity()
    }
}

/// Infers a fine-grained type tag from the source and message text.
#[must_use]
pub fn infer_error_type(source: ErrorSource, message: &str) -> &'static str {
    let m = message.to_lowercase();
    let has = |needle: &str| m.contains(needle);

    match source {
        ErrorSource::Browser => {
            if has("typeerror") {
                "type_error"
            } else if has("referenceerror") {
                "reference_error"
            } else if has("syntaxerror") {
                "syntax_error"
            } else if has("rangeerror") {
                "range_error"
            } else if has("fetch") || has("network") {
                "network_error"
            } else {
                "runtime_error"
            }
        }
        ErrorSource::Build => {
            if has("module") {
                "module_error"
            } else if has("syntax") {
                "syntax_error"
            } else if has("import") {
                "import_error"
            } else if has("type") {
                "type_error"
            } else {
                "build_error"
            }
        }
        ErrorSource::Docker => {
            if has("eaddrinuse") || has("port") {
                "port_error"
            } else if has("memory") || has("oom") {
                "memory_error"
            } else if has("permission") || has("eacces") {
                "permission_error"
            } else {
                "container_error"
            }
        }
        ErrorSource::Network => {
            if has("cors") {
                "cors_error"
            } else if has("timeout") || has("timed out") {
                "timeout_error"
            } else if has("404") {
                "not_found"
            } else if has("500") || has("502") || has("503") || has("504") {
                "server_error"
            } else {
                "network_error"
            }
        }
        ErrorSource::Backend => {
            if has("database") || has("sql") {
                "database_error"
            } else if has("timeout") {
                "timeout_error"
            } else {
                "backend_error"
            }
        }
        ErrorSource::React => {
            if has("hook") {
                "hook_error"
            } else if has("hydrat") {
                "hydration_error"
            } else if has("render") {
                "render_error"
            } else {
                "component_error"
            }
        }
        ErrorSource::Hmr => {
            if has("update") {
                "hmr_update_error"
            } else {
                "hmr_error"
            }
        }
        ErrorSource::Resource => "resource_error",
        ErrorSource::Csp => "csp_violation",
    }
}
