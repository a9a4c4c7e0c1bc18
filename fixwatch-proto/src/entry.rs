//! Error records and the batch payloads that carry them to the backend.
//!
//! Two record shapes exist: [`LogEntry`] is produced by the capture agent
//! inside the preview before aggregation, and [`ErrorEntry`] is the
//! structured record held by a project's error collector. Both are sent as
//! JSON over plain HTTP POST.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where an error was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    /// Preview page runtime (uncaught errors, console errors).
    Browser,
    /// Bundler / compiler output.
    Build,
    /// Execution container output.
    Docker,
    /// Failed or non-2xx network requests.
    Network,
    /// Backend service logs.
    Backend,
    /// Framework error boundaries.
    React,
    /// Hot module replacement runtime.
    Hmr,
    /// Media, script or stylesheet load failures.
    Resource,
    /// Content security policy violations.
    Csp,
}

impl ErrorSource {
    /// Lower-case wire name of the source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Build => "build",
            Self::Docker => "docker",
            Self::Network => "network",
            Self::Backend => "backend",
            Self::React => "react",
            Self::Hmr => "hmr",
            Self::Resource => "resource",
            Self::Csp => "csp",
        }
    }
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "browser" => Ok(Self::Browser),
            "build" => Ok(Self::Build),
            "docker" => Ok(Self::Docker),
            "network" => Ok(Self::Network),
            "backend" => Ok(Self::Backend),
            "react" => Ok(Self::React),
            "hmr" => Ok(Self::Hmr),
            "resource" => Ok(Self::Resource),
            "csp" => Ok(Self::Csp),
            other => Err(format!("unknown error source: {other}")),
        }
    }
}

/// How serious a captured error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; nothing matched a known error pattern.
    Info,
    /// Degraded but not failing.
    Warning,
    /// A failure worth remediating.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A structured error record held in a collector's error ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Where the error was observed.
    pub source: ErrorSource,
    /// Fine-grained type tag, e.g. `type_error` or `module_error`.
    #[serde(rename = "type")]
    pub error_type: String,
    /// The error message text.
    pub message: String,
    /// Source file the error points at, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// 1-based line number, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// 1-based column number, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Raw stack trace, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Shell command that was running when the error appeared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Classified severity.
    pub severity: Severity,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Kind of browser failure surface a [`LogEntry`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogEntryType {
    /// Global uncaught exception handler.
    JsRuntime,
    /// Unhandled promise rejection.
    PromiseRejection,
    /// Patched console error sink.
    ConsoleError,
    /// Patched fetch primitive (non-2xx or network failure).
    NetworkError,
    /// Capture-phase media/script/style load failure.
    ResourceError,
    /// Framework error boundary.
    ReactError,
}

impl LogEntryType {
    /// Wire name, as used in dedupe keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JsRuntime => "JS_RUNTIME",
            Self::PromiseRejection => "PROMISE_REJECTION",
            Self::ConsoleError => "CONSOLE_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ResourceError => "RESOURCE_ERROR",
            Self::ReactError => "REACT_ERROR",
        }
    }
}

/// An error captured inside the preview, before aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Which failure surface produced this entry.
    #[serde(rename = "type")]
    pub entry_type: LogEntryType,
    /// Classified category (type tag inferred from the message).
    pub category: String,
    /// Classified severity.
    pub severity: Severity,
    /// The error message text.
    pub message: String,
    /// Source file extracted from the stack, origin and query stripped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Line extracted from the stack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Column extracted from the stack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Raw stack trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Best guess at the UI framework in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Body of the capture agent's batch POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBatch {
    /// Project the preview belongs to.
    pub project_id: String,
    /// Always `"browser"`.
    pub source: String,
    /// Captured entries, oldest first.
    pub errors: Vec<LogEntry>,
    /// Send time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Page URL the agent runs in.
    pub url: String,
    /// User agent string of the preview.
    #[serde(rename = "userAgent")]
    pub user_agent: String,
}

/// Body of the collector's `POST /errors/report/{project_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPayload {
    /// Buffered error entries, oldest first.
    pub errors: Vec<ErrorEntry>,
    /// Recent raw output lines joined by newlines.
    pub context: String,
    /// Last known shell command (empty when none).
    pub command: String,
    /// Send time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Path the capture agent POSTs browser batches to.
pub const BROWSER_REPORT_PATH: &str = "/errors/browser";

/// Path of the collector's REST report endpoint for a project.
#[must_use]
pub fn report_path(project_id: &str) -> String {
    format!("/errors/report/{project_id}")
}

/// Path of the fix-notification WebSocket for a project.
#[must_use]
pub fn fix_channel_path(project_id: &str) -> String {
    format!("/errors/ws/{project_id}")
}

/// Path of the execution log stream WebSocket for a project.
#[must_use]
pub fn log_stream_path(project_id: &str) -> String {
    format!("/log-stream/stream/{project_id}")
}
