//! Execution log stream framing and the marker grammar.
//!
//! The container's stdout/stderr arrives over `/log-stream/stream/{id}` as
//! either raw text frames or JSON `{"type":"log","content":...}` frames.
//! Control signals are multiplexed into the same stream as sentinel line
//! prefixes. [`parse_line`] turns each line into a [`StreamLine`] so the
//! consumer never branches on raw strings.

use serde::{Deserialize, Serialize};

/// Preview server is up and serving at the given URL.
pub const PREVIEW_READY: &str = "__PREVIEW_READY__";
/// Legacy server-started marker; carries the preview URL only.
pub const SERVER_STARTED: &str = "__SERVER_STARTED__";
/// Preview URL announcement.
pub const PREVIEW_URL: &str = "_PREVIEW_URL_";
/// A fix attempt is starting.
pub const FIX_STARTING: &str = "__FIX_STARTING__";
/// The current fix attempt succeeded.
pub const FIX_SUCCESS: &str = "__FIX_SUCCESS__";
/// The current fix attempt failed.
pub const FIX_FAILED: &str = "__FIX_FAILED__";
/// The backend has used up its fix attempts.
pub const FIX_EXHAUSTED: &str = "__FIX_EXHAUSTED__";
/// Post-fix validation rejected the listed files.
pub const VALIDATION_FAILED: &str = "__VALIDATION_FAILED__";
/// A container health check failed.
pub const HEALTH_CHECK_FAILED: &str = "__HEALTH_CHECK_FAILED__";
/// Execution error.
pub const ERROR: &str = "__ERROR__";

/// A control signal decoded from a marker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// `__PREVIEW_READY__:<url>`
    PreviewReady(String),
    /// `__SERVER_STARTED__:<url>`
    ServerStarted(String),
    /// `_PREVIEW_URL_:<url>`
    PreviewUrl(String),
    /// `__FIX_STARTING__`
    FixStarting,
    /// `__FIX_SUCCESS__`
    FixSuccess,
    /// `__FIX_FAILED__:<msg>`
    FixFailed(String),
    /// `__FIX_EXHAUSTED__`
    FixExhausted,
    /// `__VALIDATION_FAILED__:<files>`
    ValidationFailed(String),
    /// `__HEALTH_CHECK_FAILED__:<reason>`
    HealthCheckFailed(String),
    /// `__ERROR__:<msg>`
    Error(String),
}

impl ControlEvent {
    /// Whether the originating line is still shown in the display log.
    ///
    /// Only `__ERROR__` lines are both a signal and visible output.
    #[must_use]
    pub const fn is_displayed(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// One line of the log stream after marker parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    /// Ordinary output for the display sink.
    Log(String),
    /// A control signal for the fix lifecycle state machine.
    Control(ControlEvent),
}

/// Parses a single line into a log line or a control event.
#[must_use]
pub fn parse_line(line: &str) -> StreamLine {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('_') {
        return StreamLine::Log(line.to_string());
    }

    let event = if let Some(rest) = strip_marker(trimmed, PREVIEW_READY) {
        ControlEvent::PreviewReady(rest)
    } else if let Some(rest) = strip_marker(trimmed, SERVER_STARTED) {
        ControlEvent::ServerStarted(rest)
    } else if let Some(rest) = strip_marker(trimmed, PREVIEW_URL) {
        ControlEvent::PreviewUrl(rest)
    } else if strip_marker(trimmed, FIX_STARTING).is_some() {
        ControlEvent::FixStarting
    } else if strip_marker(trimmed, FIX_SUCCESS).is_some() {
        ControlEvent::FixSuccess
    } else if let Some(rest) = strip_marker(trimmed, FIX_FAILED) {
        ControlEvent::FixFailed(rest)
    } else if strip_marker(trimmed, FIX_EXHAUSTED).is_some() {
        ControlEvent::FixExhausted
    } else if let Some(rest) = strip_marker(trimmed, VALIDATION_FAILED) {
        ControlEvent::ValidationFailed(rest)
    } else if let Some(rest) = strip_marker(trimmed, HEALTH_CHECK_FAILED) {
        ControlEvent::HealthCheckFailed(rest)
    } else if let Some(rest) = strip_marker(trimmed, ERROR) {
        ControlEvent::Error(rest)
    } else {
        return StreamLine::Log(line.to_string());
    };
    StreamLine::Control(event)
}

/// Matches `marker` exactly or `marker:<payload>`, returning the payload.
fn strip_marker(line: &str, marker: &str) -> Option<String> {
    let rest = line.strip_prefix(marker)?;
    if rest.is_empty() {
        return Some(String::new());
    }
    rest.strip_prefix(':').map(|p| p.trim().to_string())
}

/// JSON envelope used by the log stream for structured frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFrame {
    /// Frame kind; only `"log"` carries displayable content.
    #[serde(rename = "type")]
    pub kind: String,
    /// Raw output text, possibly spanning several lines.
    #[serde(default)]
    pub content: Option<String>,
}

impl LogFrame {
    /// Builds a `{"type":"log"}` frame.
    #[must_use]
    pub fn log(content: impl Into<String>) -> Self {
        Self {
            kind: "log".to_string(),
            content: Some(content.into()),
        }
    }

    /// Serializes this frame as JSON text.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Splits an inbound frame into output lines.
///
/// Accepts raw text and JSON `{"type":"log","content":...}` frames. JSON
/// frames of any other type carry no output and yield nothing. Text that
/// looks like JSON but fails to parse is treated as raw output. Trailing
/// `\r` is stripped and empty lines are dropped.
#[must_use]
pub fn decode_frame(text: &str) -> Vec<String> {
    let body = if text.trim_start().starts_with('{') {
        match serde_json::from_str::<LogFrame>(text) {
            Ok(frame) if frame.kind == "log" => frame.content.unwrap_or_default(),
            Ok(_) => return Vec::new(),
            Err(_) => text.to_string(),
        }
    } else {
        text.to_string()
    };

    body.split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}
