//! Capture agent: turns preview failure surfaces into deduplicated,
//! rate-limited batches POSTed to one configurable endpoint.
//!
//! Five surfaces feed the agent: uncaught exceptions, unhandled promise
//! rejections, the console error sink, the fetch primitive and resource load
//! failures (plus framework error boundaries). Each signal becomes a
//! [`LogEntry`], is checked against the ignore list and a rolling dedupe
//! window, and is buffered. The buffer is flushed 1 s after the last enqueue
//! or immediately once it holds `max_buffer_size` entries.
//!
//! Delivery is fire-and-forget: a failed POST is logged at `debug` and never
//! fed back into the agent. The agent only reports; it never asks the
//! backend to fix anything.

pub mod stack;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use fixwatch_proto::entry::{AgentBatch, ErrorSource, LogEntry, LogEntryType};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use crate::buffer::{DEDUPE_MESSAGE_CHARS, DedupeWindow, truncate_chars};
use crate::classify::{IgnoreList, PatternClassifier, Verdict, infer_error_type};
use crate::debounce::Debouncer;
use crate::epoch_millis;
use crate::transport::ReportTransport;

/// Agent tunables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// URL batches are POSTed to.
    pub endpoint: String,
    /// Project the preview belongs to.
    pub project_id: String,
    /// Quiet period after the last enqueue before flushing.
    pub debounce: Duration,
    /// Buffer length that triggers an immediate flush.
    pub max_buffer_size: usize,
    /// Rolling window during which identical entries are dropped.
    pub dedupe_window: Duration,
    /// Dedupe map size past which expired keys are swept.
    pub dedupe_sweep_threshold: usize,
    /// Patterns whose messages are never captured.
    pub ignore: IgnoreList,
    /// Page URL reported with each batch.
    pub page_url: String,
    /// User agent reported with each batch.
    pub user_agent: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/errors/browser".to_string(),
            project_id: String::new(),
            debounce: Duration::from_millis(1000),
            max_buffer_size: 10,
            dedupe_window: Duration::from_secs(5),
            dedupe_sweep_threshold: 100,
            ignore: IgnoreList::defaults(),
            page_url: String::new(),
            user_agent: concat!("fixwatch-agent/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// What happened to a captured signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Buffered for the next flush.
    Queued,
    /// Matched the ignore list.
    Ignored,
    /// Seen within the dedupe window.
    Duplicate,
    /// The agent is paused.
    Paused,
    /// The capture path itself failed; the signal was dropped.
    Dropped,
}

/// A signal on its way to becoming a [`LogEntry`].
struct Draft {
    entry_type: LogEntryType,
    message: String,
    file: Option<String>,
    line: Option<u32>,
    column: Option<u32>,
    stack: Option<String>,
}

impl Draft {
    fn new(entry_type: LogEntryType, message: impl Into<String>) -> Self {
        Self {
            entry_type,
            message: message.into(),
            file: None,
            line: None,
            column: None,
            stack: None,
        }
    }

    fn with_stack(mut self, stack: Option<String>) -> Self {
        if let Some(loc) = stack.as_deref().and_then(stack::extract_location) {
            self.file.get_or_insert(loc.file);
            self.line.get_or_insert(loc.line);
            self.column.get_or_insert(loc.column);
        }
        self.stack = stack;
        self
    }
}

const fn source_of(entry_type: LogEntryType) -> ErrorSource {
    match entry_type {
        LogEntryType::JsRuntime | LogEntryType::PromiseRejection | LogEntryType::ConsoleError => {
            ErrorSource::Browser
        }
        LogEntryType::NetworkError => ErrorSource::Network,
        LogEntryType::ResourceError => ErrorSource::Resource,
        LogEntryType::ReactError => ErrorSource::React,
    }
}

struct AgentState {
    buffer: Vec<LogEntry>,
    dedupe: DedupeWindow,
    paused: bool,
    endpoint: String,
    project_id: String,
}

struct AgentInner<T> {
    transport: T,
    config: AgentConfig,
    classifier: PatternClassifier,
    state: Mutex<AgentState>,
    debouncer: Debouncer,
}

/// The capture agent. Cheap to clone; clones share one buffer.
pub struct CaptureAgent<T: ReportTransport> {
    inner: Arc<AgentInner<T>>,
}

impl<T: ReportTransport> Clone for CaptureAgent<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ReportTransport> fmt::Debug for CaptureAgent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CaptureAgent")
            .field("project_id", &state.project_id)
            .field("endpoint", &state.endpoint)
            .field("buffered", &state.buffer.len())
            .field("paused", &state.paused)
            .finish_non_exhaustive()
    }
}

impl<T: ReportTransport> CaptureAgent<T> {
    /// Creates an agent that delivers through `transport`.
    pub fn new(config: AgentConfig, transport: T) -> Self {
        let classifier = PatternClassifier::new(config.ignore.clone());
        let state = AgentState {
            buffer: Vec::new(),
            dedupe: DedupeWindow::with_sweep_threshold(
                config.dedupe_window,
                config.dedupe_sweep_threshold,
            ),
            paused: false,
            endpoint: config.endpoint.clone(),
            project_id: config.project_id.clone(),
        };
        Self {
            inner: Arc::new(AgentInner {
                transport,
                config,
                classifier,
                state: Mutex::new(state),
                debouncer: Debouncer::new(),
            }),
        }
    }

    // -- Failure surfaces ---------------------------------------------------

    /// Global uncaught exception handler.
    pub fn on_uncaught_error(
        &self,
        message: &str,
        file: Option<&str>,
        line: Option<u32>,
        column: Option<u32>,
        stack: Option<&str>,
    ) -> CaptureOutcome {
        let mut draft = Draft::new(LogEntryType::JsRuntime, message);
        draft.file = file.map(stack::clean_path);
        draft.line = line;
        draft.column = column;
        self.capture(draft.with_stack(stack.map(str::to_string)))
    }

    /// Unhandled promise rejection handler. `reason` is the rejection value.
    pub fn on_unhandled_rejection(&self, reason: &Value) -> CaptureOutcome {
        let (message, stack) = describe_value(reason);
        let message = if reason.is_string() || reason.get("message").is_some() {
            message
        } else {
            format!("Unhandled promise rejection: {message}")
        };
        self.capture(Draft::new(LogEntryType::PromiseRejection, message).with_stack(stack))
    }

    /// Captures one console error call. Arguments are serialized and joined.
    pub fn on_console_error(&self, args: &[Value]) -> CaptureOutcome {
        let mut stack = None;
        let message = args
            .iter()
            .map(|arg| {
                let (text, arg_stack) = describe_value(arg);
                if stack.is_none() {
                    stack = arg_stack;
                }
                text
            })
            .collect::<Vec<_>>()
            .join(" ");
        self.capture(Draft::new(LogEntryType::ConsoleError, message).with_stack(stack))
    }

    /// Wraps a console error sink: the original runs first, then the call is
    /// captured.
    pub fn wrap_console<F>(&self, original: F) -> impl Fn(&[Value]) + Send + Sync + 'static
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let agent = self.clone();
        move |args: &[Value]| {
            original(args);
            agent.on_console_error(args);
        }
    }

    /// Runs a request and reports non-2xx responses and failures.
    ///
    /// The request's own result is returned unchanged; failures are never
    /// swallowed. Requests to the agent's own endpoint are not reported.
    pub async fn instrument_fetch<R, E, F, S>(
        &self,
        method: &str,
        url: &str,
        request: F,
        status_of: S,
    ) -> Result<R, E>
    where
        F: Future<Output = Result<R, E>>,
        E: fmt::Display,
        S: FnOnce(&R) -> u16,
    {
        let result = request.await;
        if self.is_own_endpoint(url) {
            return result;
        }
        match &result {
            Ok(response) => {
                let status = status_of(response);
                if !(200..300).contains(&status) {
                    self.on_network_failure(method, url, Some(status), None);
                }
            }
            Err(e) => {
                self.on_network_failure(method, url, None, Some(&e.to_string()));
            }
        }
        result
    }

    /// Records a failed request directly.
    pub fn on_network_failure(
        &self,
        method: &str,
        url: &str,
        status: Option<u16>,
        error: Option<&str>,
    ) -> CaptureOutcome {
        let message = match (status, error) {
            (Some(status), _) => format!("{method} {url} failed with status {status}"),
            (None, Some(err)) => format!("{method} {url} network error: {err}"),
            (None, None) => format!("{method} {url} failed"),
        };
        let mut draft = Draft::new(LogEntryType::NetworkError, message);
        draft.file = Some(stack::clean_path(url));
        self.capture(draft)
    }

    /// Capture-phase load failure of an `img`, `script`, `link`, `video`,
    /// `audio` or `source` element.
    pub fn on_resource_error(&self, tag: &str, src: &str) -> CaptureOutcome {
        let tag = tag.to_ascii_lowercase();
        let mut draft = Draft::new(
            LogEntryType::ResourceError,
            format!("Failed to load <{tag}>: {src}"),
        );
        draft.file = Some(stack::clean_path(src));
        self.capture(draft)
    }

    /// Framework error boundary.
    pub fn on_react_error(&self, message: &str, component_stack: Option<&str>) -> CaptureOutcome {
        let draft = Draft::new(LogEntryType::ReactError, message)
            .with_stack(component_stack.map(str::to_string));
        self.capture(draft)
    }

    // -- Control surface ----------------------------------------------------

    /// Stops capturing; signals are dropped until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.inner.state.lock().paused = true;
    }

    /// Resumes capturing.
    pub fn resume(&self) {
        self.inner.state.lock().paused = false;
    }

    /// Whether capture is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// Copy of the pending buffer, oldest first.
    #[must_use]
    pub fn get_buffer(&self) -> Vec<LogEntry> {
        self.inner.state.lock().buffer.clone()
    }

    /// Changes the project id sent with subsequent batches.
    pub fn set_project_id(&self, project_id: impl Into<String>) {
        self.inner.state.lock().project_id = project_id.into();
    }

    /// Changes the endpoint subsequent batches are sent to.
    pub fn set_endpoint(&self, endpoint: impl Into<String>) {
        self.inner.state.lock().endpoint = endpoint.into();
    }

    /// Sends everything buffered now. Does nothing when the buffer is empty.
    pub async fn flush(&self) {
        self.inner.debouncer.cancel();
        let (endpoint, batch) = {
            let mut state = self.inner.state.lock();
            if state.buffer.is_empty() {
                return;
            }
            let batch = AgentBatch {
                project_id: state.project_id.clone(),
                source: ErrorSource::Browser.as_str().to_string(),
                errors: std::mem::take(&mut state.buffer),
                timestamp: epoch_millis(),
                url: self.inner.config.page_url.clone(),
                user_agent: self.inner.config.user_agent.clone(),
            };
            (state.endpoint.clone(), batch)
        };

        let count = batch.errors.len();
        let body = match serde_json::to_value(&batch) {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(err = %e, "agent batch serialization failed, dropping");
                return;
            }
        };
        match self.inner.transport.post_json(&endpoint, body).await {
            Ok(()) => tracing::debug!(count, endpoint = %endpoint, "agent batch sent"),
            Err(e) => tracing::debug!(count, err = %e, "agent batch send failed, dropping"),
        }
    }

    /// Final flush on page unload.
    pub async fn on_unload(&self) {
        self.flush().await;
    }

    // -- Internals ----------------------------------------------------------

    fn is_own_endpoint(&self, url: &str) -> bool {
        let state = self.inner.state.lock();
        !state.endpoint.is_empty() && url.starts_with(state.endpoint.as_str())
    }

    /// Runs the capture body so that a bug in it can never propagate into
    /// the monitored code.
    fn capture(&self, draft: Draft) -> CaptureOutcome {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.enqueue(draft)))
            .unwrap_or(CaptureOutcome::Dropped);
        if outcome == CaptureOutcome::Dropped {
            tracing::debug!("capture path panicked, signal dropped");
        }
        outcome
    }

    fn enqueue(&self, draft: Draft) -> CaptureOutcome {
        let verdict = self.inner.classifier.classify(&draft.message);
        if verdict == Verdict::Ignored {
            return CaptureOutcome::Ignored;
        }
        let severity = verdict.severity();

        let key = format!(
            "{}:{}:{}:{}",
            draft.entry_type.as_str(),
            truncate_chars(&draft.message, DEDUPE_MESSAGE_CHARS),
            draft.file.as_deref().unwrap_or_default(),
            draft.line.unwrap_or_default(),
        );

        let buffered = {
            let mut state = self.inner.state.lock();
            if state.paused {
                return CaptureOutcome::Paused;
            }
            if !state.dedupe.admit(key, Instant::now()) {
                return CaptureOutcome::Duplicate;
            }
            let category =
                infer_error_type(source_of(draft.entry_type), &draft.message).to_string();
            let framework = stack::guess_framework(draft.stack.as_deref(), &draft.message);
            state.buffer.push(LogEntry {
                entry_type: draft.entry_type,
                category,
                severity,
                message: draft.message,
                file: draft.file,
                line: draft.line,
                column: draft.column,
                stack: draft.stack,
                framework,
                timestamp: epoch_millis(),
            });
            state.buffer.len()
        };

        if buffered >= self.inner.config.max_buffer_size {
            let agent = self.clone();
            tokio::spawn(async move { agent.flush().await });
        } else {
            let weak: Weak<AgentInner<T>> = Arc::downgrade(&self.inner);
            self.inner.debouncer.schedule(self.inner.config.debounce, async move {
                if let Some(inner) = weak.upgrade() {
                    Self { inner }.flush().await;
                }
            });
        }
        CaptureOutcome::Queued
    }
}

/// Serializes a JS-like value into message text plus an optional stack.
///
/// Strings pass through, error-like objects (`message`/`stack`) yield their
/// message, anything else is rendered as JSON.
fn describe_value(value: &Value) -> (String, Option<String>) {
    match value {
        Value::String(s) => (s.clone(), None),
        Value::Object(map) if map.contains_key("message") => {
            let message = match map.get("message") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let message = match map.get("name").and_then(Value::as_str) {
                Some(name) if !message.starts_with(name) => format!("{name}: {message}"),
                _ => message,
            };
            let stack = map.get("stack").and_then(Value::as_str).map(str::to_string);
            (message, stack)
        }
        other => (other.to_string(), None),
    }
}
