//! Per-project error collector.
//!
//! An [`ErrorCollector`] aggregates [`ErrorEntry`] records from any call
//! site, keeps them in a capped error ring next to a capped ring of raw
//! output lines, and forwards the error ring to the backend over REST after
//! a quiet period. The error ring is cleared only after the backend confirms
//! receipt; a failed forward leaves it in place for the next attempt.
//!
//! Each collector also owns the inbound fix-notification WebSocket. Fix
//! notifications and forward outcomes are delivered to one registered
//! listener as [`CollectorEvent`]s.

pub mod registry;

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use fixwatch_proto::entry::{
    ErrorEntry, ErrorSource, ReportPayload, Severity, fix_channel_path, report_path,
};
use fixwatch_proto::fix::FixNotification;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::buffer::{DEDUPE_MESSAGE_CHARS, DedupeWindow, RingBuffer, truncate_chars};
use crate::channel::{ChannelError, ChannelHandler, ConnectionState, WsChannel, ws_url};
use crate::classify::{IgnoreList, PatternClassifier, Verdict, infer_error_type};
use crate::debounce::Debouncer;
use crate::epoch_millis;
use crate::retry::RetryPolicy;
use crate::transport::ReportTransport;

pub use registry::CollectorRegistry;

/// Collector tunables.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Backend base URL; the report and fix-channel paths are appended.
    pub backend_url: String,
    /// Quiet period after the last report before forwarding.
    pub debounce: Duration,
    /// Maximum structured errors retained.
    pub error_ring_capacity: usize,
    /// Maximum raw output lines retained as context.
    pub output_ring_capacity: usize,
    /// Window during which identical reports are dropped.
    pub dedupe_window: Duration,
    /// How often expired dedupe keys are swept.
    pub sweep_interval: Duration,
    /// Lines matching these are never reported by `detect_and_report`.
    pub ignore: IgnoreList,
    /// Reconnect policy for the fix-notification channel.
    pub reconnect: RetryPolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".to_string(),
            debounce: Duration::from_millis(800),
            error_ring_capacity: 20,
            output_ring_capacity: 50,
            dedupe_window: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(5),
            ignore: IgnoreList::defaults(),
            reconnect: RetryPolicy::default(),
        }
    }
}

/// Optional details for [`ErrorCollector::report_error`].
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub stack: Option<String>,
    /// Command that produced the error; also becomes the last known command.
    pub command: Option<String>,
    /// Skips classification when set.
    pub severity: Option<Severity>,
    /// Skips type inference when set.
    pub error_type: Option<String>,
}

/// Events delivered to the registered listener.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorEvent {
    /// An error was accepted into the error ring.
    ErrorDetected(ErrorEntry),
    /// The backend confirmed a forward of `count` errors.
    Forwarded { count: usize },
    /// A forward failed; the errors stay queued.
    ForwardFailed { reason: String },
    /// The backend pushed a fix notification.
    Fix(FixNotification),
    /// The fix channel changed state.
    Connection(ConnectionState),
}

/// Point-in-time view of a collector.
#[derive(Debug, Clone)]
pub struct CollectorSnapshot {
    pub project_id: String,
    pub errors: Vec<ErrorEntry>,
    pub output: Vec<String>,
    pub command: Option<String>,
    pub connection: ConnectionState,
    pub forwarding: bool,
}

/// Single listener slot shared with the fix channel handler.
#[derive(Default)]
struct Listener {
    tx: Mutex<Option<mpsc::Sender<CollectorEvent>>>,
}

impl Listener {
    fn emit(&self, event: CollectorEvent) {
        let mut slot = self.tx.lock();
        let Some(tx) = slot.as_ref() else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("collector listener full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                *slot = None;
            }
        }
    }
}

struct FixHandler {
    project_id: String,
    listener: Arc<Listener>,
}

impl ChannelHandler for FixHandler {
    fn on_frame(&self, text: &str) {
        match FixNotification::decode(text) {
            Ok(notification) => {
                tracing::info!(project_id = %self.project_id, ?notification, "fix notification");
                self.listener.emit(CollectorEvent::Fix(notification));
            }
            Err(e) => {
                tracing::debug!(project_id = %self.project_id, err = %e, "ignoring fix frame");
            }
        }
    }

    fn on_state(&self, state: ConnectionState) {
        self.listener.emit(CollectorEvent::Connection(state));
    }
}

struct CollectorState {
    config: CollectorConfig,
    classifier: PatternClassifier,
    errors: RingBuffer<ErrorEntry>,
    output: RingBuffer<String>,
    dedupe: DedupeWindow,
    command: Option<String>,
    forwarding: bool,
    /// Errors evicted from the ring front while a forward was in flight.
    evicted_in_flight: usize,
    destroyed: bool,
}

impl CollectorState {
    fn push_error(&mut self, entry: ErrorEntry) {
        if self.errors.push(entry).is_some() && self.forwarding {
            self.evicted_in_flight += 1;
        }
    }

    fn push_output(&mut self, line: String) {
        self.output.push(line);
    }
}

struct CollectorInner<T> {
    project_id: String,
    transport: T,
    state: Mutex<CollectorState>,
    listener: Arc<Listener>,
    debouncer: Debouncer,
    /// Held for the duration of one forward.
    forward_turn: tokio::sync::Mutex<()>,
    channel: WsChannel,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Drop for CollectorInner<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Resets the in-flight flag if a forward is dropped before it finishes.
struct InFlight<'a> {
    state: &'a Mutex<CollectorState>,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            state.forwarding = false;
            state.evicted_in_flight = 0;
        }
    }
}

/// Error collector for one project. Cheap to clone; clones share state.
pub struct ErrorCollector<T: ReportTransport> {
    inner: Arc<CollectorInner<T>>,
}

impl<T: ReportTransport> Clone for ErrorCollector<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ReportTransport> fmt::Debug for ErrorCollector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ErrorCollector")
            .field("project_id", &self.inner.project_id)
            .field("errors", &state.errors.len())
            .field("output", &state.output.len())
            .field("forwarding", &state.forwarding)
            .finish_non_exhaustive()
    }
}

impl<T: ReportTransport> ErrorCollector<T> {
    /// Creates a collector and starts its dedupe sweep task.
    ///
    /// The fix channel is not connected until [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the backend URL cannot be turned into a
    /// WebSocket URL.
    pub fn new(
        project_id: impl Into<String>,
        config: CollectorConfig,
        transport: T,
    ) -> Result<Self, ChannelError> {
        let project_id = project_id.into();
        let url = ws_url(&config.backend_url, &fix_channel_path(&project_id))?;
        let listener = Arc::new(Listener::default());
        let channel = WsChannel::new(
            url,
            config.reconnect.clone(),
            Arc::new(FixHandler {
                project_id: project_id.clone(),
                listener: Arc::clone(&listener),
            }),
        );
        let sweep_interval = config.sweep_interval;
        let state = CollectorState {
            classifier: PatternClassifier::new(config.ignore.clone()),
            errors: RingBuffer::new(config.error_ring_capacity),
            output: RingBuffer::new(config.output_ring_capacity),
            dedupe: DedupeWindow::new(config.dedupe_window),
            command: None,
            forwarding: false,
            evicted_in_flight: 0,
            destroyed: false,
            config,
        };
        let collector = Self {
            inner: Arc::new(CollectorInner {
                project_id,
                transport,
                state: Mutex::new(state),
                listener,
                debouncer: Debouncer::new(),
                forward_turn: tokio::sync::Mutex::new(()),
                channel,
                sweeper: Mutex::new(None),
            }),
        };
        collector.start_sweeper(sweep_interval);
        Ok(collector)
    }

    /// Project this collector belongs to.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    /// Records an error and schedules a debounced forward.
    ///
    /// Returns `false` when the report was dropped as a duplicate or the
    /// collector has been destroyed.
    pub fn report_error(&self, source: ErrorSource, message: &str, opts: ReportOptions) -> bool {
        self.record(source, message, opts, true)
    }

    /// Appends `line` to the output context and reports it if it matches the
    /// pattern table. Returns whether it matched.
    pub fn detect_and_report(&self, line: &str, source: ErrorSource) -> bool {
        let line = line.trim_end();
        if line.is_empty() {
            return false;
        }
        let verdict = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return false;
            }
            state.push_output(line.to_string());
            state.classifier.classify(line)
        };
        match verdict {
            Verdict::Matched(severity) => {
                let opts = ReportOptions {
                    severity: Some(severity),
                    ..ReportOptions::default()
                };
                self.record(source, line, opts, false);
                true
            }
            Verdict::Ignored | Verdict::Unmatched => false,
        }
    }

    /// Records the last known command.
    pub fn set_command(&self, command: impl Into<String>) {
        self.inner.state.lock().command = Some(command.into());
    }

    /// Cancels the pending debounce and forwards immediately.
    ///
    /// If a forward is already in flight this waits for it and then sends
    /// the remainder, so on return every error queued before the call has
    /// been offered to the backend.
    pub async fn forward_now(&self) {
        self.inner.debouncer.cancel();
        self.forward_to_backend().await;
    }

    /// Registers the event listener, replacing any previous one.
    pub fn register_listener(&self, capacity: usize) -> mpsc::Receiver<CollectorEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.inner.listener.tx.lock() = Some(tx);
        rx
    }

    /// Opens the fix-notification channel.
    pub fn connect(&self) {
        if self.inner.state.lock().destroyed {
            return;
        }
        self.inner.channel.connect();
    }

    /// Closes the fix-notification channel.
    pub fn disconnect(&self) {
        self.inner.channel.disconnect();
    }

    /// Fix channel state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.channel.state()
    }

    /// Cancels the debounce timer, stops the sweep task and closes the fix
    /// channel. Later reports are dropped.
    pub fn destroy(&self) {
        self.inner.state.lock().destroyed = true;
        self.inner.debouncer.cancel();
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
        self.inner.channel.disconnect();
        tracing::info!(project_id = %self.inner.project_id, "collector destroyed");
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Current buffers and connection state.
    #[must_use]
    pub fn snapshot(&self) -> CollectorSnapshot {
        let state = self.inner.state.lock();
        CollectorSnapshot {
            project_id: self.inner.project_id.clone(),
            errors: state.errors.to_vec(),
            output: state.output.to_vec(),
            command: state.command.clone(),
            connection: self.inner.channel.state(),
            forwarding: state.forwarding,
        }
    }

    /// Applies new tunables in place.
    ///
    /// Ring capacities, dedupe window, ignore list and debounce apply
    /// immediately. The backend URL and reconnect policy apply on the next
    /// [`connect`](Self::connect); an open channel is not reconnected.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the new backend URL is invalid; nothing is
    /// changed in that case.
    pub fn update_config(&self, config: CollectorConfig) -> Result<(), ChannelError> {
        let url = ws_url(&config.backend_url, &fix_channel_path(&self.inner.project_id))?;
        self.inner.channel.set_url(url);
        self.inner.channel.set_policy(config.reconnect.clone());

        let restart_sweeper = {
            let mut state = self.inner.state.lock();
            let before = state.errors.len();
            state.errors.set_capacity(config.error_ring_capacity);
            if state.forwarding {
                state.evicted_in_flight += before - state.errors.len();
            }
            state.output.set_capacity(config.output_ring_capacity);
            state.dedupe.set_window(config.dedupe_window);
            state.classifier.set_ignore(config.ignore.clone());
            let restart = state.config.sweep_interval != config.sweep_interval;
            state.config = config;
            restart.then_some(state.config.sweep_interval)
        };
        if let Some(interval) = restart_sweeper {
            self.start_sweeper(interval);
        }
        tracing::debug!(project_id = %self.inner.project_id, "collector config updated");
        Ok(())
    }

    fn record(&self, source: ErrorSource, message: &str, opts: ReportOptions, echo: bool) -> bool {
        let entry = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return false;
            }
            let severity = opts
                .severity
                .unwrap_or_else(|| state.classifier.severity(message));
            let error_type = opts
                .error_type
                .unwrap_or_else(|| infer_error_type(source, message).to_string());
            let key = format!(
                "{source}:{error_type}:{}",
                truncate_chars(message, DEDUPE_MESSAGE_CHARS)
            );
            if !state.dedupe.admit(key, Instant::now()) {
                tracing::trace!(project_id = %self.inner.project_id, "duplicate error dropped");
                return false;
            }
            if opts.command.is_some() {
                state.command.clone_from(&opts.command);
            }
            let entry = ErrorEntry {
                source,
                error_type,
                message: message.to_string(),
                file: opts.file,
                line: opts.line,
                column: opts.column,
                stack: opts.stack,
                command: opts.command.or_else(|| state.command.clone()),
                severity,
                timestamp: epoch_millis(),
            };
            if echo {
                state.push_output(format!("[{source}] {message}"));
            }
            state.push_error(entry.clone());
            entry
        };

        tracing::debug!(
            project_id = %self.inner.project_id,
            source = %entry.source,
            error_type = %entry.error_type,
            severity = %entry.severity,
            "error recorded"
        );
        self.inner.listener.emit(CollectorEvent::ErrorDetected(entry));
        self.schedule_forward();
        true
    }

    fn schedule_forward(&self) {
        let delay = self.inner.state.lock().config.debounce;
        let weak: Weak<CollectorInner<T>> = Arc::downgrade(&self.inner);
        self.inner.debouncer.schedule(delay, async move {
            if let Some(inner) = weak.upgrade() {
                Self { inner }.forward_to_backend().await;
            }
        });
    }

    /// POSTs the error ring with the output context and last command.
    ///
    /// Forwards run one at a time. A call made while one is in flight waits
    /// for it, then sends whatever is still queued.
    async fn forward_to_backend(&self) {
        let _turn = self.inner.forward_turn.lock().await;
        let (url, payload, mut guard) = {
            let mut state = self.inner.state.lock();
            if state.errors.is_empty() {
                return;
            }
            state.forwarding = true;
            state.evicted_in_flight = 0;
            let url = format!(
                "{}{}",
                state.config.backend_url.trim_end_matches('/'),
                report_path(&self.inner.project_id)
            );
            let payload = ReportPayload {
                errors: state.errors.to_vec(),
                context: state
                    .output
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join("\n"),
                command: state.command.clone().unwrap_or_default(),
                timestamp: epoch_millis(),
            };
            let guard = InFlight {
                state: &self.inner.state,
                armed: true,
            };
            (url, payload, guard)
        };

        let count = payload.errors.len();
        let result = match serde_json::to_value(&payload) {
            Ok(body) => self.inner.transport.post_json(&url, body).await,
            Err(e) => Err(e.into()),
        };

        let event = {
            let mut state = self.inner.state.lock();
            let evicted = std::mem::take(&mut state.evicted_in_flight);
            state.forwarding = false;
            guard.armed = false;
            match &result {
                Ok(()) => {
                    state.errors.drain_front(count.saturating_sub(evicted));
                    CollectorEvent::Forwarded { count }
                }
                Err(e) => CollectorEvent::ForwardFailed {
                    reason: e.to_string(),
                },
            }
        };

        match &result {
            Ok(()) => tracing::info!(
                project_id = %self.inner.project_id,
                count,
                "errors forwarded"
            ),
            Err(e) => tracing::warn!(
                project_id = %self.inner.project_id,
                count,
                err = %e,
                "error forward failed, keeping errors queued"
            ),
        }
        self.inner.listener.emit(event);
    }

    fn start_sweeper(&self, interval: Duration) {
        let weak: Weak<CollectorInner<T>> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let removed = inner.state.lock().dedupe.sweep(Instant::now());
                if removed > 0 {
                    tracing::trace!(project_id = %inner.project_id, removed, "dedupe keys swept");
                }
            }
        });
        if let Some(previous) = self.inner.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }
}
