//! Log stream consumer.
//!
//! Subscribes to the execution container's output over
//! `/log-stream/stream/{id}`, splits each frame into lines, routes marker
//! lines into the [`FixLifecycle`] and every other line into a capped display
//! ring. Lifecycle notifications go to any number of subscribers.

pub mod display;
pub mod lifecycle;

use std::sync::Arc;

use fixwatch_proto::entry::log_stream_path;
use fixwatch_proto::stream::{StreamLine, decode_frame, parse_line};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::buffer::RingBuffer;
use crate::channel::{ChannelError, ChannelHandler, ConnectionState, WsChannel, ws_url};
use crate::epoch_millis;
use crate::retry::RetryPolicy;

pub use display::{LineKind, classify_line};
pub use lifecycle::{FixLifecycle, LifecycleEvent};

/// Consumer tunables.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Backend base URL; the log-stream path is appended.
    pub backend_url: String,
    /// Display ring capacity.
    pub max_log_lines: usize,
    /// Attempts after which a failed fix is shown as exhausted.
    pub max_fix_attempts: u32,
    pub reconnect: RetryPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".to_string(),
            max_log_lines: 500,
            max_fix_attempts: 3,
            reconnect: RetryPolicy::default(),
        }
    }
}

/// One displayed log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayLine {
    pub kind: LineKind,
    pub text: String,
    pub timestamp_ms: u64,
}

struct ConsumerState {
    logs: RingBuffer<DisplayLine>,
    lifecycle: FixLifecycle,
}

/// State shared with the channel handler.
struct Core {
    project_id: String,
    state: Mutex<ConsumerState>,
    subscribers: Mutex<Vec<mpsc::Sender<LifecycleEvent>>>,
    line_subscribers: Mutex<Vec<mpsc::Sender<DisplayLine>>>,
}

impl Core {
    fn ingest_frame(&self, frame: &str) {
        for line in decode_frame(frame) {
            self.ingest_line(line);
        }
    }

    fn ingest_line(&self, line: String) {
        let event = match parse_line(&line) {
            StreamLine::Log(text) => {
                self.push(classify_line(&text), text);
                return;
            }
            StreamLine::Control(control) => {
                if control.is_displayed() {
                    self.push(LineKind::Stderr, line);
                }
                self.state.lock().lifecycle.apply(control)
            }
        };
        if let Some(event) = event {
            tracing::info!(project_id = %self.project_id, ?event, "fix lifecycle");
            fan_out(&self.subscribers, &event);
        }
    }

    fn push(&self, kind: LineKind, text: String) {
        let line = DisplayLine {
            kind,
            text,
            timestamp_ms: epoch_millis(),
        };
        fan_out(&self.line_subscribers, &line);
        self.state.lock().logs.push(line);
    }
}

/// Sends `item` to every live subscriber, pruning closed ones. A full
/// subscriber misses the item.
fn fan_out<T: Clone>(subscribers: &Mutex<Vec<mpsc::Sender<T>>>, item: &T) {
    subscribers.lock().retain(|tx| match tx.try_send(item.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::debug!("stream subscriber full, dropping item");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

struct StreamHandler(Arc<Core>);

impl ChannelHandler for StreamHandler {
    fn on_frame(&self, text: &str) {
        self.0.ingest_frame(text);
    }

    fn on_state(&self, state: ConnectionState) {
        tracing::debug!(project_id = %self.0.project_id, %state, "log stream state");
    }
}

/// Consumer of one project's log stream.
pub struct LogStreamConsumer {
    core: Arc<Core>,
    channel: WsChannel,
}

impl LogStreamConsumer {
    /// Creates a disconnected consumer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the backend URL is invalid.
    pub fn new(project_id: impl Into<String>, config: &StreamConfig) -> Result<Self, ChannelError> {
        let project_id = project_id.into();
        let url = ws_url(&config.backend_url, &log_stream_path(&project_id))?;
        let core = Arc::new(Core {
            project_id,
            state: Mutex::new(ConsumerState {
                logs: RingBuffer::new(config.max_log_lines),
                lifecycle: FixLifecycle::new(config.max_fix_attempts),
            }),
            subscribers: Mutex::new(Vec::new()),
            line_subscribers: Mutex::new(Vec::new()),
        });
        let channel = WsChannel::new(
            url,
            config.reconnect.clone(),
            Arc::new(StreamHandler(Arc::clone(&core))),
        );
        Ok(Self { core, channel })
    }

    /// Feeds one raw or JSON frame through the consumer.
    pub fn ingest_frame(&self, frame: &str) {
        self.core.ingest_frame(frame);
    }

    /// Displayed lines, oldest first.
    #[must_use]
    pub fn logs(&self) -> Vec<DisplayLine> {
        self.core.state.lock().logs.to_vec()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FixLifecycle {
        self.core.state.lock().lifecycle.clone()
    }

    /// Marks a new execution as running.
    pub fn begin_execution(&self) {
        self.core.state.lock().lifecycle.begin_execution();
    }

    /// Clears the display ring only.
    pub fn clear_logs(&self) {
        self.core.state.lock().logs.clear();
    }

    /// Clears logs and fix counters. The connection is left as it is.
    pub fn reset(&self) {
        let mut state = self.core.state.lock();
        state.logs.clear();
        state.lifecycle.reset();
    }

    /// Receives lifecycle notifications from now on.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<LifecycleEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.core.subscribers.lock().push(tx);
        rx
    }

    /// Receives every displayed line from now on.
    pub fn subscribe_lines(&self, capacity: usize) -> mpsc::Receiver<DisplayLine> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.core.line_subscribers.lock().push(tx);
        rx
    }

    pub fn connect(&self) {
        self.channel.connect();
    }

    /// Closes the socket and cancels any pending reconnect.
    pub fn disconnect(&self) {
        self.channel.disconnect();
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// Reconnect attempts since the last successful connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.channel.attempts()
    }

    /// Whether the channel is connected or still trying to be.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.channel.is_active()
    }
}
