//! Supervised inbound WebSocket client.
//!
//! [`WsChannel`] connects to a backend WebSocket, hands every text frame to
//! a [`ChannelHandler`], and reconnects on close using a shared
//! [`RetryPolicy`]. After `max_attempts` consecutive failures it stops and
//! stays [`ConnectionState::Disconnected`] until [`WsChannel::connect`] is
//! called again. A fresh connection starts from the current state; nothing
//! is replayed.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::retry::RetryPolicy;

/// Timeout for a single WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors building a channel endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The backend base URL could not be parsed.
    #[error("invalid backend URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The base URL uses a scheme that has no WebSocket equivalent.
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

/// Connection state of one WebSocket client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket and no reconnect in progress.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Receives frames and state changes from a [`WsChannel`].
pub trait ChannelHandler: Send + Sync + 'static {
    /// Called for every text frame (and every UTF-8 binary frame).
    fn on_frame(&self, text: &str);

    /// Called whenever the connection state changes.
    fn on_state(&self, _state: ConnectionState) {}
}

/// Builds a `ws://`/`wss://` URL for `path` from an `http(s)://` or
/// `ws(s)://` base URL.
///
/// # Errors
///
/// Returns [`ChannelError`] when the base URL is malformed or its scheme is
/// not HTTP or WebSocket.
pub fn ws_url(base: &str, path: &str) -> Result<String, ChannelError> {
    let mut url = url::Url::parse(base)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ChannelError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|()| ChannelError::UnsupportedScheme(scheme.to_string()))?;
    url.set_path(path);
    Ok(url.to_string())
}

/// State shared between the channel handle and its supervisor task.
struct Shared {
    state: Mutex<ConnectionState>,
    /// Bumped by every `connect` and `disconnect`. A supervisor only
    /// publishes while its generation is current.
    generation: AtomicU64,
    attempts: AtomicU32,
    handler: Arc<dyn ChannelHandler>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn set_state(&self, generation: u64, state: ConnectionState) {
        let changed = {
            let mut current = self.state.lock();
            if !self.is_current(generation) {
                return;
            }
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            self.handler.on_state(state);
        }
    }

    fn deliver(&self, generation: u64, text: &str) {
        if self.is_current(generation) {
            self.handler.on_frame(text);
        }
    }
}

/// A reconnecting WebSocket client.
pub struct WsChannel {
    url: Mutex<String>,
    policy: Mutex<RetryPolicy>,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WsChannel {
    /// Creates a disconnected channel for `url`.
    pub fn new(
        url: impl Into<String>,
        policy: RetryPolicy,
        handler: Arc<dyn ChannelHandler>,
    ) -> Self {
        Self {
            url: Mutex::new(url.into()),
            policy: Mutex::new(policy),
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
                attempts: AtomicU32::new(0),
                handler,
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Starts the supervisor if it is not already running.
    ///
    /// Calling this after the channel gave up resets the attempt counter.
    pub fn connect(&self) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.shared.attempts.store(0, Ordering::SeqCst);
        let url = self.url.lock().clone();
        let policy = self.policy.lock().clone();
        let generation = self.shared.next_generation();
        let task = supervise(url, policy, Arc::clone(&self.shared), generation);
        *supervisor = Some(tokio::spawn(task));
    }

    /// Closes the socket and cancels any pending reconnect.
    pub fn disconnect(&self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
        let generation = self.shared.next_generation();
        self.shared.set_state(generation, ConnectionState::Disconnected);
    }

    /// Replaces the retry policy; takes effect on the next `connect`.
    pub fn set_policy(&self, policy: RetryPolicy) {
        *self.policy.lock() = policy;
    }

    /// Replaces the target URL; takes effect on the next `connect`.
    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.lock() = url.into();
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Reconnect attempts made since the last successful connection.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Whether the supervisor is still connecting, connected, or waiting to
    /// reconnect.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.supervisor
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> String {
        self.url.lock().clone()
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.get_mut().take() {
            handle.abort();
        }
    }
}

/// Connect, read until close, back off, repeat until the policy gives up.
async fn supervise(url: String, policy: RetryPolicy, shared: Arc<Shared>, generation: u64) {
    loop {
        shared.set_state(generation, ConnectionState::Connecting);
        match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
            Ok(Ok((ws_stream, _response))) => {
                shared.attempts.store(0, Ordering::SeqCst);
                shared.set_state(generation, ConnectionState::Connected);
                tracing::info!(url = %url, "websocket connected");
                read_loop(ws_stream, &shared, generation).await;
            }
            Ok(Err(e)) => {
                tracing::warn!(url = %url, err = %e, "websocket connect failed");
            }
            Err(_) => {
                tracing::warn!(url = %url, "websocket connect timed out");
            }
        }
        shared.set_state(generation, ConnectionState::Disconnected);

        let attempt = shared.attempts.load(Ordering::SeqCst);
        if !policy.should_retry(attempt) {
            tracing::warn!(
                url = %url,
                attempts = attempt,
                "websocket reconnect attempts exhausted, giving up"
            );
            break;
        }
        let delay = policy.delay_for(attempt);
        shared.attempts.store(attempt + 1, Ordering::SeqCst);
        tracing::info!(
            url = %url,
            attempt = attempt + 1,
            max_attempts = policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "websocket reconnect scheduled"
        );
        tokio::time::sleep(delay).await;
    }
}

async fn read_loop<S>(mut ws_stream: S, shared: &Shared, generation: u64)
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = ws_stream.next().await {
        match msg {
            Ok(Message::Text(text)) => shared.deliver(generation, text.as_str()),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => shared.deliver(generation, text),
                Err(_) => tracing::debug!(len = data.len(), "skipping non-UTF-8 binary frame"),
            },
            Ok(Message::Close(_)) => {
                tracing::info!("websocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "websocket read error");
                break;
            }
        }
    }
}
