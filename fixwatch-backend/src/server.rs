//! Backend server core: shared state, REST intake handlers, and the
//! fix-notification and log-stream WebSocket feeds.
//!
//! Every WebSocket connection is registered under its project id and feed.
//! Publishing fans a frame out to every connection registered for that
//! project and feed. Inbound frames from clients are ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fixwatch_proto::entry::{AgentBatch, BROWSER_REPORT_PATH, ReportPayload};
use fixwatch_proto::fix::FixNotification;
use fixwatch_proto::stream::LogFrame;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

/// The two push feeds a project can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    /// `/errors/ws/{project_id}`
    Fix,
    /// `/log-stream/stream/{project_id}`
    LogStream,
}

type Connections = HashMap<(Feed, String), Vec<(u64, mpsc::UnboundedSender<Message>)>>;

/// Shared backend state.
#[derive(Default)]
pub struct BackendState {
    connections: RwLock<Connections>,
    next_connection_id: AtomicU64,
    reports: RwLock<HashMap<String, Vec<ReportPayload>>>,
    browser_batches: RwLock<Vec<AgentBatch>>,
    fail_reports: AtomicBool,
}

impl BackendState {
    /// Creates empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When `true`, the report endpoint answers 503 and stores nothing.
    pub fn set_fail_reports(&self, fail: bool) {
        self.fail_reports.store(fail, Ordering::SeqCst);
    }

    /// Reports received for `project_id`, oldest first.
    pub async fn reports(&self, project_id: &str) -> Vec<ReportPayload> {
        self.reports
            .read()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Agent batches received, oldest first.
    pub async fn browser_batches(&self) -> Vec<AgentBatch> {
        self.browser_batches.read().await.clone()
    }

    /// Number of open connections on `feed` for `project_id`.
    pub async fn subscribers(&self, feed: Feed, project_id: &str) -> usize {
        self.connections
            .read()
            .await
            .get(&(feed, project_id.to_string()))
            .map_or(0, Vec::len)
    }

    /// Pushes a fix notification to every fix-channel subscriber of
    /// `project_id`. Returns how many connections it was queued for.
    pub async fn publish_fix(&self, project_id: &str, notification: &FixNotification) -> usize {
        match notification.encode() {
            Ok(text) => self.publish(Feed::Fix, project_id, &text).await,
            Err(e) => {
                tracing::error!(
                    project_id = %project_id,
                    error = %e,
                    "failed to encode fix notification"
                );
                0
            }
        }
    }

    /// Pushes log output to every log-stream subscriber of `project_id`,
    /// wrapped in a JSON log frame or as raw text.
    pub async fn publish_log(&self, project_id: &str, content: &str, as_json: bool) -> usize {
        let text = if as_json {
            LogFrame::log(content).to_json()
        } else {
            content.to_string()
        };
        self.publish(Feed::LogStream, project_id, &text).await
    }

    /// Send a WebSocket Close frame to every connection.
    ///
    /// Clients see a server-side close and start reconnecting.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for ((feed, project_id), senders) in conns.iter() {
            tracing::info!(
                project_id = %project_id,
                ?feed,
                count = senders.len(),
                "closing connections"
            );
            for (_, sender) in senders {
                let _ = sender.send(Message::Close(None));
            }
        }
    }

    async fn publish(&self, feed: Feed, project_id: &str, text: &str) -> usize {
        let conns = self.connections.read().await;
        let Some(senders) = conns.get(&(feed, project_id.to_string())) else {
            tracing::debug!(project_id = %project_id, ?feed, "no subscribers");
            return 0;
        };
        senders
            .iter()
            .filter(|(_, sender)| sender.send(Message::Text(text.to_string().into())).is_ok())
            .count()
    }

    async fn register(
        &self,
        feed: Feed,
        project_id: &str,
        sender: mpsc::UnboundedSender<Message>,
    ) -> u64 {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .write()
            .await
            .entry((feed, project_id.to_string()))
            .or_default()
            .push((id, sender));
        id
    }

    async fn unregister(&self, feed: Feed, project_id: &str, id: u64) {
        let mut conns = self.connections.write().await;
        let key = (feed, project_id.to_string());
        if let Some(senders) = conns.get_mut(&key) {
            senders.retain(|(conn_id, _)| *conn_id != id);
            if senders.is_empty() {
                conns.remove(&key);
            }
        }
    }
}

/// Serves one upgraded feed connection until either side closes.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<BackendState>,
    feed: Feed,
    project_id: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let id = state.register(feed, &project_id, tx).await;
    tracing::info!(project_id = %project_id, ?feed, "subscriber connected");

    let writer_project = project_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(project_id = %writer_project, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(feed, &project_id, id).await;
    tracing::info!(project_id = %project_id, ?feed, "subscriber disconnected");
}

async fn report_handler(
    Path(project_id): Path<String>,
    State(state): State<Arc<BackendState>>,
    Json(payload): Json<ReportPayload>,
) -> Response {
    if state.fail_reports.load(Ordering::SeqCst) {
        tracing::warn!(project_id = %project_id, "rejecting report (failure mode)");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable" })),
        )
            .into_response();
    }
    let count = payload.errors.len();
    tracing::info!(project_id = %project_id, count, command = %payload.command, "report received");
    state
        .reports
        .write()
        .await
        .entry(project_id)
        .or_default()
        .push(payload);
    Json(serde_json::json!({ "status": "received", "count": count })).into_response()
}

async fn browser_handler(
    State(state): State<Arc<BackendState>>,
    Json(batch): Json<AgentBatch>,
) -> StatusCode {
    tracing::info!(
        project_id = %batch.project_id,
        count = batch.errors.len(),
        "browser batch received"
    );
    state.browser_batches.write().await.push(batch);
    StatusCode::NO_CONTENT
}

async fn fix_ws_handler(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    State(state): State<Arc<BackendState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Feed::Fix, project_id))
}

async fn log_ws_handler(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    State(state): State<Arc<BackendState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Feed::LogStream, project_id))
}

/// Builds the router.
pub fn router(state: Arc<BackendState>) -> axum::Router {
    axum::Router::new()
        .route("/errors/report/{project_id}", axum::routing::post(report_handler))
        .route(BROWSER_REPORT_PATH, axum::routing::post(browser_handler))
        .route("/errors/ws/{project_id}", axum::routing::get(fix_ws_handler))
        .route("/log-stream/stream/{project_id}", axum::routing::get(log_ws_handler))
        .with_state(state)
}

/// Starts the backend on the given address with fresh state.
///
/// Returns the bound address (useful when binding to port 0) and a join
/// handle for the server task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(BackendState::new())).await
}

/// Starts the backend with caller-owned [`BackendState`], so tests can
/// publish into it and inspect what was received.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<BackendState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "backend server error");
        }
    });

    Ok((bound_addr, handle))
}
