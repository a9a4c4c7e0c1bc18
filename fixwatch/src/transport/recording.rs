//! In-memory [`ReportTransport`] that records every POST.
//!
//! Can be switched into a failing mode to exercise retain-on-failure paths,
//! and given an artificial latency to exercise overlapping forwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{ReportTransport, TransportError};

/// One recorded request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPost {
    /// Target URL.
    pub url: String,
    /// JSON body.
    pub body: serde_json::Value,
}

/// Records POSTs instead of sending them. Cloning shares the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    posts: Arc<Mutex<Vec<RecordedPost>>>,
    failing: Arc<AtomicBool>,
    latency: Option<Duration>,
}

impl RecordingTransport {
    /// A transport that accepts everything immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that waits `latency` before answering.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// When `true`, every POST is recorded and then answered with HTTP 503.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All recorded requests, oldest first.
    #[must_use]
    pub fn posts(&self) -> Vec<RecordedPost> {
        self.posts.lock().clone()
    }

    /// Number of recorded requests.
    #[must_use]
    pub fn count(&self) -> usize {
        self.posts.lock().len()
    }
}

impl ReportTransport for RecordingTransport {
    async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<(), TransportError> {
        self.posts.lock().push(RecordedPost {
            url: url.to_string(),
            body,
        });
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Status(503));
        }
        Ok(())
    }
}
