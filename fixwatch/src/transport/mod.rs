//! Outbound REST transport used to deliver error batches.
//!
//! Defines the [`ReportTransport`] trait shared by the capture agent and the
//! error collector. Implementations:
//! - [`http::HttpTransport`]: `reqwest` JSON POST
//! - [`recording::RecordingTransport`]: in-memory double for tests

pub mod http;
pub mod recording;

use std::future::Future;

/// Errors raised while delivering a batch.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The backend answered with a non-2xx status.
    #[error("backend returned HTTP {0}")]
    Status(u16),

    /// The request never produced a response (DNS, connect, reset).
    #[error("request failed: {0}")]
    Request(String),

    /// The body could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Async JSON POST.
///
/// Any 2xx response is success. Implementations must not retry on their
/// own; retry policy belongs to the caller.
pub trait ReportTransport: Send + Sync + 'static {
    /// POST `body` as JSON to `url`.
    fn post_json(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
