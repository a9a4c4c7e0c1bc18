//! `reqwest`-backed [`ReportTransport`].

use super::{ReportTransport, TransportError};

/// JSON POST over HTTP(S).
///
/// No request timeout is configured; the platform default applies.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a fresh connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuses an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ReportTransport for HttpTransport {
    async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<(), TransportError> {
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            tracing::debug!(url, status = status.as_u16(), "report POST rejected");
            Err(TransportError::Status(status.as_u16()))
        }
    }
}
