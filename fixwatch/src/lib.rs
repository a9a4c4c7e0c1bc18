//! Preview error capture, triage, forwarding and fix-lifecycle
//! tracking.

pub mod agent;
pub mod buffer;
pub mod channel;
pub mod classify;
pub mod collector;
pub mod config;
pub mod debounce;
pub mod retry;
pub mod stream;
pub mod transport;

/// Wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn epoch_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
