// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the collector's fix-notification channel.
//!
//! Verification command: `cargo test --test fix_notifications`

use std::sync::Arc;
use std::time::Duration;

use fixwatch::channel::ConnectionState;
use fixwatch::collector::{CollectorConfig, CollectorEvent, CollectorRegistry, ErrorCollector};
use fixwatch::retry::RetryPolicy;
use fixwatch::transport::http::HttpTransport;
use fixwatch_backend::server::{BackendState, Feed, start_server_with_state};
use fixwatch_proto::fix::FixNotification;
use tokio::sync::mpsc;

// =============================================================================
// Test helpers
// =============================================================================

async fn start_backend() -> (String, Arc<BackendState>) {
    let state = Arc::new(BackendState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("start backend");
    (format!("http://{addr}"), state)
}

fn config(url: &str) -> CollectorConfig {
    CollectorConfig {
        backend_url: url.to_string(),
        reconnect: RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            multiplier: 2,
        },
        ..CollectorConfig::default()
    }
}

async fn wait_for_subscribers(backend: &BackendState, project_id: &str, n: usize) {
    for _ in 0..500 {
        if backend.subscribers(Feed::Fix, project_id).await == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} fix subscribers for {project_id}");
}

/// Next fix notification, skipping connection-state events.
async fn next_fix(events: &mut mpsc::Receiver<CollectorEvent>) -> FixNotification {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for fix notification")
            .expect("listener closed");
        if let CollectorEvent::Fix(notification) = event {
            return notification;
        }
    }
}

/// Next connection-state change.
async fn next_state(events: &mut mpsc::Receiver<CollectorEvent>) -> ConnectionState {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for state change")
            .expect("listener closed");
        if let CollectorEvent::Connection(state) = event {
            return state;
        }
    }
}

async fn connected(
    url: &str,
    backend: &BackendState,
    project_id: &str,
) -> (
    CollectorRegistry<HttpTransport>,
    ErrorCollector<HttpTransport>,
    mpsc::Receiver<CollectorEvent>,
) {
    let registry = CollectorRegistry::new(HttpTransport::new());
    let collector = registry.acquire(project_id, config(url)).unwrap();
    let mut events = collector.register_listener(64);
    collector.connect();
    while next_state(&mut events).await != ConnectionState::Connected {}
    wait_for_subscribers(backend, project_id, 1).await;
    (registry, collector, events)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn fix_lifecycle_notifications_are_delivered() {
    let (url, backend) = start_backend().await;
    let (_registry, collector, mut events) = connected(&url, &backend, "p1").await;
    assert_eq!(collector.connection_state(), ConnectionState::Connected);

    backend
        .publish_fix(
            "p1",
            &FixNotification::FixStarted {
                reason: Some("2 build errors".to_string()),
            },
        )
        .await;
    backend
        .publish_fix(
            "p1",
            &FixNotification::FixCompleted {
                patches_applied: Some(2),
                files_modified: vec!["src/App.tsx".to_string()],
            },
        )
        .await;

    assert_eq!(
        next_fix(&mut events).await,
        FixNotification::FixStarted {
            reason: Some("2 build errors".to_string())
        }
    );
    assert_eq!(
        next_fix(&mut events).await,
        FixNotification::FixCompleted {
            patches_applied: Some(2),
            files_modified: vec!["src/App.tsx".to_string()],
        }
    );
}

#[tokio::test]
async fn reconnects_after_server_close() {
    let (url, backend) = start_backend().await;
    let (_registry, collector, mut events) = connected(&url, &backend, "p1").await;

    backend.close_all_connections().await;
    assert_eq!(next_state(&mut events).await, ConnectionState::Disconnected);
    assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
    assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
    wait_for_subscribers(&backend, "p1", 1).await;
    assert_eq!(collector.connection_state(), ConnectionState::Connected);

    backend
        .publish_fix(
            "p1",
            &FixNotification::FixFailed {
                error: Some("patch did not apply".to_string()),
            },
        )
        .await;
    assert_eq!(
        next_fix(&mut events).await,
        FixNotification::FixFailed {
            error: Some("patch did not apply".to_string())
        }
    );
}

#[tokio::test]
async fn reacquire_does_not_open_second_connection() {
    let (url, backend) = start_backend().await;
    let (registry, _collector, _events) = connected(&url, &backend, "p1").await;

    let again = registry.acquire("p1", config(&url)).unwrap();
    again.connect();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.subscribers(Feed::Fix, "p1").await, 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn destroy_closes_channel() {
    let (url, backend) = start_backend().await;
    let (registry, collector, _events) = connected(&url, &backend, "p1").await;

    assert!(registry.destroy("p1"));
    wait_for_subscribers(&backend, "p1", 0).await;
    assert_eq!(collector.connection_state(), ConnectionState::Disconnected);

    // Connecting a destroyed collector is a no-op.
    collector.connect();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.subscribers(Feed::Fix, "p1").await, 0);
}
