// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the log stream consumer against the reference
//! backend's `/log-stream/stream/{id}` feed.
//!
//! Verification command: `cargo test --test log_stream`

use std::sync::Arc;
use std::time::Duration;

use fixwatch::stream::{LifecycleEvent, LineKind, LogStreamConsumer, StreamConfig};
use fixwatch_backend::server::{BackendState, Feed, start_server_with_state};
use fixwatch_proto::fix::{ExecutionState, FixStatus};
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

async fn connected_consumer(url: &str, backend: &BackendState) -> LogStreamConsumer {
    let consumer = LogStreamConsumer::new(
        "p1",
        &StreamConfig {
            backend_url: url.to_string(),
            ..StreamConfig::default()
        },
    )
    .unwrap();
    consumer.connect();
    for _ in 0..500 {
        if backend.subscribers(Feed::LogStream, "p1").await == 1 {
            return consumer;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("log stream consumer never subscribed");
}

async fn next_event(events: &mut mpsc::Receiver<LifecycleEvent>) -> LifecycleEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for lifecycle event")
        .expect("subscriber closed")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn fix_markers_drive_status_and_are_hidden() {
    let (url, backend) = start_backend().await;
    let consumer = connected_consumer(&url, &backend).await;
    let mut events = consumer.subscribe(16);

    backend.publish_log("p1", "__FIX_STARTING__", false).await;
    assert_eq!(next_event(&mut events).await, LifecycleEvent::FixStarted { attempt: 1 });
    assert_eq!(consumer.state().fix_status, FixStatus::Fixing);

    backend.publish_log("p1", "building...", true).await;
    backend.publish_log("p1", "__FIX_SUCCESS__", true).await;
    assert_eq!(next_event(&mut events).await, LifecycleEvent::FixCompleted);
    assert_eq!(consumer.state().fix_status, FixStatus::Success);
    assert_eq!(consumer.state().execution_state, ExecutionState::Fixed);

    let texts: Vec<_> = consumer.logs().into_iter().map(|l| l.text).collect();
    assert_eq!(texts, vec!["building...".to_string()]);
}

#[tokio::test]
async fn third_failure_is_exhausted() {
    let (url, backend) = start_backend().await;
    let consumer = connected_consumer(&url, &backend).await;
    let mut events = consumer.subscribe(16);

    backend
        .publish_log("p1", "__FIX_STARTING__\n__FIX_STARTING__\n__FIX_STARTING__", true)
        .await;
    for attempt in 1..=3 {
        assert_eq!(next_event(&mut events).await, LifecycleEvent::FixStarted { attempt });
    }

    backend.publish_log("p1", "__FIX_FAILED__:timeout", false).await;
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::FixFailed {
            reason: "timeout".to_string(),
            exhausted: true
        }
    );
    assert_eq!(consumer.state().execution_state, ExecutionState::Exhausted);
    assert_eq!(consumer.state().fix_status, FixStatus::Failed);
}

#[tokio::test]
async fn preview_ready_and_mixed_output() {
    let (url, backend) = start_backend().await;
    let consumer = connected_consumer(&url, &backend).await;
    let mut events = consumer.subscribe(16);
    consumer.begin_execution();

    backend.publish_log("p1", "npm ERR! missing script: dev\r\n", false).await;
    backend.publish_log("p1", "🔧 Applying fix to package.json", true).await;
    backend.publish_log("p1", "  VITE v5.0.0  ready in 300 ms", true).await;
    backend
        .publish_log("p1", "__PREVIEW_READY__:http://localhost:5173", true)
        .await;

    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ServerStarted {
            url: "http://localhost:5173".to_string()
        }
    );
    let state = consumer.state();
    assert!(state.server_started);
    assert_eq!(state.preview_url.as_deref(), Some("http://localhost:5173"));
    assert_eq!(state.execution_state, ExecutionState::Success);

    let kinds: Vec<_> = consumer.logs().into_iter().map(|l| l.kind).collect();
    assert_eq!(kinds, vec![LineKind::Stderr, LineKind::Fix, LineKind::System]);
    assert_eq!(consumer.logs()[0].text, "npm ERR! missing script: dev");
}

#[tokio::test]
async fn reset_keeps_connection() {
    let (url, backend) = start_backend().await;
    let consumer = connected_consumer(&url, &backend).await;
    let mut events = consumer.subscribe(16);

    backend.publish_log("p1", "hello\n__FIX_STARTING__", false).await;
    next_event(&mut events).await;
    consumer.reset();
    assert!(consumer.logs().is_empty());
    assert_eq!(consumer.state().fix_attempt, 0);

    backend.publish_log("p1", "__FIX_STARTING__", false).await;
    assert_eq!(next_event(&mut events).await, LifecycleEvent::FixStarted { attempt: 1 });
    assert_eq!(backend.subscribers(Feed::LogStream, "p1").await, 1);

    consumer.disconnect();
    for _ in 0..500 {
        if backend.subscribers(Feed::LogStream, "p1").await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("disconnect did not close the socket");
}
