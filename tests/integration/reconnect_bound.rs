// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the bounded WebSocket reconnect policy.
//!
//! A listener that accepts and immediately drops every TCP connection makes
//! each handshake fail. The channel must make one initial attempt plus
//! `max_attempts` reconnects, then stop.
//!
//! Verification command: `cargo test --test reconnect_bound`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fixwatch::channel::{ChannelHandler, ConnectionState, WsChannel};
use fixwatch::retry::RetryPolicy;
use fixwatch::stream::{LogStreamConsumer, StreamConfig};

// =============================================================================
// Test helpers
// =============================================================================

/// Accepts TCP connections and drops them at once, counting accepts.
async fn refusing_listener() -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepts);
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    (format!("http://{addr}"), accepts, handle)
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(10),
        multiplier: 2,
    }
}

struct Ignore;

impl ChannelHandler for Ignore {
    fn on_frame(&self, _text: &str) {}
}

async fn wait_inactive(is_active: impl Fn() -> bool) {
    for _ in 0..500 {
        if !is_active() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("channel still active after 5s");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let (url, accepts, _listener) = refusing_listener().await;
    let consumer = LogStreamConsumer::new(
        "p1",
        &StreamConfig {
            backend_url: url,
            reconnect: fast_policy(),
            ..StreamConfig::default()
        },
    )
    .unwrap();

    consumer.connect();
    wait_inactive(|| consumer.is_active()).await;

    assert_eq!(accepts.load(Ordering::SeqCst), 6);
    assert_eq!(consumer.reconnect_attempts(), 5);
    assert_eq!(consumer.connection_state(), ConnectionState::Disconnected);

    // No further reconnect is scheduled.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn explicit_connect_restarts_after_giving_up() {
    let (url, accepts, _listener) = refusing_listener().await;
    let channel = WsChannel::new(
        fixwatch::channel::ws_url(&url, "/errors/ws/p1").unwrap(),
        RetryPolicy {
            max_attempts: 2,
            ..fast_policy()
        },
        Arc::new(Ignore),
    );

    channel.connect();
    wait_inactive(|| channel.is_active()).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 3);

    channel.connect();
    wait_inactive(|| channel.is_active()).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn disconnect_cancels_pending_reconnect() {
    let (url, accepts, _listener) = refusing_listener().await;
    let channel = WsChannel::new(
        fixwatch::channel::ws_url(&url, "/errors/ws/p1").unwrap(),
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(300),
            multiplier: 2,
        },
        Arc::new(Ignore),
    );

    channel.connect();
    for _ in 0..100 {
        if accepts.load(Ordering::SeqCst) >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    channel.disconnect();
    assert!(!channel.is_active());

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}
