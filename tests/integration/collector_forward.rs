// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for error forwarding over REST.
//!
//! Runs the reference backend in-process and drives a collector and a
//! capture agent against it through the real HTTP transport.
//!
//! Verification command: `cargo test --test collector_forward`

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fixwatch::agent::{AgentConfig, CaptureAgent, CaptureOutcome};
use fixwatch::classify::IgnoreList;
use fixwatch::collector::{CollectorConfig, CollectorEvent, CollectorRegistry, ReportOptions};
use fixwatch::transport::http::HttpTransport;
use fixwatch_backend::server::{BackendState, start_server_with_state};
use fixwatch_proto::entry::{ErrorSource, Severity};

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

fn collector_config(backend_url: &str) -> CollectorConfig {
    CollectorConfig {
        backend_url: backend_url.to_string(),
        debounce: Duration::from_millis(50),
        ..CollectorConfig::default()
    }
}

/// Polls `check` every 10 ms for up to 5 s.
async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

// =============================================================================
// Collector
// =============================================================================

#[tokio::test]
async fn debounced_burst_arrives_as_one_report() {
    let (url, backend) = start_backend().await;
    let registry = CollectorRegistry::new(HttpTransport::new());
    let collector = registry.acquire("p1", collector_config(&url)).unwrap();

    collector.set_command("npm run build");
    collector.detect_and_report("> vite build", ErrorSource::Build);
    for i in 0..12 {
        collector.report_error(
            ErrorSource::Build,
            &format!("error TS2304: Cannot find name 'x{i}'"),
            ReportOptions {
                file: Some("src/App.tsx".to_string()),
                line: Some(i + 1),
                ..ReportOptions::default()
            },
        );
    }
    assert_eq!(collector.snapshot().errors.len(), 12);

    wait_until(|| {
        let backend = Arc::clone(&backend);
        async move { !backend.reports("p1").await.is_empty() }
    })
    .await;
    // Give a stray second forward the chance to show up.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let reports = backend.reports("p1").await;
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.errors.len(), 12);
    assert_eq!(report.command, "npm run build");
    assert!(report.context.starts_with("> vite build\n[build] error TS2304"));
    assert_eq!(report.errors[0].file.as_deref(), Some("src/App.tsx"));
    assert_eq!(report.errors[0].severity, Severity::Error);
    assert!(collector.snapshot().errors.is_empty());

    registry.destroy_all();
}

#[tokio::test]
async fn failed_forward_retains_then_delivers() {
    let (url, backend) = start_backend().await;
    let registry = CollectorRegistry::new(HttpTransport::new());
    let collector = registry.acquire("p1", collector_config(&url)).unwrap();
    let mut events = collector.register_listener(32);

    backend.set_fail_reports(true);
    assert!(collector.detect_and_report(
        "Error: Cannot find module 'react-dom/client'",
        ErrorSource::Build
    ));
    collector.forward_now().await;
    assert_eq!(collector.snapshot().errors.len(), 1);
    assert!(backend.reports("p1").await.is_empty());

    backend.set_fail_reports(false);
    collector.forward_now().await;
    assert!(collector.snapshot().errors.is_empty());
    let reports = backend.reports("p1").await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].errors[0].error_type, "module_error");

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen[0], CollectorEvent::ErrorDetected(_)));
    assert!(matches!(
        &seen[1],
        CollectorEvent::ForwardFailed { reason } if reason.contains("503")
    ));
    assert_eq!(seen[2], CollectorEvent::Forwarded { count: 1 });
}

#[tokio::test]
async fn collectors_are_isolated_per_project() {
    let (url, backend) = start_backend().await;
    let registry = CollectorRegistry::new(HttpTransport::new());
    let a = registry.acquire("alpha", collector_config(&url)).unwrap();
    let b = registry.acquire("beta", collector_config(&url)).unwrap();

    a.report_error(
        ErrorSource::Docker,
        "Error: listen EADDRINUSE :::3000",
        ReportOptions::default(),
    );
    b.report_error(ErrorSource::Network, "GET /api 500", ReportOptions::default());
    a.forward_now().await;
    b.forward_now().await;

    let alpha = backend.reports("alpha").await;
    let beta = backend.reports("beta").await;
    assert_eq!(alpha.len(), 1);
    assert_eq!(beta.len(), 1);
    assert_eq!(alpha[0].errors[0].error_type, "port_error");
    assert_eq!(beta[0].errors[0].error_type, "server_error");
}

// =============================================================================
// Capture agent
// =============================================================================

#[tokio::test]
async fn agent_batch_reaches_browser_endpoint() {
    let (url, backend) = start_backend().await;
    let agent = CaptureAgent::new(
        AgentConfig {
            endpoint: format!("{url}/errors/browser"),
            project_id: "p1".to_string(),
            page_url: "http://localhost:5173/".to_string(),
            ..AgentConfig::default()
        },
        HttpTransport::new(),
    );

    assert_eq!(
        agent.on_uncaught_error(
            "TypeError: Cannot read properties of undefined (reading 'map')",
            None,
            None,
            None,
            Some("TypeError: x\n    at List (http://localhost:5173/src/List.tsx?t=1:12:7)"),
        ),
        CaptureOutcome::Queued
    );
    agent.flush().await;

    let batches = backend.browser_batches().await;
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.project_id, "p1");
    assert_eq!(batch.source, "browser");
    assert_eq!(batch.url, "http://localhost:5173/");
    assert_eq!(batch.errors[0].file.as_deref(), Some("/src/List.tsx"));
    assert_eq!(batch.errors[0].line, Some(12));
    assert_eq!(batch.errors[0].category, "type_error");
}

#[tokio::test]
async fn agent_ignore_pattern_makes_no_request() {
    let (url, backend) = start_backend().await;
    let agent = CaptureAgent::new(
        AgentConfig {
            endpoint: format!("{url}/errors/browser"),
            ignore: IgnoreList::from_patterns(&["ResizeObserver loop"]).unwrap(),
            debounce: Duration::from_millis(20),
            ..AgentConfig::default()
        },
        HttpTransport::new(),
    );

    assert_eq!(
        agent.on_uncaught_error("ResizeObserver loop limit exceeded", None, None, None, None),
        CaptureOutcome::Ignored
    );
    agent.flush().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(backend.browser_batches().await.is_empty());
}

#[tokio::test]
async fn agent_unreachable_endpoint_is_silent() {
    let agent = CaptureAgent::new(
        AgentConfig {
            endpoint: "http://127.0.0.1:9/errors/browser".to_string(),
            ..AgentConfig::default()
        },
        HttpTransport::new(),
    );
    agent.on_uncaught_error("Error: offline", None, None, None, None);
    agent.flush().await;
    assert!(agent.get_buffer().is_empty());
}
