//! The `fixwatch` binary: watches a project's build output and fix lifecycle.
//!
//! Reads command output from stdin, reports lines that look like errors to
//! the backend, and prints the project's execution log stream together with
//! fix lifecycle events.
//!
//! ```bash
//! npm run build 2>&1 | fixwatch --project-id demo --backend-url http://127.0.0.1:8000
//!
//! # Lines of the form `$ <cmd>` set the command context for later errors.
//! ```

use std::io;
use std::path::Path;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use fixwatch::collector::{CollectorEvent, CollectorRegistry};
use fixwatch::config::{CliArgs, FixwatchConfig};
use fixwatch::stream::{LifecycleEvent, LogStreamConsumer};
use fixwatch::transport::http::HttpTransport;
use fixwatch_proto::fix::FixNotification;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = FixwatchConfig::load(&cli).map_err(|e| {
        eprintln!("fixwatch: {e}");
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let Some(project_id) = config.project_id.clone() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "a project id is required (--project-id or [backend] project_id)",
        ));
    };

    tracing::info!(project_id = %project_id, backend = %config.backend_url, "fixwatch starting");
    let result = run(&project_id, &config).await;
    tracing::info!("fixwatch exiting");
    result
}

/// Sends tracing output to a file so stdout stays free for the stream.
///
/// The returned guard flushes the non-blocking writer when dropped.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("fixwatch.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(project_id: &str, config: &FixwatchConfig) -> io::Result<()> {
    let registry = CollectorRegistry::new(HttpTransport::new());
    let collector = registry
        .acquire(project_id, config.collector.clone())
        .map_err(io::Error::other)?;
    let mut collector_events = collector.register_listener(64);
    collector.connect();

    let consumer = LogStreamConsumer::new(project_id, &config.stream).map_err(io::Error::other)?;
    let mut lifecycle = consumer.subscribe(64);
    let mut lines = consumer.subscribe_lines(256);
    consumer.begin_execution();
    consumer.connect();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = stdin.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(command) = line.strip_prefix("$ ") {
                        collector.set_command(command.trim());
                    } else {
                        collector.detect_and_report(&line, config.source);
                    }
                }
                Ok(None) => {
                    collector.forward_now().await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(err = %e, "stdin read failed");
                    collector.forward_now().await;
                    break;
                }
            },
            Some(line) = lines.recv() => {
                println!("[{}] {}", line.kind, line.text);
            }
            Some(event) = lifecycle.recv() => {
                println!("{}", describe_lifecycle(&event));
            }
            Some(event) = collector_events.recv() => {
                if let Some(text) = describe_collector(&event) {
                    println!("{text}");
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    registry.destroy_all();
    consumer.disconnect();
    Ok(())
}

fn describe_lifecycle(event: &LifecycleEvent) -> String {
    match event {
        LifecycleEvent::ServerStarted { url } => format!("» preview ready at {url}"),
        LifecycleEvent::FixStarted { attempt } => format!("» fix attempt {attempt} started"),
        LifecycleEvent::FixCompleted => "» fix applied".to_string(),
        LifecycleEvent::FixFailed {
            reason,
            exhausted: true,
        } => format!("» fix failed, attempts exhausted: {reason}"),
        LifecycleEvent::FixFailed { reason, .. } => format!("» fix failed: {reason}"),
        LifecycleEvent::HealthCheckFailed { reason } => format!("» health check failed: {reason}"),
    }
}

fn describe_collector(event: &CollectorEvent) -> Option<String> {
    match event {
        CollectorEvent::ErrorDetected(entry) => Some(format!(
            "! {} {} ({})",
            entry.severity, entry.message, entry.error_type
        )),
        CollectorEvent::Forwarded { count } => Some(format!("» {count} error(s) reported")),
        CollectorEvent::ForwardFailed { reason } => {
            Some(format!("» report failed, will retry: {reason}"))
        }
        CollectorEvent::Fix(FixNotification::FixStarted { reason }) => Some(format!(
            "» backend started a fix{}",
            reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
        )),
        CollectorEvent::Fix(FixNotification::FixCompleted {
            patches_applied,
            files_modified,
        }) => Some(format!(
            "» backend fix completed ({} patch(es), {} file(s))",
            patches_applied.unwrap_or_default(),
            files_modified.len()
        )),
        CollectorEvent::Fix(FixNotification::FixFailed { error }) => Some(format!(
            "» backend fix failed: {}",
            error.as_deref().unwrap_or("unknown error")
        )),
        CollectorEvent::Connection(_) => None,
    }
}
