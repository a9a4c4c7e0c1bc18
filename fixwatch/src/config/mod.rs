//! Pipeline configuration.
//!
//! Each setting is taken from the first layer that provides it: CLI flags
//! (with `FIXWATCH_*` env fallbacks), then `~/.config/fixwatch/config.toml`,
//! then the compiled defaults. The default file may be absent; a file named
//! with `--config` must exist.
//!
//! The `[agent]` section is resolved for programs that embed a
//! [`CaptureAgent`](crate::agent::CaptureAgent); the `fixwatch` binary reads
//! build output and runs no agent of its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fixwatch_proto::entry::{BROWSER_REPORT_PATH, ErrorSource};

use crate::agent::AgentConfig;
use crate::classify::{DEFAULT_IGNORE_PATTERNS, IgnoreList};
use crate::collector::CollectorConfig;
use crate::retry::RetryPolicy;
use crate::stream::StreamConfig;

/// Why configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// An ignore pattern is not a valid regular expression.
    #[error("invalid ignore pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

// -- File layer: every field optional ------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    backend: BackendFileConfig,
    agent: AgentFileConfig,
    collector: CollectorFileConfig,
    reconnect: ReconnectFileConfig,
    stream: StreamFileConfig,
}

/// `[backend]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendFileConfig {
    base_url: Option<String>,
    project_id: Option<String>,
}

/// `[agent]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AgentFileConfig {
    endpoint: Option<String>,
    debounce_ms: Option<u64>,
    max_buffer_size: Option<usize>,
    dedupe_window_ms: Option<u64>,
    dedupe_sweep_threshold: Option<usize>,
    ignore_patterns: Option<Vec<String>>,
}

/// `[collector]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct CollectorFileConfig {
    debounce_ms: Option<u64>,
    error_ring_capacity: Option<usize>,
    output_ring_capacity: Option<usize>,
    dedupe_window_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    base_delay_ms: Option<u64>,
    multiplier: Option<u32>,
    max_attempts: Option<u32>,
}

/// `[stream]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StreamFileConfig {
    max_log_lines: Option<usize>,
    max_fix_attempts: Option<u32>,
}

// -- Resolved settings ----------------------------------------------------

/// Fully resolved pipeline configuration.
#[derive(Debug, Clone)]
pub struct FixwatchConfig {
    /// Backend REST base URL.
    pub backend_url: String,
    /// Project to watch.
    pub project_id: Option<String>,
    /// Source tag for lines read from stdin.
    pub source: ErrorSource,
    /// Capture agent settings, for embedders; unused by the binary.
    pub agent: AgentConfig,
    pub collector: CollectorConfig,
    pub stream: StreamConfig,
    /// Reconnect policy shared by both WebSocket clients.
    pub reconnect: RetryPolicy,
}

impl Default for FixwatchConfig {
    fn default() -> Self {
        let collector = CollectorConfig::default();
        Self {
            agent: AgentConfig {
                endpoint: format!("{}{BROWSER_REPORT_PATH}", collector.backend_url),
                ..AgentConfig::default()
            },
            backend_url: collector.backend_url.clone(),
            project_id: None,
            source: ErrorSource::Build,
            stream: StreamConfig::default(),
            reconnect: RetryPolicy::default(),
            collector,
        }
    }
}

impl FixwatchConfig {
    /// Reads the config file and merges it under the CLI flags.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if an ignore pattern does not compile.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = read_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `FixwatchConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. File ignore patterns extend the
    /// built-in list.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let backend_url = cli
            .backend_url
            .clone()
            .or_else(|| file.backend.base_url.clone())
            .unwrap_or(defaults.backend_url);
        let backend_url = backend_url.trim_end_matches('/').to_string();

        let ignore = match &file.agent.ignore_patterns {
            Some(extra) => {
                let mut patterns: Vec<&str> = DEFAULT_IGNORE_PATTERNS.to_vec();
                patterns.extend(extra.iter().map(String::as_str));
                IgnoreList::from_patterns(&patterns)?
            }
            None => IgnoreList::defaults(),
        };

        let reconnect = RetryPolicy {
            max_attempts: file
                .reconnect
                .max_attempts
                .unwrap_or(defaults.reconnect.max_attempts),
            base_delay: file
                .reconnect
                .base_delay_ms
                .map_or(defaults.reconnect.base_delay, Duration::from_millis),
            multiplier: file
                .reconnect
                .multiplier
                .unwrap_or(defaults.reconnect.multiplier),
        };

        let project_id = cli
            .project_id
            .clone()
            .or_else(|| file.backend.project_id.clone());

        let agent = AgentConfig {
            endpoint: file
                .agent
                .endpoint
                .clone()
                .unwrap_or_else(|| format!("{backend_url}{BROWSER_REPORT_PATH}")),
            project_id: project_id.clone().unwrap_or_default(),
            debounce: file
                .agent
                .debounce_ms
                .map_or(defaults.agent.debounce, Duration::from_millis),
            max_buffer_size: file
                .agent
                .max_buffer_size
                .unwrap_or(defaults.agent.max_buffer_size),
            dedupe_window: file
                .agent
                .dedupe_window_ms
                .map_or(defaults.agent.dedupe_window, Duration::from_millis),
            dedupe_sweep_threshold: file
                .agent
                .dedupe_sweep_threshold
                .unwrap_or(defaults.agent.dedupe_sweep_threshold),
            ignore: ignore.clone(),
            ..defaults.agent
        };

        let collector = CollectorConfig {
            backend_url: backend_url.clone(),
            debounce: file
                .collector
                .debounce_ms
                .map_or(defaults.collector.debounce, Duration::from_millis),
            error_ring_capacity: file
                .collector
                .error_ring_capacity
                .unwrap_or(defaults.collector.error_ring_capacity),
            output_ring_capacity: file
                .collector
                .output_ring_capacity
                .unwrap_or(defaults.collector.output_ring_capacity),
            dedupe_window: file
                .collector
                .dedupe_window_ms
                .map_or(defaults.collector.dedupe_window, Duration::from_millis),
            sweep_interval: file
                .collector
                .sweep_interval_ms
                .map_or(defaults.collector.sweep_interval, Duration::from_millis),
            ignore,
            reconnect: reconnect.clone(),
        };

        let stream = StreamConfig {
            backend_url: backend_url.clone(),
            max_log_lines: file
                .stream
                .max_log_lines
                .unwrap_or(defaults.stream.max_log_lines),
            max_fix_attempts: file
                .stream
                .max_fix_attempts
                .unwrap_or(defaults.stream.max_fix_attempts),
            reconnect: reconnect.clone(),
        };

        Ok(Self {
            backend_url,
            project_id,
            source: cli.source.unwrap_or(defaults.source),
            agent,
            collector,
            stream,
            reconnect,
        })
    }
}

/// Command-line flags.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Preview error triage and fix-lifecycle watcher")]
pub struct CliArgs {
    /// Project whose errors and log stream are watched.
    #[arg(long, env = "FIXWATCH_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Backend base URL (http or https).
    #[arg(long, env = "FIXWATCH_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Source tag for lines read from stdin (build, docker, backend, ...).
    #[arg(long)]
    pub source: Option<ErrorSource>,

    /// Config file to use instead of `~/.config/fixwatch/config.toml`.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "FIXWATCH_LOG")]
    pub log_level: String,

    /// Log file; `$TMPDIR/fixwatch.log` when omitted.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

fn read_config_file(explicit: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let (path, required) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => match dirs::config_dir() {
            Some(dir) => (dir.join("fixwatch").join("config.toml"), false),
            None => return Ok(ConfigFile::default()),
        },
    };
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ConfigFile::default());
        }
        Err(source) => return Err(ConfigError::ReadFile { path, source }),
    };
    Ok(toml::from_str(&contents)?)
}
