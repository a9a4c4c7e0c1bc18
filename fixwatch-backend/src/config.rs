//! Configuration for the fixwatch backend harness.
//!
//! CLI flags (and their `FIXWATCH_BACKEND_*` env fallbacks) win over the
//! `[server]` table of `~/.config/fixwatch-backend/config.toml`, which wins
//! over compiled defaults.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read backend config {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid backend config: {0}")]
    ParseToml(#[from] toml::de::Error),
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendConfigFile {
    server: ServerFileConfig,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    log_level: Option<String>,
}

/// CLI arguments for the backend harness.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "fixwatch reference backend")]
pub struct BackendCliArgs {
    /// Listen address, e.g. `127.0.0.1:8000`.
    #[arg(short, long, env = "FIXWATCH_BACKEND_ADDR")]
    pub bind: Option<String>,

    /// Config file; it must exist when given.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[arg(long, env = "FIXWATCH_BACKEND_LOG")]
    pub log_level: Option<String>,
}

/// Resolved backend settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub bind_addr: String,
    pub log_level: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl BackendConfig {
    /// Merges CLI flags, the config file and defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    /// A missing default config file is not an error.
    pub fn load(cli: &BackendCliArgs) -> Result<Self, ConfigError> {
        let file = read_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    fn resolve(cli: &BackendCliArgs, file: BackendConfigFile) -> Self {
        let defaults = Self::default();
        let server = file.server;
        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            log_level: cli
                .log_level
                .clone()
                .or(server.log_level)
                .unwrap_or(defaults.log_level),
        }
    }
}

fn read_config_file(explicit: Option<&Path>) -> Result<BackendConfigFile, ConfigError> {
    let (path, required) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => match dirs::config_dir() {
            Some(dir) => (dir.join("fixwatch-backend").join("config.toml"), false),
            None => return Ok(BackendConfigFile::default()),
        },
    };
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(BackendConfigFile::default());
        }
        Err(source) => return Err(ConfigError::ReadFile { path, source }),
    };
    Ok(toml::from_str(&contents)?)
}
