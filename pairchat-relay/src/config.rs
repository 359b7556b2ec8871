//! Relay settings.
//!
//! Each setting is taken from the first source that has it: command line
//! (or its environment variable), then the TOML file, then the built-in
//! value. The file lives at `~/.config/pairchat-relay/config.toml` unless
//! `--config` names one, in which case it must exist. Unlike the client,
//! the relay rejects unknown keys so a misspelt limit is not silently
//! ignored.
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:9000"
//! history_limit = 500
//!
//! [logging]
//! level = "info"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::rooms::{DEFAULT_HISTORY_LIMIT, Directory};

/// Address the relay listens on unless configured otherwise.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";

const DEFAULT_LOG_LEVEL: &str = "info";

/// Why the relay settings could not be assembled.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file exists but could not be read, or an explicit path
    /// does not exist.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for the relay.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The bind address is not `host:port` with a literal IP.
    #[error("invalid bind address {addr}: {source}")]
    InvalidBindAddr {
        /// The configured value.
        addr: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },
}

/// Command line of the relay binary.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "PairChat relay server")]
pub struct RelayCliArgs {
    /// Address to listen on, e.g. `127.0.0.1:8080`.
    #[arg(short, long, env = "PAIRCHAT_RELAY_ADDR")]
    pub bind: Option<String>,

    /// Messages kept per room for late joiners (0 keeps none).
    #[arg(long, env = "PAIRCHAT_RELAY_HISTORY")]
    pub history_limit: Option<usize>,

    /// Settings file (default: `~/.config/pairchat-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error).
    #[arg(long, env = "PAIRCHAT_RELAY_LOG")]
    pub log_level: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    server: ServerSection,
    logging: LoggingSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    bind_addr: Option<String>,
    history_limit: Option<usize>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LoggingSection {
    level: Option<String>,
}

/// Settings the relay runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Listening socket address.
    pub bind_addr: SocketAddr,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Messages kept per room.
    pub history_limit: usize,
}

impl RelayConfig {
    /// Reads the settings file and merges it under the command line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or the
    /// bind address is malformed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = match cli.config.as_deref() {
            Some(path) => read_settings(path)?,
            None => match default_settings_path() {
                Some(path) if path.exists() => read_settings(&path)?,
                _ => SettingsFile::default(),
            },
        };
        Self::merge(cli, file)
    }

    fn merge(cli: &RelayCliArgs, file: SettingsFile) -> Result<Self, ConfigError> {
        let addr = cli
            .bind
            .clone()
            .or(file.server.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = addr
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr { addr, source })?;

        Ok(Self {
            bind_addr,
            log_level: cli
                .log_level
                .clone()
                .or(file.logging.level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            history_limit: cli
                .history_limit
                .or(file.server.history_limit)
                .unwrap_or(DEFAULT_HISTORY_LIMIT),
        })
    }

    /// An empty directory honouring these settings.
    #[must_use]
    pub fn directory(&self) -> Directory {
        Directory::with_history_limit(self.history_limit)
    }
}

fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pairchat-relay").join("config.toml"))
}

fn read_settings(path: &Path) -> Result<SettingsFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}
