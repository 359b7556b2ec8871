//! Configuration system for the `PairChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pairchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use pairchat_proto::identity::Identity;

use crate::chat::ChatConfig;
use crate::chat::session::JoinRetryPolicy;
use crate::net::NetConfig;
use crate::transport::ws::RetryPolicy;

/// Relay used when nothing else is configured.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:9000/ws";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The relay URL is not a valid `ws://` or `wss://` URL.
    #[error("invalid relay url {url}: {reason}")]
    InvalidRelayUrl {
        /// The configured URL.
        url: String,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    session: SessionFileConfig,
    presence: PresenceFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    relay_url: Option<String>,
    user: Option<String>,
    peer: Option<String>,
    connect_timeout_secs: Option<u64>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    reconnect_after_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    join_retry_secs: Option<u64>,
    join_retry_max_secs: Option<u64>,
    join_max_retries: Option<u32>,
}

/// `[presence]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PresenceFileConfig {
    refresh_secs: Option<u64>,
    ttl_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// Relay server WebSocket URL.
    pub relay_url: String,
    /// Local identity.
    pub user: Option<String>,
    /// Identity to chat with.
    pub peer: Option<String>,
    /// Timeout for one connection attempt.
    pub connect_timeout: Duration,
    /// Automatic reconnect attempts before giving up.
    pub reconnect_attempts: u32,
    /// Reconnect backoff step.
    pub reconnect_delay: Duration,
    /// Upper bound on one reconnect wait.
    pub reconnect_max_delay: Duration,
    /// Pause before a new round of attempts once the link gave up (zero
    /// disables).
    pub reconnect_after: Duration,
    /// Capacity of the UI command channel.
    pub channel_capacity: usize,

    // -- Session --
    /// First join retry wait (and backoff step).
    pub join_retry: Duration,
    /// Upper bound on one join retry wait.
    pub join_retry_max: Duration,
    /// Join retries before giving up.
    pub join_max_retries: u32,

    // -- Presence --
    /// Peer status refresh period (zero disables).
    pub presence_refresh: Duration,
    /// Presence entry lifetime (zero disables expiry).
    pub presence_ttl: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            user: None,
            peer: None,
            connect_timeout: Duration::from_secs(10),
            reconnect_attempts: 10,
            reconnect_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_millis(5000),
            reconnect_after: Duration::from_secs(60),
            channel_capacity: 256,
            join_retry: Duration::from_secs(3),
            join_retry_max: Duration::from_secs(30),
            join_max_retries: 20,
            presence_refresh: Duration::from_secs(10),
            presence_ttl: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/pairchat/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let net = &file.network;

        Self {
            relay_url: cli
                .relay_url
                .clone()
                .or_else(|| net.relay_url.clone())
                .unwrap_or(defaults.relay_url),
            user: cli.user.clone().or_else(|| net.user.clone()),
            peer: cli.peer.clone().or_else(|| net.peer.clone()),
            connect_timeout: net
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            reconnect_attempts: net
                .reconnect_attempts
                .unwrap_or(defaults.reconnect_attempts),
            reconnect_delay: net
                .reconnect_delay_ms
                .map_or(defaults.reconnect_delay, Duration::from_millis),
            reconnect_max_delay: net
                .reconnect_max_delay_ms
                .map_or(defaults.reconnect_max_delay, Duration::from_millis),
            reconnect_after: net
                .reconnect_after_secs
                .map_or(defaults.reconnect_after, Duration::from_secs),
            channel_capacity: net.channel_capacity.unwrap_or(defaults.channel_capacity),
            join_retry: file
                .session
                .join_retry_secs
                .map_or(defaults.join_retry, Duration::from_secs),
            join_retry_max: file
                .session
                .join_retry_max_secs
                .map_or(defaults.join_retry_max, Duration::from_secs),
            join_max_retries: file
                .session
                .join_max_retries
                .unwrap_or(defaults.join_max_retries),
            presence_refresh: file
                .presence
                .refresh_secs
                .map_or(defaults.presence_refresh, Duration::from_secs),
            presence_ttl: file
                .presence
                .ttl_secs
                .map_or(defaults.presence_ttl, Duration::from_secs),
        }
    }

    /// Build a [`NetConfig`] from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRelayUrl`] if the relay URL does not
    /// parse or is not `ws`/`wss`.
    pub fn to_net_config(&self) -> Result<NetConfig, ConfigError> {
        validate_relay_url(&self.relay_url)?;

        Ok(NetConfig {
            relay_url: self.relay_url.clone(),
            user: self.user.as_deref().map(Identity::from),
            peer: self.peer.as_deref().map(Identity::from),
            retry: RetryPolicy {
                max_attempts: self.reconnect_attempts,
                delay: self.reconnect_delay,
                max_delay: self.reconnect_max_delay,
                connect_timeout: self.connect_timeout,
            },
            chat: ChatConfig {
                join_retry: JoinRetryPolicy {
                    base: self.join_retry,
                    max: self.join_retry_max,
                    max_retries: self.join_max_retries,
                },
                presence_refresh: non_zero(self.presence_refresh),
                presence_ttl: non_zero(self.presence_ttl),
                reconnect_after: non_zero(self.reconnect_after),
            },
            channel_capacity: self.channel_capacity.max(1),
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Two-party chat over a relay")]
pub struct CliArgs {
    /// WebSocket URL of the relay server.
    #[arg(long, env = "PAIRCHAT_RELAY_URL")]
    pub relay_url: Option<String>,

    /// Your identity (an email address).
    #[arg(long, env = "PAIRCHAT_USER")]
    pub user: Option<String>,

    /// Identity to chat with.
    #[arg(long, env = "PAIRCHAT_PEER")]
    pub peer: Option<String>,

    /// Path to config file (default: `~/.config/pairchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PAIRCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/pairchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

fn validate_relay_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidRelayUrl {
        url: raw.to_string(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(invalid(format!("scheme must be ws or wss, got {other}"))),
    }
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("pairchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
