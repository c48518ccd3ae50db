use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Room for the longest fixed-form command.
const MIN_LINE_BYTES: usize = 256;

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file (every key is optional) and then
/// patched with whatever was given on the command line or through the
/// environment, see [`Cli`].
///
/// # Fields Overview
///
/// - `bind_address` / `port`: where the line protocol listens
/// - `max_sessions`: connection limit, overflow connections are queued
/// - `inactivity_timeout_secs`: idle window before a session is closed, `0`
/// disables the check
/// - `max_line_bytes`: longest accepted command line, newline included. Sized
/// for base64 `UPLOAD` payloads
/// - `read_ack_delay_ms`: deliberate delay on chat acknowledgements sent to
/// READ sessions, `0` answers immediately
/// - `repository_path`: the single directory exposed to ADMIN sessions
/// - `stats_interval_secs`: period of the statistics report, `0` disables it
/// - `stats_file`: optional JSON file receiving every periodic snapshot
/// - `activity_log`: optional file receiving `(timestamp, client, event)` lines
/// - `auth`: how sessions are elevated to ADMIN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub max_sessions: usize,
    pub inactivity_timeout_secs: u64,
    pub max_line_bytes: usize,
    pub read_ack_delay_ms: u64,
    pub repository_path: PathBuf,
    pub stats_interval_secs: u64,
    pub stats_file: Option<PathBuf>,
    pub activity_log: Option<PathBuf>,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: 4000,
            max_sessions: 4,
            inactivity_timeout_secs: 20,
            max_line_bytes: 8 * 1024 * 1024,
            read_ack_delay_ms: 0,
            repository_path: PathBuf::from("./server_files"),
            stats_interval_secs: 10,
            stats_file: None,
            activity_log: None,
            auth: AuthConfig::default(),
        }
    }
}

/// Command-line arguments. Every value is optional and overrides the file.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "gatehouse")]
#[command(version)]
#[command(about = "Line-oriented TCP file server with role-based access")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "GATEHOUSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// IP address to listen on
    #[arg(long, env = "GATEHOUSE_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// TCP port to listen on
    #[arg(short, long, env = "GATEHOUSE_PORT")]
    pub port: Option<u16>,

    /// Maximum number of concurrently active sessions
    #[arg(long, env = "GATEHOUSE_MAX_SESSIONS")]
    pub max_sessions: Option<usize>,

    /// Seconds without traffic before a session is closed (0 disables)
    #[arg(long)]
    pub inactivity_timeout_secs: Option<u64>,

    /// Longest accepted command line in bytes
    #[arg(long)]
    pub max_line_bytes: Option<usize>,

    /// Directory exposed to ADMIN sessions
    #[arg(long, env = "GATEHOUSE_REPOSITORY")]
    pub repository_path: Option<PathBuf>,

    /// How sessions obtain the ADMIN role
    #[arg(long, value_enum)]
    pub auth_mode: Option<AuthMode>,

    /// Shared secret for password elevation
    #[arg(long, env = "GATEHOUSE_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Builds the effective configuration: file (or defaults), then command
    /// line overrides, then validation.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(bind_address) = &cli.bind_address {
            self.bind_address = bind_address.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(max_sessions) = cli.max_sessions {
            self.max_sessions = max_sessions;
        }
        if let Some(secs) = cli.inactivity_timeout_secs {
            self.inactivity_timeout_secs = secs;
        }
        if let Some(limit) = cli.max_line_bytes {
            self.max_line_bytes = limit;
        }
        if let Some(path) = &cli.repository_path {
            self.repository_path = path.clone();
        }
        if let Some(mode) = cli.auth_mode {
            self.auth.mode = mode;
        }
        if let Some(password) = &cli.admin_password {
            self.auth.admin_password = Some(password.clone());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        if self.max_sessions == 0 {
            return Err(ConfigError::NotInRange(String::from(
                "max_sessions must be at least 1",
            )));
        }

        if self.max_line_bytes < MIN_LINE_BYTES {
            return Err(ConfigError::NotInRange(format!(
                "max_line_bytes must be at least {}",
                MIN_LINE_BYTES
            )));
        }

        if self.auth.max_admin_attempts == 0 {
            return Err(ConfigError::NotInRange(String::from(
                "auth.max_admin_attempts must be at least 1",
            )));
        }

        if self.auth.mode == AuthMode::Password
            && self.auth.admin_password.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::MissingValue(String::from(
                "auth.admin_password is required in password mode",
            )));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::BadIPFormatting(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn inactivity_timeout(&self) -> Option<Duration> {
        non_zero(Duration::from_secs(self.inactivity_timeout_secs))
    }

    pub fn read_ack_delay(&self) -> Option<Duration> {
        non_zero(Duration::from_millis(self.read_ack_delay_ms))
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        non_zero(Duration::from_secs(self.stats_interval_secs))
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}
