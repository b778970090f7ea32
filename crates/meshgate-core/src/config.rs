//! Engine and logging configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default WireGuard listen port
pub const DEFAULT_LISTEN_PORT: u16 = 51820;

/// Default persistent keepalive interval (seconds)
pub const DEFAULT_KEEPALIVE_SECS: u16 = 25;

/// Default bound on any external command invocation (seconds)
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;

/// Engine runtime configuration
///
/// Where the declared state lives, where rendered interface configs are
/// written, and how long external commands may run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for the embedded database
    pub data_dir: PathBuf,

    /// Directory the daemon supervisor watches for `<iface>.conf` files
    /// and `restart_<iface>` signals
    pub wg_config_dir: PathBuf,

    /// Directory client config files are exported to
    pub export_dir: PathBuf,

    /// Packet-filter chain the firewall reconciler owns
    pub filter_chain: String,

    /// Bound on any external command invocation (seconds)
    pub command_timeout_secs: u64,
}

impl EngineConfig {
    /// Command timeout as a [`Duration`]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Path of the rendered config file for an interface
    pub fn interface_config_path(&self, interface: &str) -> PathBuf {
        self.wg_config_dir.join(format!("{interface}.conf"))
    }

    /// Path of the restart signal file for an interface
    pub fn restart_signal_path(&self, interface: &str) -> PathBuf {
        self.wg_config_dir.join(format!("restart_{interface}"))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/meshgate"),
            wg_config_dir: PathBuf::from("/etc/wireguard"),
            export_dir: PathBuf::from("/var/lib/meshgate/exports"),
            filter_chain: "FORWARD".to_string(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

/// Log verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Console log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

/// File rotation strategy for log files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    Daily,
    Hourly,
    Never,
}

/// Optional rolling file output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLoggingConfig {
    /// Directory log files are written to
    pub directory: PathBuf,

    /// Log file name prefix
    pub prefix: String,

    /// Rotation strategy
    pub rotation: RotationStrategy,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level when no filter directives are given
    pub level: LogLevel,

    /// Console output format
    pub format: LogFormat,

    /// Explicit `EnvFilter` directives, overriding `level`
    #[serde(default)]
    pub filter_directives: Option<String>,

    /// Include the event target in output
    #[serde(default = "default_true")]
    pub include_target: bool,

    /// Optional rolling file output (always JSON)
    #[serde(default)]
    pub file: Option<FileLoggingConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            filter_directives: None,
            include_target: true,
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_paths() {
        let config = EngineConfig {
            wg_config_dir: PathBuf::from("/etc/wireguard"),
            ..Default::default()
        };
        assert_eq!(
            config.interface_config_path("wg0"),
            PathBuf::from("/etc/wireguard/wg0.conf")
        );
        assert_eq!(
            config.restart_signal_path("wg0"),
            PathBuf::from("/etc/wireguard/restart_wg0")
        );
    }

    #[test]
    fn test_command_timeout() {
        let config = EngineConfig::default();
        assert_eq!(config.command_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_log_level_directives() {
        assert_eq!(LogLevel::Debug.as_str(), "debug");
        assert_eq!(LogLevel::Error.as_str(), "error");
    }

    #[test]
    fn test_logging_config_serde_defaults() {
        let config: LoggingConfig =
            serde_json::from_str(r#"{"level":"info","format":"json"}"#).unwrap();
        assert!(config.include_target);
        assert!(config.file.is_none());
    }
}
