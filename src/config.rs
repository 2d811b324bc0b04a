//! Runtime configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `MEIDS_`, nested keys separated by `__`
//!
//! # Example
//! ```no_run
//! use meids::config::MeidsConfig;
//!
//! let config = MeidsConfig::load_from("config/meids.toml")?;
//! config.validate()?;
//! println!("remote peers: {:?}", config.remote.addresses());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging::OutputFormat;
use crate::rpc::DEFAULT_PORT;
use crate::sim::SimBoard;
use crate::trigger::ConvClassMapping;

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeidsConfig {
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Locally attached (simulated) boards
    #[serde(default)]
    pub local: LocalConfig,
    /// Remote board servers
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Settings for the board server daemon
    #[serde(default)]
    pub rpc_server: RpcServerConfig,
    /// Trigger translation settings
    #[serde(default)]
    pub trigger: TriggerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default)]
    pub format: OutputFormat,
}

/// Local backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Whether a local context is opened at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Boards served by the simulated control channel
    #[serde(default = "default_boards")]
    pub boards: Vec<BoardDefinition>,
}

/// One simulated board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardDefinition {
    /// Board family
    pub model: BoardModel,
    /// Serial number reported by the board
    pub serial: i32,
}

/// Board families the simulated channel can emulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardModel {
    /// Analog in/out, digital I/O and a counter
    Multifunction,
    /// Digital I/O ports only
    Digital,
}

/// Remote backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Hosts to connect to; `host` or `host:port`
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Port used for hosts given without one
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connect and reply timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

/// Board server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcServerConfig {
    /// Address to bind
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Trigger translation configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Conversion-class trigger mapping (straight or legacy)
    #[serde(default)]
    pub mapping: ConvClassMapping,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_boards() -> Vec<BoardDefinition> {
    vec![BoardDefinition {
        model: BoardModel::Multifunction,
        serial: 1,
    }]
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> u64 {
    5000
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: OutputFormat::default(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            boards: default_boards(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            port: default_port(),
            timeout_ms: default_timeout(),
        }
    }
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl BoardDefinition {
    /// Simulated board description for this definition.
    pub fn to_board(&self) -> SimBoard {
        match self.model {
            BoardModel::Multifunction => SimBoard::multifunction(self.serial),
            BoardModel::Digital => SimBoard::digital(self.serial),
        }
    }
}

impl RemoteConfig {
    /// Host list with the default port filled in where missing.
    pub fn addresses(&self) -> Vec<String> {
        self.hosts
            .iter()
            .map(|host| {
                if host.contains(':') {
                    host.clone()
                } else {
                    format!("{}:{}", host, self.port)
                }
            })
            .collect()
    }
}

impl RpcServerConfig {
    /// `bind:port` listen address.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl MeidsConfig {
    /// Load configuration from a TOML file and environment variables
    ///
    /// Environment variables override the file with prefix `MEIDS_`.
    /// Example: `MEIDS_REMOTE__TIMEOUT_MS=2000`
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MEIDS_").split("__"))
            .extract()
    }

    /// Render the configuration as TOML that [`MeidsConfig::load_from`]
    /// reads back unchanged.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if self.remote.timeout_ms == 0 {
            return Err("remote.timeout_ms must be greater than zero".to_string());
        }
        if self.remote.port == 0 {
            return Err("remote.port must be greater than zero".to_string());
        }
        if self.rpc_server.port == 0 {
            return Err("rpc_server.port must be greater than zero".to_string());
        }

        // Hosts compare after the default port is applied
        let mut hosts = std::collections::HashSet::new();
        for address in self.remote.addresses() {
            if !hosts.insert(address.clone()) {
                return Err(format!("Duplicate remote host: {}", address));
            }
        }

        let mut serials = std::collections::HashSet::new();
        for board in &self.local.boards {
            if !serials.insert(board.serial) {
                return Err(format!("Duplicate board serial: {}", board.serial));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MeidsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.remote.port, DEFAULT_PORT);
        assert_eq!(config.local.boards.len(), 1);
        assert_eq!(config.trigger.mapping, ConvClassMapping::Straight);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = MeidsConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_hosts_after_port_defaulting() {
        let mut config = MeidsConfig::default();
        config.remote.hosts = vec!["daq-1".to_string(), format!("daq-1:{}", DEFAULT_PORT)];
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate remote host"));
    }

    #[test]
    fn test_zero_timeout_and_port() {
        let mut config = MeidsConfig::default();
        config.remote.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = MeidsConfig::default();
        config.rpc_server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_addresses() {
        let config = RemoteConfig {
            hosts: vec!["a".to_string(), "b:9000".to_string()],
            port: 7000,
            timeout_ms: 100,
        };
        assert_eq!(config.addresses(), vec!["a:7000", "b:9000"]);
    }
}
