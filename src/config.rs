//! Configuration management for the remoted daemon.
//!
//! A single TOML file. On first run, if no config exists, one is written with
//! defaults. Command line flags override file values (see `main.rs`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::constants;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket ping interval; a dead phone is noticed within one interval.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_port() -> u16 {
    constants::DEFAULT_PORT
}

fn default_heartbeat_interval_secs() -> u64 {
    constants::DEFAULT_HEARTBEAT_INTERVAL.as_secs()
}

impl ServerConfig {
    /// `listen_address` may carry its own port, which wins over `port`.
    pub fn full_listen_address(&self) -> String {
        if self.listen_address.contains(':') && !self.listen_address.starts_with('[') {
            // Bare IPv6 literals contain ':' too
            if self.listen_address.parse::<std::net::Ipv6Addr>().is_ok() {
                return format!("[{}]:{}", self.listen_address, self.port);
            }
            self.listen_address.clone()
        } else if self.listen_address.starts_with('[') && self.listen_address.contains("]:") {
            self.listen_address.clone()
        } else {
            format!("{}:{}", self.listen_address, self.port)
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Phones the demo waits for before it starts issuing calls.
    #[serde(default = "default_min_peers")]
    pub min_peers: usize,
}

fn default_call_timeout_secs() -> u64 {
    constants::DEFAULT_CALL_TIMEOUT.as_secs()
}

fn default_min_peers() -> usize {
    constants::DEFAULT_MIN_PEERS
}

impl SessionConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
    /// "stdout" or "file"
    pub output: String,
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_address: constants::DEFAULT_LISTEN_ADDRESS.to_string(),
                port: constants::DEFAULT_PORT,
                heartbeat_interval_secs: default_heartbeat_interval_secs(),
            },
            session: SessionConfig {
                call_timeout_secs: default_call_timeout_secs(),
                min_peers: constants::DEFAULT_MIN_PEERS,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                output: "stdout".to_string(),
                file_path: "./logs/remoted.log".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, writing a default config there first if it is missing.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            let config = Config::default();
            config.save_to_file(path)?;
            Ok(config)
        }
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.session.call_timeout_secs == 0 {
            return Err(AppError::Config(
                "session.call_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.session.call_timeout_secs > constants::MAX_CALL_TIMEOUT_SECS {
            return Err(AppError::Config(format!(
                "session.call_timeout_secs must be at most {}, got {}",
                constants::MAX_CALL_TIMEOUT_SECS, self.session.call_timeout_secs
            )));
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(AppError::Config(format!(
                    "logging.format must be \"pretty\" or \"json\", got {:?}",
                    other
                )))
            }
        }
        match self.logging.output.as_str() {
            "stdout" | "file" => Ok(()),
            other => Err(AppError::Config(format!(
                "logging.output must be \"stdout\" or \"file\", got {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let config = Config::default();
        assert_eq!(config.server.full_listen_address(), "0.0.0.0:12345");
        assert_eq!(config.session.call_timeout(), Duration::from_secs(120));
        assert_eq!(config.session.min_peers, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("remoted.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created, Config::default());

        let reloaded = Config::load_or_create(&path).unwrap();
        assert_eq!(reloaded, created);
    }

    #[test]
    fn test_partial_file_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remoted.toml");
        fs::write(
            &path,
            r#"
[server]
listen_address = "127.0.0.1"

[session]
call_timeout_secs = 15

[logging]
level = "debug"
format = "json"
output = "stdout"
file_path = "/tmp/remoted.log"
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.server.port, 12345);
        assert_eq!(config.server.heartbeat_interval_secs, 30);
        assert_eq!(config.session.call_timeout(), Duration::from_secs(15));
        assert_eq!(config.session.min_peers, 2);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        config.session.call_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = Config::default();
        config.session.call_timeout_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
        config.session.call_timeout_secs = constants::MAX_CALL_TIMEOUT_SECS;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.logging.output = "syslog".to_string();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[server\nport = 1").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(AppError::TomlDe(_))
        ));
    }

    #[test]
    fn test_full_listen_address_variants() {
        let mut server = Config::default().server;

        server.listen_address = "192.168.0.10:9000".to_string();
        assert_eq!(server.full_listen_address(), "192.168.0.10:9000");

        server.listen_address = "::".to_string();
        server.port = 4000;
        assert_eq!(server.full_listen_address(), "[::]:4000");

        server.listen_address = "[::1]:4100".to_string();
        assert_eq!(server.full_listen_address(), "[::1]:4100");

        server.heartbeat_interval_secs = 0;
        assert_eq!(server.heartbeat_interval(), Duration::from_secs(1));
    }
}
