//! Server configuration.
//!
//! Configuration is layered from:
//! - The first TOML file found in the default search paths
//! - Environment variables (`PARLEY_*`, nested keys separated by `__`)

use anyhow::{Context, Result};
use parley_core::{MemoryStore, RouterConfig, UserProfile};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Default configuration file locations, in priority order.
const CONFIG_PATHS: [&str; 3] = [
    "parley.toml",
    "/etc/parley/parley.toml",
    "~/.config/parley/parley.toml",
];

/// Server configuration. Every section falls back to its defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    pub transport: TransportConfig,
    pub limits: LimitsConfig,
    pub heartbeat: HeartbeatConfig,
    pub metrics: MetricsConfig,
    /// Known users and their access tokens.
    pub users: Vec<UserEntry>,
    /// Rooms that exist at startup.
    pub rooms: Vec<RoomEntry>,
}

/// Where the WebSocket endpoint is mounted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub websocket_path: String,
}

/// Capacity and validation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Handshakes beyond this many live connections get a 503.
    pub max_connections: usize,
    pub max_rooms_per_connection: usize,
    /// Largest inbound WebSocket frame, in bytes.
    pub max_message_size: usize,
    /// Longest accepted message text, in bytes.
    pub max_text_length: usize,
}

/// Server ping cadence and idle cutoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    /// A connection silent for this long is closed.
    pub timeout_ms: u64,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// A user allowed to connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    /// Bearer token presented at the WebSocket handshake.
    pub token: String,
}

/// A room available at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEntry {
    pub id: String,
    pub name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            users: Vec::new(),
            rooms: Vec::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: "/ws".into(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            max_rooms_per_connection: 100,
            max_message_size: 256 * 1024,
            max_text_length: 64 * 1024,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 60_000,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from the default paths and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let mut builder = ::config::Config::builder();

        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                builder = builder.add_source(::config::File::new(
                    expanded.as_ref(),
                    ::config::FileFormat::Toml,
                ));
                break;
            }
        }

        builder
            .add_source(
                ::config::Environment::with_prefix("PARLEY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Router settings derived from the limits.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_rooms_per_connection: self.limits.max_rooms_per_connection,
            max_text_length: self.limits.max_text_length,
            ..RouterConfig::default()
        }
    }

    /// Populate an in-memory store with the configured users and rooms.
    pub fn seed(&self, store: &MemoryStore) {
        for user in &self.users {
            store.add_user(UserProfile {
                id: user.id.clone(),
                username: user.username.clone(),
                avatar: user.avatar.clone(),
            });
        }
        for room in &self.rooms {
            store.add_room(room.id.clone(), room.name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert!(config.users.is_empty());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_connections = 50000
            max_rooms_per_connection = 5

            [heartbeat]
            timeout_ms = 5000

            [[users]]
            id = "alice"
            username = "Alice"
            token = "secret-a"

            [[rooms]]
            id = "general"
            name = "General"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.limits.max_text_length, 64 * 1024);
        assert_eq!(config.heartbeat.interval_ms, 30_000);
        assert_eq!(config.heartbeat.timeout_ms, 5000);
        assert_eq!(config.router_config().max_rooms_per_connection, 5);
        assert_eq!(config.users[0].token, "secret-a");
        assert!(config.users[0].avatar.is_none());

        let store = MemoryStore::new();
        config.seed(&store);
        assert_eq!(store.room("general").unwrap().name, "General");
    }
}
