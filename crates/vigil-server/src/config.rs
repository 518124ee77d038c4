//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file (`VIGIL_CONFIG`, `vigil.toml`, `/etc/vigil/vigil.toml`,
//!   `~/.config/vigil/vigil.toml`)
//! - Environment variables (`VIGIL__SECTION__KEY`, plus `VIGIL_HOST`/`VIGIL_PORT`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use vigil_core::{BridgeConfig, HubConfig};
use vigil_mqtt::MqttConfig;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Broker connection.
    #[serde(default)]
    pub broker: MqttConfig,

    /// Record store.
    #[serde(default)]
    pub store: StoreConfig,

    /// Fan-out hub.
    #[serde(default)]
    pub hub: HubSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Which record store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process, bounded retention.
    Memory,
    /// Append-only JSON lines file.
    File,
}

/// Record store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend.
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// File path for the `file` backend.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Records kept by the `memory` backend.
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Records waiting to be written before new ones are dropped.
    #[serde(default = "default_backlog")]
    pub backlog: usize,
}

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Frames buffered per session before deliveries are dropped.
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("VIGIL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("VIGIL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_store_path() -> PathBuf {
    PathBuf::from("vigil-events.jsonl")
}

fn default_retention() -> usize {
    10_000
}

fn default_backlog() -> usize {
    1024
}

fn default_session_buffer() -> usize {
    256
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            broker: MqttConfig::default(),
            store: StoreConfig::default(),
            hub: HubSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
            retention: default_retention(),
            backlog: default_backlog(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            session_buffer: default_session_buffer(),
        }
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(settings: &HubSettings) -> Self {
        HubConfig {
            session_buffer: settings.session_buffer,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, layered with
    /// `VIGIL__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = Self::locate() {
            tracing::info!("Loading configuration from {}", path.display());
            builder = builder.add_source(
                config::File::from(path.as_path()).format(config::FileFormat::Toml),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("VIGIL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Find the config file to use.
    fn locate() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var("VIGIL_CONFIG") {
            return Some(PathBuf::from(shellexpand::tilde(&explicit).as_ref()));
        }

        let config_paths = [
            "vigil.toml",
            "/etc/vigil/vigil.toml",
            "~/.config/vigil/vigil.toml",
        ];

        config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
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

    /// Settings for the bridge core.
    #[must_use]
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            hub: (&self.hub).into(),
            persist_backlog: self.store.backlog,
        }
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.hub.session_buffer, 256);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "127.0.0.1".into(),
            port: 8080,
            ..Config::default()
        };
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

            [broker]
            host = "mqtt.local"
            username = "bridge"
            password = "secret"

            [store]
            backend = "file"
            path = "/var/lib/vigil/events.jsonl"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.broker.host, "mqtt.local");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.username.as_deref(), Some("bridge"));
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(
            config.store.path,
            PathBuf::from("/var/lib/vigil/events.jsonl")
        );
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "[hub]\nsession_buffer = 8\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.hub.session_buffer, 8);
        assert!(Config::from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_hub_config_conversion() {
        let settings = HubSettings { session_buffer: 12 };
        assert_eq!(HubConfig::from(&settings).session_buffer, 12);
    }

    #[test]
    fn test_bridge_config() {
        let config: Config = toml::from_str("[store]\nbacklog = 16\n[hub]\nsession_buffer = 4\n").unwrap();
        let bridge = config.bridge_config();
        assert_eq!(bridge.persist_backlog, 16);
        assert_eq!(bridge.hub.session_buffer, 4);
        assert_eq!(Config::default().bridge_config().persist_backlog, 1024);
    }
}
