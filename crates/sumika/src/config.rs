//! Configuration file parsing and structures.
//!
//! sumika is configured with a single TOML file. Every section has defaults,
//! so an empty file starts an embedded broker with no seeded automations.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::automation::AutomationSpec;
use crate::dispatch::SceneLight;

/// Default bus namespace used by the zigbee bridge
pub const DEFAULT_NAMESPACE: &str = "zb2m-sumika";

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub buttons: ButtonsConfig,

    #[serde(default)]
    pub hub: HubConfig,

    /// Zone name -> ordered member devices
    #[serde(default)]
    pub zones: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub scenes: Vec<SceneConfig>,

    #[serde(default)]
    pub automations: Vec<AutomationSpec>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"sumika::buttons" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Per-target filter: `level` by default, overrides for their targets
    pub fn filter(&self) -> Targets {
        self.overrides.iter().fold(
            Targets::new().with_default(LevelFilter::from(self.level)),
            |targets, (target, level)| {
                targets.with_target(target.clone(), LevelFilter::from(*level))
            },
        )
    }
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    /// In-process broker, the hub connects with an inline client
    #[default]
    Embedded,
    /// Remote broker reached over TCP
    External,
}

/// Message bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub mode: BrokerMode,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Topic prefix of the zigbee bridge
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// TCP address the embedded broker accepts MQTT clients on; empty
    /// keeps the bus in-process only
    #[serde(default = "default_broker_listen")]
    pub listen: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "sumika-server".to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_broker_listen() -> String {
    "0.0.0.0:1883".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: BrokerMode::default(),
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            namespace: default_namespace(),
            listen: default_broker_listen(),
        }
    }
}

impl BrokerConfig {
    /// Apply `EXTERNAL_MQTT_*` overrides
    ///
    /// A broker address switches the hub to external mode. The password is
    /// only taken when a username is present.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(address) = non_empty("EXTERNAL_MQTT_BROKER") {
            let (host, port) = parse_broker_address(&address)?;
            self.mode = BrokerMode::External;
            self.host = host;
            if let Some(port) = port {
                self.port = port;
            }
        }

        if let Some(username) = non_empty("EXTERNAL_MQTT_USERNAME") {
            self.username = Some(username);
            self.password = non_empty("EXTERNAL_MQTT_PASSWORD");
        }

        Ok(())
    }
}

/// Split `tcp://host:port` style addresses
fn parse_broker_address(address: &str) -> Result<(String, Option<u16>), ConfigError> {
    let trimmed = address
        .strip_prefix("tcp://")
        .or_else(|| address.strip_prefix("mqtt://"))
        .unwrap_or(address);

    if trimmed.is_empty() {
        return Err(ConfigError::InvalidBroker(address.to_string()));
    }

    match trimmed.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidBroker(address.to_string()))?;
            Ok((host.to_string(), Some(port)))
        }
        Some(_) => Err(ConfigError::InvalidBroker(address.to_string())),
        None => Ok((trimmed.to_string(), None)),
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8081
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_api_port(),
        }
    }
}

/// Button press timing windows
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ButtonsConfig {
    /// Window after the last press before a click count is final
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// How long a button must stay down to count as a long press
    #[serde(default = "default_long_press_ms")]
    pub long_press_ms: u64,
}

fn default_debounce_ms() -> u64 {
    600
}

fn default_long_press_ms() -> u64 {
    800
}

impl Default for ButtonsConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            long_press_ms: default_long_press_ms(),
        }
    }
}

impl ButtonsConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn long_press(&self) -> Duration {
        Duration::from_millis(self.long_press_ms)
    }
}

/// Real-time client session limits
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HubConfig {
    /// Outbound envelopes buffered per client before it is dropped
    #[serde(default = "default_client_queue")]
    pub client_queue: usize,

    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

fn default_client_queue() -> usize {
    256
}

fn default_ping_interval() -> u64 {
    54
}

fn default_read_timeout() -> u64 {
    60
}

fn default_write_timeout() -> u64 {
    10
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_queue: default_client_queue(),
            ping_interval_secs: default_ping_interval(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl HubConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Seeded scene definition
#[derive(Debug, Clone, Deserialize)]
pub struct SceneConfig {
    pub name: String,

    #[serde(default)]
    pub order: i64,

    pub lights: Vec<SceneLight>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        toml::from_str(&contents).map_err(ConfigError::Parse)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),
}
