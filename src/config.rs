//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides. The
//! resulting value is validated once at startup and handed to the
//! components that need it.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::broker::{BrokerAddress, MqttSettings, MQTT_MAX_PACKET_BYTES};
use crate::relay::RelayConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub influx: InfluxConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served for every path not claimed by a route
    pub static_assets: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_assets: None,
        }
    }
}

impl ServerConfig {
    /// Socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// MQTT broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub url: String,

    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_broker_channel_capacity")]
    pub channel_capacity: usize,

    /// Largest MQTT packet accepted or sent, in bytes. A larger inbound
    /// publish ends the broker connection.
    #[serde(default = "default_max_packet_bytes")]
    pub max_packet_bytes: usize,

    pub username: Option<String>,

    pub password: Option<String>,
}

fn default_broker_url() -> String {
    "tcp://localhost:1883".to_string()
}

fn default_client_id_prefix() -> String {
    "dashbridge".to_string()
}

fn default_connect_timeout() -> u64 {
    5000 // 5 seconds
}

fn default_keep_alive() -> u64 {
    30
}

fn default_broker_channel_capacity() -> usize {
    64
}

fn default_max_packet_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            client_id_prefix: default_client_id_prefix(),
            connect_timeout_ms: default_connect_timeout(),
            keep_alive_secs: default_keep_alive(),
            channel_capacity: default_broker_channel_capacity(),
            max_packet_bytes: default_max_packet_bytes(),
            username: None,
            password: None,
        }
    }
}

impl BrokerConfig {
    /// Connection settings for the MQTT connector
    pub fn settings(&self) -> Result<MqttSettings, ConfigError> {
        let address = BrokerAddress::parse(&self.url)
            .map_err(|e| ConfigError::Invalid(format!("broker.url: {}", e)))?;

        let mut settings = MqttSettings::new(address);
        settings.client_id_prefix = self.client_id_prefix.clone();
        settings.connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        settings.keep_alive = Duration::from_secs(self.keep_alive_secs);
        settings.channel_capacity = self.channel_capacity;
        settings.max_packet_bytes = self.max_packet_bytes;
        settings.username = self.username.clone();
        settings.password = self.password.clone();
        Ok(settings)
    }
}

/// Relay session tuning
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_delivery_capacity")]
    pub delivery_capacity: usize,

    /// Zero drops a delivery immediately when the channel is full
    #[serde(default)]
    pub enqueue_timeout_ms: u64,

    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout_ms: u64,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_delivery_capacity() -> usize {
    64
}

fn default_teardown_timeout() -> u64 {
    2000
}

fn default_max_sessions() -> usize {
    256
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            delivery_capacity: default_delivery_capacity(),
            enqueue_timeout_ms: 0,
            teardown_timeout_ms: default_teardown_timeout(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl RelaySettings {
    pub fn to_relay_config(&self) -> RelayConfig {
        RelayConfig {
            delivery_capacity: self.delivery_capacity,
            enqueue_timeout: Duration::from_millis(self.enqueue_timeout_ms),
            teardown_timeout: Duration::from_millis(self.teardown_timeout_ms),
            max_sessions: self.max_sessions,
        }
    }
}

/// Time-series database proxy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    /// Upstream base URL; the proxy answers 503 when unset
    pub url: Option<String>,

    /// Sent upstream as `Authorization: Token <token>`
    pub token: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024 // 10 MB
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            request_timeout_secs: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Authentication gate configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_realm")]
    pub realm: String,

    #[serde(default)]
    pub users: Vec<UserCredentials>,

    #[serde(default)]
    pub tokens: Vec<String>,
}

/// One Basic-auth account
#[derive(Debug, Clone, Deserialize)]
pub struct UserCredentials {
    pub name: String,
    pub password: String,
}

fn default_realm() -> String {
    "restricted".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            realm: default_realm(),
            users: Vec::new(),
            tokens: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("dashbridge").join("config.toml")),
            Some(PathBuf::from("/etc/dashbridge/config.toml")),
            Some(PathBuf::from("./dashbridge.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Names used by existing deployments
        if let Some(url) = lookup("MQTT_URL") {
            self.broker.url = url;
        }
        if let Some(url) = lookup("INFLUX_URL") {
            self.influx.url = Some(url);
        }
        if let Some(token) = lookup("INFLUXDB_TOKEN") {
            self.influx.token = Some(token);
        }
        if let Some(dir) = lookup("STATIC_ASSETS") {
            self.server.static_assets = Some(dir);
        }

        // Server overrides
        if let Some(host) = lookup("DASHBRIDGE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("DASHBRIDGE_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        // Logging overrides
        if let Some(level) = lookup("DASHBRIDGE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("DASHBRIDGE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker.settings()?;

        if self.broker.max_packet_bytes == 0 || self.broker.max_packet_bytes > MQTT_MAX_PACKET_BYTES {
            return Err(ConfigError::Invalid(format!(
                "broker.max_packet_bytes must be between 1 and {}",
                MQTT_MAX_PACKET_BYTES
            )));
        }

        if self.relay.delivery_capacity == 0 {
            return Err(ConfigError::Invalid(
                "relay.delivery_capacity must be at least 1".to_string(),
            ));
        }
        if self.relay.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "relay.max_sessions must be at least 1".to_string(),
            ));
        }

        if self.auth.enabled {
            if self.auth.users.is_empty() && self.auth.tokens.is_empty() {
                return Err(ConfigError::Invalid(
                    "auth is enabled but no users or tokens are configured".to_string(),
                ));
            }
            if self
                .auth
                .users
                .iter()
                .any(|u| u.name.is_empty() || u.password.is_empty())
            {
                return Err(ConfigError::Invalid(
                    "auth.users entries need a non-empty name and password".to_string(),
                ));
            }
            if self.auth.tokens.iter().any(|t| t.is_empty()) {
                return Err(ConfigError::Invalid(
                    "auth.tokens must not contain empty tokens".to_string(),
                ));
            }
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "logging.format must be 'pretty' or 'json', got '{}'",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Dashbridge Configuration
#
# Environment variables override these settings:
# - MQTT_URL
# - INFLUX_URL
# - INFLUXDB_TOKEN
# - STATIC_ASSETS
# - DASHBRIDGE_HOST
# - DASHBRIDGE_PORT
# - DASHBRIDGE_LOG_LEVEL
# - DASHBRIDGE_LOG_FORMAT

[server]
# Server host
host = "0.0.0.0"

# Server port
port = 8080

# Directory with the dashboard build, served for unmatched paths
# static_assets = "./dist"

[broker]
# MQTT broker address
url = "tcp://localhost:1883"

# Each session connects as <prefix>-<session id>
client_id_prefix = "dashbridge"

# How long to wait for the broker to accept a connection (ms)
connect_timeout_ms = 5000

# MQTT keep-alive interval (seconds)
keep_alive_secs = 30

# Pending requests per broker connection
channel_capacity = 64

# Largest MQTT packet accepted from the broker (bytes)
max_packet_bytes = 1048576

# username = ""
# password = ""

[relay]
# Deliveries buffered per session before new ones are dropped
delivery_capacity = 64

# How long a broker callback may wait for buffer space (ms, 0 = never wait)
enqueue_timeout_ms = 0

# How long teardown waits for in-flight writes (ms)
teardown_timeout_ms = 2000

# Maximum concurrent relay sessions
max_sessions = 256

[influx]
# Time-series database proxied under /api/influxdb
# url = "http://localhost:8086"
# token = ""

# Upstream request timeout (seconds)
request_timeout_secs = 30

# Largest request body forwarded upstream (bytes)
max_body_bytes = 10485760

[auth]
# Require credentials on /api routes
enabled = false

realm = "restricted"

# Accepted tokens (X-Token header or ?token= query parameter)
tokens = []

# [[auth.users]]
# name = "admin"
# password = "change-me"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.addr(), "0.0.0.0:8080");
        assert_eq!(config.broker.url, "tcp://localhost:1883");
        assert_eq!(config.relay.delivery_capacity, 64);
        assert_eq!(config.relay.max_sessions, 256);
        assert!(!config.auth.enabled);
        assert_eq!(config.auth.realm, "restricted");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.influx.max_body_bytes, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[broker]
url = "mqtt://broker.local:1884"

[relay]
delivery_capacity = 8
enqueue_timeout_ms = 25

[auth]
enabled = true
tokens = ["secret"]

[[auth.users]]
name = "admin"
password = "pa:ss"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.users[0].password, "pa:ss");
        assert!(config.validate().is_ok());

        let settings = config.broker.settings().unwrap();
        assert_eq!(settings.address.host, "broker.local");
        assert_eq!(settings.address.port, 1884);

        let relay = config.relay.to_relay_config();
        assert_eq!(relay.delivery_capacity, 8);
        assert_eq!(relay.enqueue_timeout, Duration::from_millis(25));
    }

    #[test]
    fn test_load_errors() {
        let err = Config::load(Path::new("/nonexistent/dashbridge.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("MQTT_URL", "tcp://mqtt:1883"),
            ("INFLUX_URL", "http://influx:8086"),
            ("INFLUXDB_TOKEN", "tok"),
            ("DASHBRIDGE_PORT", "9000"),
            ("DASHBRIDGE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.broker.url, "tcp://mqtt:1883");
        assert_eq!(config.influx.url.as_deref(), Some("http://influx:8086"));
        assert_eq!(config.influx.token.as_deref(), Some("tok"));
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.broker.url = "http://broker:1883".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.relay.delivery_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.broker.max_packet_bytes = 0;
        assert!(config.validate().is_err());
        config.broker.max_packet_bytes = MQTT_MAX_PACKET_BYTES + 1;
        assert!(config.validate().is_err());
        config.broker.max_packet_bytes = 64 * 1024;
        assert!(config.validate().is_ok());
        assert_eq!(config.broker.settings().unwrap().max_packet_bytes, 64 * 1024);

        let mut config = Config::default();
        config.auth.enabled = true;
        assert!(config.validate().is_err());

        config.auth.users.push(UserCredentials {
            name: "admin".to_string(),
            password: String::new(),
        });
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }
}
