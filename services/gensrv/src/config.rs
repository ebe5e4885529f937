//! Service configuration
//!
//! Loaded from `gensrv.yaml` with `GENSRV_` environment overrides, nested
//! keys separated by `__` (e.g. `GENSRV_MQTT__HOST=broker`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GenSrvError, Result};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "GENSRV_";

/// Directory holding `gensrv.yaml` and `layouts/` when no config file is given
pub const DEFAULT_CONFIG_DIR: &str = "config";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    /// Register layout file, relative paths resolve against the config file
    #[serde(default = "default_layout_file")]
    pub layout_file: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service: ServiceSection::default(),
            transport: TransportConfig::default(),
            mqtt: MqttConfig::default(),
            commands: CommandConfig::default(),
            layout_file: default_layout_file(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    #[default]
    Rtu,
    /// Modbus TCP, usually through a serial gateway
    Tcp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    #[default]
    None,
    Even,
    Odd,
}

/// Register-table link to the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: LinkMode,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: ParityConfig,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_tcp_host")]
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    /// Per-request response timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: LinkMode::default(),
            device: default_device(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: ParityConfig::default(),
            stop_bits: default_stop_bits(),
            host: default_tcp_host(),
            port: default_tcp_port(),
            slave_id: default_slave_id(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Endpoint text for logs
    pub fn endpoint(&self) -> String {
        match self.mode {
            LinkMode::Rtu => format!("{}@{} (slave {})", self.device, self.baud_rate, self.slave_id),
            LinkMode::Tcp => format!("{}:{} (slave {})", self.host, self.port, self.slave_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_service_name")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Root of the state, availability and command topics
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_true")]
    pub retain_state: bool,
    /// Delay before polling the event loop again after a connection error
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_service_name(),
            username: None,
            password: None,
            base_topic: default_base_topic(),
            qos: default_qos(),
            keep_alive_secs: default_keep_alive_secs(),
            retain_state: true,
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl MqttConfig {
    pub fn state_topic(&self) -> String {
        format!("{}/state", self.base_topic)
    }

    pub fn availability_topic(&self) -> String {
        format!("{}/availability", self.base_topic)
    }

    pub fn command_topic(&self, identifier: &str) -> String {
        format!("{}/command/{}", self.base_topic, identifier)
    }

    /// Command identifier of a topic under `<base>/command/`
    pub fn command_identifier<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.base_topic.as_str())?;
        let id = rest.strip_prefix("/command/")?;
        (!id.is_empty() && !id.contains('/')).then_some(id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Minimum gap between any two dispatched commands
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `info,gensrv=debug`
    #[serde(default)]
    pub level: Option<String>,
    /// Directory for daily log files; console only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub json: bool,
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            dir: None,
            json: false,
            max_files: default_max_log_files(),
        }
    }
}

fn default_service_name() -> String {
    "gensrv".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_device() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_tcp_host() -> String {
    "127.0.0.1".to_string()
}
fn default_tcp_port() -> u16 {
    502
}
fn default_slave_id() -> u8 {
    1
}
fn default_timeout_ms() -> u64 {
    1000
}
fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_base_topic() -> String {
    "genset".to_string()
}
fn default_qos() -> u8 {
    1
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}
fn default_cooldown_ms() -> u64 {
    5000
}
fn default_channel_capacity() -> usize {
    16
}
fn default_max_log_files() -> usize {
    14
}
fn default_layout_file() -> PathBuf {
    PathBuf::from("layouts/genset_v1.yaml")
}

impl ServiceConfig {
    /// Load file plus environment, resolve the layout path, validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config: ServiceConfig = common::load_layered(path, ENV_PREFIX)
            .map_err(|e| GenSrvError::config(e.to_string()))?;
        config.layout_file = config.resolve_layout_path(path);
        config.validate()?;
        Ok(config)
    }

    fn resolve_layout_path(&self, config_path: Option<&Path>) -> PathBuf {
        if self.layout_file.is_absolute() {
            return self.layout_file.clone();
        }
        let dir = match config_path {
            Some(path) => path.parent().unwrap_or_else(|| Path::new("")),
            None => Path::new(DEFAULT_CONFIG_DIR),
        };
        dir.join(&self.layout_file)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.service.poll_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.commands.cooldown_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.poll_interval_ms == 0 {
            return Err(invalid("service.poll_interval_ms", "must be greater than zero"));
        }

        let t = &self.transport;
        if t.slave_id == 0 {
            return Err(invalid("transport.slave_id", "0 is the broadcast address"));
        }
        if t.timeout_ms == 0 {
            return Err(invalid("transport.timeout_ms", "must be greater than zero"));
        }
        match t.mode {
            LinkMode::Rtu => {
                if t.device.is_empty() {
                    return Err(invalid("transport.device", "must not be empty"));
                }
                if !(5..=8).contains(&t.data_bits) {
                    return Err(invalid("transport.data_bits", "must be 5, 6, 7 or 8"));
                }
                if !matches!(t.stop_bits, 1 | 2) {
                    return Err(invalid("transport.stop_bits", "must be 1 or 2"));
                }
                if t.baud_rate == 0 {
                    return Err(invalid("transport.baud_rate", "must be greater than zero"));
                }
            },
            LinkMode::Tcp => {
                if t.host.is_empty() || t.port == 0 {
                    return Err(invalid("transport.host", "host and port are required"));
                }
            },
        }
        if t.timeout_ms >= self.service.poll_interval_ms {
            warn!(
                "transport.timeout_ms ({}) is not below the poll interval ({}ms), slow replies will skip ticks",
                t.timeout_ms, self.service.poll_interval_ms
            );
        }

        let m = &self.mqtt;
        if m.host.is_empty() || m.port == 0 {
            return Err(invalid("mqtt.host", "host and port are required"));
        }
        if m.client_id.is_empty() {
            return Err(invalid("mqtt.client_id", "must not be empty"));
        }
        if m.qos > 2 {
            return Err(invalid("mqtt.qos", "must be 0, 1 or 2"));
        }
        if m.base_topic.is_empty()
            || m.base_topic.ends_with('/')
            || m.base_topic.contains(['+', '#'])
        {
            return Err(invalid(
                "mqtt.base_topic",
                "must be non-empty, without wildcards or a trailing '/'",
            ));
        }
        if m.keep_alive_secs < 5 {
            return Err(invalid("mqtt.keep_alive_secs", "must be at least 5"));
        }

        if self.commands.channel_capacity == 0 {
            return Err(invalid("commands.channel_capacity", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> GenSrvError {
    GenSrvError::config(format!("{}: {}", field, reason))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.layout_file, PathBuf::from("layouts/genset_v1.yaml"));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.cooldown(), Duration::from_secs(5));
        assert_eq!(config.mqtt.state_topic(), "genset/state");
    }

    #[test]
    fn test_load_resolves_layout_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gensrv.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "service:\n  poll_interval_ms: 500\ntransport:\n  mode: tcp\n  host: 10.0.0.5\n  timeout_ms: 300\nlayout_file: layouts/custom.yaml"
        )
        .unwrap();

        let config = ServiceConfig::load(Some(&path)).unwrap();
        assert_eq!(config.transport.mode, LinkMode::Tcp);
        assert_eq!(config.transport.host, "10.0.0.5");
        assert_eq!(config.service.poll_interval_ms, 500);
        assert_eq!(config.layout_file, dir.path().join("layouts/custom.yaml"));
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn test_layout_without_config_file_resolves_in_default_dir() {
        let config = ServiceConfig::default();
        assert_eq!(
            config.resolve_layout_path(None),
            PathBuf::from("config/layouts/genset_v1.yaml")
        );
        assert_eq!(
            config.resolve_layout_path(Some(Path::new("/etc/gensrv/gensrv.yaml"))),
            PathBuf::from("/etc/gensrv/layouts/genset_v1.yaml")
        );

        let absolute = ServiceConfig {
            layout_file: PathBuf::from("/opt/layouts/v2.yaml"),
            ..ServiceConfig::default()
        };
        assert_eq!(
            absolute.resolve_layout_path(None),
            PathBuf::from("/opt/layouts/v2.yaml")
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ServiceConfig::default();
        config.mqtt.qos = 3;
        assert!(config.validate().unwrap_err().to_string().contains("mqtt.qos"));

        let mut config = ServiceConfig::default();
        config.mqtt.base_topic = "genset/#".into();
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.transport.stop_bits = 3;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.service.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_command_identifier_from_topic() {
        let mqtt = MqttConfig::default();
        assert_eq!(mqtt.command_topic("start"), "genset/command/start");
        assert_eq!(mqtt.command_identifier("genset/command/start"), Some("start"));
        assert_eq!(mqtt.command_identifier("genset/command/"), None);
        assert_eq!(mqtt.command_identifier("genset/command/a/b"), None);
        assert_eq!(mqtt.command_identifier("gensetx/command/start"), None);
        assert_eq!(mqtt.command_identifier("genset/state"), None);
    }
}
