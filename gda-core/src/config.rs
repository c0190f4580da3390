//! Configuration for the gateway
//!
//! Handles:
//! - a key/value source keyed by (section, key), with typed getters
//! - TOML file loading (tables are sections)
//! - typed views for the MQTT connector and the gateway device

use crate::connection::qos_from_level;
use crate::error::ConfigError;
use rumqttc::QoS;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const MQTT_GATEWAY_SERVICE: &str = "Mqtt.GatewayService";
pub const GATEWAY_DEVICE: &str = "GatewayDevice";

pub const HOST_KEY: &str = "host";
pub const PORT_KEY: &str = "port";
pub const KEEP_ALIVE_KEY: &str = "keepAlive";
pub const DEFAULT_QOS_KEY: &str = "defaultQos";
pub const CLIENT_ID_KEY: &str = "clientId";
pub const CONNECT_TIMEOUT_KEY: &str = "connectTimeoutSecs";
pub const RECONNECT_DELAY_KEY: &str = "reconnectDelaySecs";
pub const ENABLE_MQTT_CLIENT_KEY: &str = "enableMqttClient";
pub const ENABLE_SYSTEM_PERF_KEY: &str = "enableSystemPerformance";
pub const POLL_CYCLES_KEY: &str = "pollCycleSecs";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_KEEP_ALIVE: u64 = 60;
pub const DEFAULT_QOS: i32 = 0;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 2;
pub const DEFAULT_POLL_CYCLE_SECS: u64 = 30;

/// Read access to a sectioned key/value configuration
pub trait ConfigSource: Send + Sync {
    /// Raw value, rendered as a string
    fn get_property(&self, section: &str, key: &str) -> Option<String>;

    fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.get_property(section, key)
            .unwrap_or_else(|| default.to_string())
    }

    fn get_integer(&self, section: &str, key: &str, default: i64) -> i64 {
        match self.get_property(section, key) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!("Config [{}] {} = '{}' is not an integer, using {}", section, key, raw, default);
                default
            }),
            None => default,
        }
    }

    fn get_boolean(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get_property(section, key) {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => true,
                "false" | "no" | "off" | "0" => false,
                _ => {
                    warn!("Config [{}] {} = '{}' is not a boolean, using {}", section, key, raw, default);
                    default
                }
            },
            None => default,
        }
    }
}

/// TOML-backed source
#[derive(Debug, Clone, Default)]
pub struct TomlConfigSource {
    table: toml::Table,
}

impl TomlConfigSource {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(Self { table: text.parse()? })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Sections may be a quoted key (`["Mqtt.GatewayService"]`) or a
    /// dotted table path (`[Mqtt.GatewayService]`)
    fn section(&self, section: &str) -> Option<&toml::Table> {
        if let Some(table) = self.table.get(section).and_then(|v| v.as_table()) {
            return Some(table);
        }
        let mut current = &self.table;
        for part in section.split('.') {
            current = current.get(part)?.as_table()?;
        }
        Some(current)
    }
}

impl ConfigSource for TomlConfigSource {
    fn get_property(&self, section: &str, key: &str) -> Option<String> {
        let value = self.section(section)?.get(key)?;
        match value {
            toml::Value::String(s) => Some(s.clone()),
            toml::Value::Integer(i) => Some(i.to_string()),
            toml::Value::Float(f) => Some(f.to_string()),
            toml::Value::Boolean(b) => Some(b.to_string()),
            other => {
                warn!("Config [{}] {} has unsupported type {}", section, key, other.type_str());
                None
            }
        }
    }
}

/// In-memory source, for tests and programmatic setup
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigSource {
    values: HashMap<(String, String), String>,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, section: &str, key: &str, value: impl ToString) -> Self {
        self.values
            .insert((section.to_string(), key.to_string()), value.to_string());
        self
    }
}

impl ConfigSource for MemoryConfigSource {
    fn get_property(&self, section: &str, key: &str) -> Option<String> {
        self.values
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }
}

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttConnectorConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub default_qos: QoS,
    pub client_id: Option<String>,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl Default for MqttConnectorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_MQTT_PORT,
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE),
            default_qos: QoS::AtMostOnce,
            client_id: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
        }
    }
}

impl MqttConnectorConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let section = MQTT_GATEWAY_SERVICE;

        let port = source.get_integer(section, PORT_KEY, DEFAULT_MQTT_PORT as i64);
        let port = u16::try_from(port).unwrap_or_else(|_| {
            warn!("Config [{}] {} = {} out of range, using {}", section, PORT_KEY, port, DEFAULT_MQTT_PORT);
            DEFAULT_MQTT_PORT
        });

        let client_id = source
            .get_property(section, CLIENT_ID_KEY)
            .filter(|id| !id.trim().is_empty());

        Self {
            host: source.get_string(section, HOST_KEY, DEFAULT_HOST),
            port,
            keep_alive: secs(source.get_integer(section, KEEP_ALIVE_KEY, DEFAULT_KEEP_ALIVE as i64)),
            default_qos: default_qos_from(source, section),
            client_id,
            connect_timeout: secs(source.get_integer(section, CONNECT_TIMEOUT_KEY, DEFAULT_CONNECT_TIMEOUT_SECS as i64)),
            reconnect_delay: secs(source.get_integer(section, RECONNECT_DELAY_KEY, DEFAULT_RECONNECT_DELAY_SECS as i64)),
        }
    }

    pub fn broker_addr(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

/// Gateway-wide switches
#[derive(Debug, Clone)]
pub struct GatewayDeviceConfig {
    pub enable_mqtt_client: bool,
    pub enable_system_performance: bool,
    pub poll_cycle: Duration,
    pub default_qos: QoS,
}

impl Default for GatewayDeviceConfig {
    fn default() -> Self {
        Self {
            enable_mqtt_client: true,
            enable_system_performance: true,
            poll_cycle: Duration::from_secs(DEFAULT_POLL_CYCLE_SECS),
            default_qos: QoS::AtMostOnce,
        }
    }
}

impl GatewayDeviceConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let section = GATEWAY_DEVICE;
        let poll = source.get_integer(section, POLL_CYCLES_KEY, DEFAULT_POLL_CYCLE_SECS as i64);

        Self {
            enable_mqtt_client: source.get_boolean(section, ENABLE_MQTT_CLIENT_KEY, true),
            enable_system_performance: source.get_boolean(section, ENABLE_SYSTEM_PERF_KEY, true),
            // a zero period would make tokio's interval panic
            poll_cycle: secs(poll.max(1)),
            default_qos: default_qos_from(source, MQTT_GATEWAY_SERVICE),
        }
    }
}

fn default_qos_from(source: &dyn ConfigSource, section: &str) -> QoS {
    let level = source.get_integer(section, DEFAULT_QOS_KEY, DEFAULT_QOS as i64);
    i32::try_from(level)
        .ok()
        .and_then(qos_from_level)
        .unwrap_or_else(|| {
            warn!("Config [{}] {} = {} is not a QoS level, using {}", section, DEFAULT_QOS_KEY, level, DEFAULT_QOS);
            QoS::AtMostOnce
        })
}

fn secs(value: i64) -> Duration {
    Duration::from_secs(value.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[Mqtt.GatewayService]
host = "broker.local"
port = 8883
keepAlive = 30
defaultQos = 1

[GatewayDevice]
enableMqttClient = false
pollCycleSecs = 10
"#;

    #[test]
    fn test_default_config() {
        let config = MqttConnectorConfig::default();
        assert_eq!(config.port, 1883);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.default_qos, QoS::AtMostOnce);
        assert_eq!(config.broker_addr(), "tcp://localhost:1883");
    }

    #[test]
    fn test_toml_dotted_sections() {
        let source = TomlConfigSource::parse(SAMPLE).unwrap();
        let mqtt = MqttConnectorConfig::from_source(&source);
        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.port, 8883);
        assert_eq!(mqtt.keep_alive, Duration::from_secs(30));
        assert_eq!(mqtt.default_qos, QoS::AtLeastOnce);
        assert!(mqtt.client_id.is_none());

        let device = GatewayDeviceConfig::from_source(&source);
        assert!(!device.enable_mqtt_client);
        assert!(device.enable_system_performance);
        assert_eq!(device.poll_cycle, Duration::from_secs(10));
    }

    #[test]
    fn test_toml_quoted_section() {
        let source = TomlConfigSource::parse("[\"Mqtt.GatewayService\"]\nhost = \"quoted\"\n").unwrap();
        assert_eq!(source.get_string(MQTT_GATEWAY_SERVICE, HOST_KEY, DEFAULT_HOST), "quoted");
    }

    #[test]
    fn test_typed_getters_fall_back() {
        let source = MemoryConfigSource::new()
            .set(GATEWAY_DEVICE, ENABLE_MQTT_CLIENT_KEY, "maybe")
            .set(GATEWAY_DEVICE, POLL_CYCLES_KEY, "soon")
            .set(MQTT_GATEWAY_SERVICE, DEFAULT_QOS_KEY, 7)
            .set(MQTT_GATEWAY_SERVICE, PORT_KEY, 70000);

        assert!(source.get_boolean(GATEWAY_DEVICE, ENABLE_MQTT_CLIENT_KEY, true));
        assert_eq!(source.get_integer(GATEWAY_DEVICE, POLL_CYCLES_KEY, 5), 5);
        assert_eq!(source.get_string("Nope", "missing", "fallback"), "fallback");

        let mqtt = MqttConnectorConfig::from_source(&source);
        assert_eq!(mqtt.default_qos, QoS::AtMostOnce);
        assert_eq!(mqtt.port, DEFAULT_MQTT_PORT);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let source = TomlConfigSource::load(file.path()).unwrap();
        assert_eq!(source.get_integer(MQTT_GATEWAY_SERVICE, PORT_KEY, 0), 8883);
        assert!(TomlConfigSource::load("/definitely/not/here.toml").is_err());
        assert!(TomlConfigSource::parse("[broken").is_err());
    }
}
