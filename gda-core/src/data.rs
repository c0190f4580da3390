//! Domain entities exchanged between devices and the gateway
//!
//! Field names on the wire follow the device-side JSON contract
//! (`typeID`, `timeStamp`, `isResponse`, ...). Missing fields decode to
//! their defaults so older devices that omit status fields still parse.

use crate::resources::DataKind;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const NOT_SET: &str = "Not Set";
pub const DEFAULT_TYPE_ID: i32 = 0;
pub const DEFAULT_STATUS: i32 = 0;

/// Value reported for a utilisation metric that could not be measured
pub const UNAVAILABLE: f32 = -1.0;

/// Entity that can travel through the codec
pub trait GatewayData: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: DataKind;
}

/// Reading produced by an edge device sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorData {
    pub name: String,
    #[serde(rename = "typeID")]
    pub type_id: i32,
    #[serde(rename = "timeStamp")]
    pub timestamp: DateTime<Utc>,
    pub value: f32,
    #[serde(rename = "locationID")]
    pub location_id: String,
    #[serde(rename = "statusCode")]
    pub status_code: i32,
    #[serde(rename = "hasError")]
    pub has_error: bool,
}

impl Default for SensorData {
    fn default() -> Self {
        Self {
            name: NOT_SET.to_string(),
            type_id: DEFAULT_TYPE_ID,
            timestamp: Utc::now(),
            value: 0.0,
            location_id: NOT_SET.to_string(),
            status_code: DEFAULT_STATUS,
            has_error: false,
        }
    }
}

impl SensorData {
    pub fn new(name: impl Into<String>, type_id: i32, value: f32) -> Self {
        Self {
            name: name.into(),
            type_id,
            value,
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = location_id.into();
        self
    }
}

impl GatewayData for SensorData {
    const KIND: DataKind = DataKind::Sensor;
}

/// Actuator command (request) or its acknowledgement (response)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorData {
    pub name: String,
    #[serde(rename = "typeID")]
    pub type_id: i32,
    pub command: i32,
    pub value: f32,
    #[serde(rename = "stateData")]
    pub state_data: String,
    #[serde(rename = "timeStamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "isResponse")]
    pub is_response: bool,
    #[serde(rename = "locationID")]
    pub location_id: String,
    #[serde(rename = "statusCode")]
    pub status_code: i32,
    #[serde(rename = "hasError")]
    pub has_error: bool,
}

impl Default for ActuatorData {
    fn default() -> Self {
        Self {
            name: NOT_SET.to_string(),
            type_id: DEFAULT_TYPE_ID,
            command: 0,
            value: 0.0,
            state_data: String::new(),
            timestamp: Utc::now(),
            is_response: false,
            location_id: NOT_SET.to_string(),
            status_code: DEFAULT_STATUS,
            has_error: false,
        }
    }
}

impl ActuatorData {
    pub fn command(name: impl Into<String>, type_id: i32, command: i32, value: f32) -> Self {
        Self {
            name: name.into(),
            type_id,
            command,
            value,
            ..Default::default()
        }
    }

    /// Builds the acknowledgement for this command, stamped now
    pub fn to_response(&self, status_code: i32) -> Self {
        Self {
            is_response: true,
            status_code,
            has_error: status_code != DEFAULT_STATUS,
            timestamp: Utc::now(),
            ..self.clone()
        }
    }
}

impl GatewayData for ActuatorData {
    const KIND: DataKind = DataKind::Actuator;
}

/// Host utilisation snapshot; negative values mean "unavailable"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemPerformanceData {
    pub name: String,
    #[serde(rename = "timeStamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "cpuUtil")]
    pub cpu_util: f32,
    #[serde(rename = "memUtil")]
    pub mem_util: f32,
    #[serde(rename = "diskUtil")]
    pub disk_util: f32,
    #[serde(rename = "locationID")]
    pub location_id: String,
}

impl Default for SystemPerformanceData {
    fn default() -> Self {
        Self {
            name: NOT_SET.to_string(),
            timestamp: Utc::now(),
            cpu_util: UNAVAILABLE,
            mem_util: UNAVAILABLE,
            disk_util: UNAVAILABLE,
            location_id: NOT_SET.to_string(),
        }
    }
}

impl SystemPerformanceData {
    pub fn is_cpu_available(&self) -> bool {
        self.cpu_util >= 0.0
    }

    pub fn is_mem_available(&self) -> bool {
        self.mem_util >= 0.0
    }

    pub fn is_disk_available(&self) -> bool {
        self.disk_util >= 0.0
    }
}

impl GatewayData for SystemPerformanceData {
    const KIND: DataKind = DataKind::SystemPerformance;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let sensor = SensorData::default();
        assert_eq!(sensor.name, NOT_SET);
        assert_eq!(sensor.type_id, DEFAULT_TYPE_ID);

        let perf = SystemPerformanceData::default();
        assert!(!perf.is_cpu_available());
        assert!(!perf.is_mem_available());
        assert!(!perf.is_disk_available());
    }

    #[test]
    fn test_actuator_response() {
        let cmd = ActuatorData::command("hvac", 3, 1, 22.0);
        assert!(!cmd.is_response);

        let ok = cmd.to_response(0);
        assert!(ok.is_response);
        assert!(!ok.has_error);
        assert_eq!(ok.name, "hvac");
        assert_eq!(ok.value, 22.0);

        let failed = cmd.to_response(-1);
        assert!(failed.has_error);
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(ActuatorData::command("led", 7, 1, 0.0)).unwrap();
        assert_eq!(value["typeID"], 7);
        assert_eq!(value["isResponse"], false);
        assert!(value.get("timeStamp").is_some());
        assert!(value.get("type_id").is_none());
    }
}
