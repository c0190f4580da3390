//! JSON codec for gateway entities
//!
//! Decoding distinguishes "no data" (`Ok(None)`, for a missing or blank
//! payload) from a malformed payload (`Err(CodecError::Malformed)`).

use crate::data::GatewayData;
use crate::error::CodecError;

#[derive(Debug, Clone, Copy)]
pub struct DataCodec {
    pretty: bool,
}

impl Default for DataCodec {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl DataCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-line output, for bandwidth-sensitive links
    pub fn compact() -> Self {
        Self { pretty: false }
    }

    pub fn encode<T: GatewayData>(&self, data: &T) -> Result<String, CodecError> {
        let text = if self.pretty {
            serde_json::to_string_pretty(data)?
        } else {
            serde_json::to_string(data)?
        };
        Ok(text)
    }

    pub fn decode<T: GatewayData>(&self, payload: &str) -> Result<Option<T>, CodecError> {
        if payload.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(payload)?))
    }

    /// Same as [`DataCodec::decode`], treating an absent payload as no data
    pub fn decode_optional<T: GatewayData>(&self, payload: Option<&str>) -> Result<Option<T>, CodecError> {
        match payload {
            Some(text) => self.decode(text),
            None => Ok(None),
        }
    }

    pub fn decode_bytes<T: GatewayData>(&self, payload: &[u8]) -> Result<Option<T>, CodecError> {
        let text = std::str::from_utf8(payload)?;
        self.decode(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ActuatorData, SensorData, SystemPerformanceData};

    #[test]
    fn test_sensor_round_trip() {
        let codec = DataCodec::new();
        let sensor = SensorData::new("TempSensor", 1, 23.5).with_location("greenhouse");

        let json = codec.encode(&sensor).unwrap();
        let decoded: SensorData = codec.decode(&json).unwrap().unwrap();
        assert_eq!(decoded, sensor);
        assert_eq!(codec.encode(&decoded).unwrap(), json);
    }

    #[test]
    fn test_actuator_round_trip() {
        let codec = DataCodec::compact();
        let mut cmd = ActuatorData::command("HumidifierActuator", 2, 1, 42.125);
        cmd.state_data = "ON".to_string();
        let response = cmd.to_response(0);

        for data in [cmd, response] {
            let json = codec.encode(&data).unwrap();
            assert!(!json.contains('\n'));
            let decoded: ActuatorData = codec.decode(&json).unwrap().unwrap();
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn test_system_performance_round_trip() {
        let codec = DataCodec::new();
        let perf = SystemPerformanceData {
            cpu_util: 12.345_678,
            mem_util: 67.5,
            disk_util: crate::data::UNAVAILABLE,
            ..Default::default()
        };

        let decoded: SystemPerformanceData = codec.decode(&codec.encode(&perf).unwrap()).unwrap().unwrap();
        assert_eq!(decoded, perf);
        assert_eq!(decoded.cpu_util.to_bits(), perf.cpu_util.to_bits());
        assert!(!decoded.is_disk_available());
    }

    #[test]
    fn test_empty_payload_is_no_data() {
        let codec = DataCodec::new();
        assert!(codec.decode::<SensorData>("").unwrap().is_none());
        assert!(codec.decode::<ActuatorData>("   \n").unwrap().is_none());
        assert!(codec.decode_optional::<SystemPerformanceData>(None).unwrap().is_none());
        assert!(codec.decode_optional::<SensorData>(Some("")).unwrap().is_none());
        assert!(codec.decode_optional::<ActuatorData>(None).unwrap().is_none());
        assert!(codec.decode_bytes::<SystemPerformanceData>(b"").unwrap().is_none());
    }

    #[test]
    fn test_malformed_payload_is_error() {
        let codec = DataCodec::new();
        assert!(matches!(
            codec.decode::<SensorData>("{\"value\": "),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            codec.decode::<SensorData>("{\"value\": \"hot\"}"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            codec.decode_bytes::<ActuatorData>(&[0xff, 0xfe]),
            Err(CodecError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_partial_payload_uses_defaults() {
        let codec = DataCodec::new();
        let sensor: SensorData = codec.decode(r#"{"name": "probe", "value": 1.5}"#).unwrap().unwrap();
        assert_eq!(sensor.name, "probe");
        assert_eq!(sensor.value, 1.5);
        assert_eq!(sensor.type_id, crate::data::DEFAULT_TYPE_ID);
    }
}
