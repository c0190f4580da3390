//! Resource namespace: the closed set of pub/sub channels the gateway knows.
//!
//! Every topic published or subscribed by the gateway is one of these
//! entries. Inbound topic strings that do not map to an entry are rejected
//! with [`ResourceError::UnknownTopic`].

use crate::error::ResourceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of payload carried on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Sensor,
    Actuator,
    SystemPerformance,
    Management,
}

/// Logical channels used for publish/subscribe addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum ResourceName {
    GDA_MGMT_STATUS_MSG_RESOURCE,
    GDA_MGMT_STATUS_CMD_RESOURCE,
    GDA_SYSTEM_PERF_MSG_RESOURCE,
    CDA_MGMT_STATUS_MSG_RESOURCE,
    CDA_MGMT_STATUS_CMD_RESOURCE,
    CDA_ACTUATOR_CMD_RESOURCE,
    CDA_ACTUATOR_RESPONSE_RESOURCE,
    CDA_SENSOR_MSG_RESOURCE,
    CDA_SYSTEM_PERF_MSG_RESOURCE,
}

impl ResourceName {
    pub const ALL: [ResourceName; 9] = [
        ResourceName::GDA_MGMT_STATUS_MSG_RESOURCE,
        ResourceName::GDA_MGMT_STATUS_CMD_RESOURCE,
        ResourceName::GDA_SYSTEM_PERF_MSG_RESOURCE,
        ResourceName::CDA_MGMT_STATUS_MSG_RESOURCE,
        ResourceName::CDA_MGMT_STATUS_CMD_RESOURCE,
        ResourceName::CDA_ACTUATOR_CMD_RESOURCE,
        ResourceName::CDA_ACTUATOR_RESPONSE_RESOURCE,
        ResourceName::CDA_SENSOR_MSG_RESOURCE,
        ResourceName::CDA_SYSTEM_PERF_MSG_RESOURCE,
    ];

    /// Wire topic string
    pub fn topic(&self) -> &'static str {
        match self {
            ResourceName::GDA_MGMT_STATUS_MSG_RESOURCE => "PIOT/GatewayDevice/MgmtStatusMsg",
            ResourceName::GDA_MGMT_STATUS_CMD_RESOURCE => "PIOT/GatewayDevice/MgmtStatusCmd",
            ResourceName::GDA_SYSTEM_PERF_MSG_RESOURCE => "PIOT/GatewayDevice/SystemPerfMsg",
            ResourceName::CDA_MGMT_STATUS_MSG_RESOURCE => "PIOT/ConstrainedDevice/MgmtStatusMsg",
            ResourceName::CDA_MGMT_STATUS_CMD_RESOURCE => "PIOT/ConstrainedDevice/MgmtStatusCmd",
            ResourceName::CDA_ACTUATOR_CMD_RESOURCE => "PIOT/ConstrainedDevice/ActuatorCmd",
            ResourceName::CDA_ACTUATOR_RESPONSE_RESOURCE => "PIOT/ConstrainedDevice/ActuatorResponse",
            ResourceName::CDA_SENSOR_MSG_RESOURCE => "PIOT/ConstrainedDevice/SensorMsg",
            ResourceName::CDA_SYSTEM_PERF_MSG_RESOURCE => "PIOT/ConstrainedDevice/SystemPerfMsg",
        }
    }

    pub fn data_kind(&self) -> DataKind {
        match self {
            ResourceName::GDA_MGMT_STATUS_MSG_RESOURCE
            | ResourceName::GDA_MGMT_STATUS_CMD_RESOURCE
            | ResourceName::CDA_MGMT_STATUS_MSG_RESOURCE
            | ResourceName::CDA_MGMT_STATUS_CMD_RESOURCE => DataKind::Management,
            ResourceName::CDA_ACTUATOR_CMD_RESOURCE
            | ResourceName::CDA_ACTUATOR_RESPONSE_RESOURCE => DataKind::Actuator,
            ResourceName::CDA_SENSOR_MSG_RESOURCE => DataKind::Sensor,
            ResourceName::GDA_SYSTEM_PERF_MSG_RESOURCE
            | ResourceName::CDA_SYSTEM_PERF_MSG_RESOURCE => DataKind::SystemPerformance,
        }
    }

    /// Maps an inbound topic string back to its resource
    pub fn from_topic(topic: &str) -> Result<Self, ResourceError> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.topic() == topic)
            .ok_or_else(|| ResourceError::UnknownTopic(topic.to_string()))
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

impl FromStr for ResourceName {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_topic(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_topics_are_unique() {
        let topics: HashSet<_> = ResourceName::ALL.iter().map(|r| r.topic()).collect();
        assert_eq!(topics.len(), ResourceName::ALL.len());
    }

    #[test]
    fn test_from_topic() {
        for resource in ResourceName::ALL {
            assert_eq!(ResourceName::from_topic(resource.topic()).unwrap(), resource);
        }
        assert_eq!(
            "PIOT/ConstrainedDevice/SensorMsg".parse::<ResourceName>().unwrap(),
            ResourceName::CDA_SENSOR_MSG_RESOURCE
        );
    }

    #[test]
    fn test_unknown_topic_is_rejected() {
        let err = ResourceName::from_topic("PIOT/ConstrainedDevice/Nope").unwrap_err();
        assert!(matches!(err, ResourceError::UnknownTopic(t) if t == "PIOT/ConstrainedDevice/Nope"));
        assert!(ResourceName::from_topic("").is_err());
        // case matters on the wire
        assert!(ResourceName::from_topic("piot/constraineddevice/sensormsg").is_err());
    }

    #[test]
    fn test_data_kinds() {
        assert_eq!(ResourceName::CDA_SENSOR_MSG_RESOURCE.data_kind(), DataKind::Sensor);
        assert_eq!(ResourceName::CDA_ACTUATOR_RESPONSE_RESOURCE.data_kind(), DataKind::Actuator);
        assert_eq!(ResourceName::GDA_SYSTEM_PERF_MSG_RESOURCE.data_kind(), DataKind::SystemPerformance);
        assert_eq!(ResourceName::GDA_MGMT_STATUS_CMD_RESOURCE.data_kind(), DataKind::Management);
    }
}
