//! Gateway Device Application core
//!
//! Owns the pub/sub connections to edge devices, the resource namespace
//! they publish on, the JSON codec for their payloads and the router that
//! dispatches decoded messages to pluggable collaborators. Host telemetry is
//! collected locally and fed through the same router.

pub mod codec;
pub mod config;
pub mod connection;
pub mod data;
pub mod error;
pub mod listeners;
pub mod resources;
pub mod router;
pub mod telemetry;

pub use codec::DataCodec;
pub use connection::{ConnectionState, InboundMessage, MessageSender, MqttClientConnector, PubSubClient};
pub use data::{ActuatorData, GatewayData, SensorData, SystemPerformanceData};
pub use error::{ActuatorError, CodecError, ConfigError, ResourceError, RouterError};
pub use listeners::{
    ActuatorDataListener, DataMessageListener, PersistenceSink, PublishingActuatorExecutor, UpstreamListener,
};
pub use resources::{DataKind, ResourceName};
pub use router::{ManagerState, MessageRouter, Route};
pub use telemetry::{SystemPerformanceCollector, TelemetryKind, TelemetrySource};

/// Resources the gateway subscribes to on its device-facing connector
pub const DEVICE_SUBSCRIPTIONS: [ResourceName; 3] = [
    ResourceName::CDA_SENSOR_MSG_RESOURCE,
    ResourceName::CDA_SYSTEM_PERF_MSG_RESOURCE,
    ResourceName::CDA_ACTUATOR_RESPONSE_RESOURCE,
];
