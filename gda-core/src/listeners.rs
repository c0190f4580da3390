//! Collaborator contracts the router dispatches to
//!
//! The router never knows what sits behind these traits: a device-side
//! executor, a cloud bridge, a cache. Collaborators are async so they can do
//! their own I/O without blocking the dispatch task.

use crate::codec::DataCodec;
use crate::connection::{qos_level, PubSubClient};
use crate::data::{ActuatorData, SensorData, SystemPerformanceData};
use crate::error::ActuatorError;
use crate::resources::ResourceName;
use async_trait::async_trait;
use rumqttc::QoS;
use std::sync::Arc;
use tracing::debug;

/// Entry points for decoded gateway traffic
///
/// Every handler returns false when given no data.
#[async_trait]
pub trait DataMessageListener: Send + Sync {
    async fn handle_sensor_message(&self, resource: ResourceName, data: Option<SensorData>) -> bool;

    async fn handle_system_performance_message(
        &self,
        resource: ResourceName,
        data: Option<SystemPerformanceData>,
    ) -> bool;

    async fn handle_actuator_command_request(&self, resource: ResourceName, data: Option<ActuatorData>) -> bool;

    async fn handle_actuator_command_response(&self, resource: ResourceName, data: Option<ActuatorData>) -> bool;

    /// Raw payload entry; decodes according to the resource's route
    async fn handle_incoming_message(&self, resource: ResourceName, payload: &str) -> bool;
}

/// Executes actuator commands, optionally answering with a response
///
/// `Ok(None)` means the command was accepted and the answer, if any, comes
/// back later through another channel.
#[async_trait]
pub trait ActuatorDataListener: Send + Sync {
    async fn on_actuator_command(
        &self,
        resource: ResourceName,
        command: ActuatorData,
    ) -> Result<Option<ActuatorData>, ActuatorError>;
}

/// Forwards gateway traffic to an upstream service
#[async_trait]
pub trait UpstreamListener: Send + Sync {
    async fn on_sensor_data(&self, resource: ResourceName, data: &SensorData);

    async fn on_system_performance_data(&self, resource: ResourceName, data: &SystemPerformanceData);

    async fn on_actuator_response(&self, resource: ResourceName, data: &ActuatorData);
}

/// Stores gateway traffic
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn store_sensor_data(&self, resource: ResourceName, data: &SensorData) -> bool;

    async fn store_system_performance_data(&self, resource: ResourceName, data: &SystemPerformanceData) -> bool;

    async fn store_actuator_data(&self, resource: ResourceName, data: &ActuatorData) -> bool;
}

/// Device-side executor that relays commands over a connector
///
/// The command is published unchanged on the resource it was routed for.
/// Acknowledgements come back asynchronously from the device, so no
/// response is produced here.
pub struct PublishingActuatorExecutor {
    client: Arc<dyn PubSubClient>,
    codec: DataCodec,
    qos: QoS,
}

impl PublishingActuatorExecutor {
    pub fn new(client: Arc<dyn PubSubClient>, codec: DataCodec, qos: QoS) -> Self {
        Self { client, codec, qos }
    }
}

#[async_trait]
impl ActuatorDataListener for PublishingActuatorExecutor {
    async fn on_actuator_command(
        &self,
        resource: ResourceName,
        command: ActuatorData,
    ) -> Result<Option<ActuatorData>, ActuatorError> {
        if command.is_response {
            return Err(ActuatorError::NotACommand(command.name));
        }

        let payload = self.codec.encode(&command)?;
        if !self.client.publish_message(resource, &payload, qos_level(self.qos)).await {
            return Err(ActuatorError::NotRelayed {
                connector: self.client.name().to_string(),
                name: command.name,
            });
        }

        debug!("Actuator command {} relayed via {}", command.name, self.client.name());
        Ok(None)
    }
}
