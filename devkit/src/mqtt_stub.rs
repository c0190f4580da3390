/*!
Mock pub/sub connector for development without a broker

Honours the same contract as the MQTT connector (state checks, QoS
normalisation, subscription bookkeeping, topic validation on arrival) and
records everything it is asked to do. Arrivals are simulated with
[`MockPubSubClient::simulate_incoming`].
*/

use async_trait::async_trait;
use gda_core::connection::{normalize_qos, qos_from_level};
use gda_core::{ConnectionState, DataCodec, InboundMessage, MessageSender, PubSubClient, ResourceName};
use gda_core::{ActuatorData, SensorData, SystemPerformanceData};
use parking_lot::{Mutex, RwLock};
use rumqttc::QoS;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct MockMessage {
    pub resource: ResourceName,
    pub payload: String,
    pub qos: QoS,
}

/// One contract call, in the order the connector received it
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Connect,
    Disconnect,
    Publish(ResourceName),
    Subscribe(ResourceName, QoS),
    Unsubscribe(ResourceName),
}

pub struct MockPubSubClient {
    name: String,
    default_qos: QoS,
    state: watch::Sender<ConnectionState>,
    handler: RwLock<Option<MessageSender>>,
    subscriptions: Mutex<HashMap<ResourceName, QoS>>,
    published: Mutex<Vec<MockMessage>>,
    calls: Mutex<Vec<MockCall>>,
    fail_connect: AtomicBool,
}

impl MockPubSubClient {
    pub fn new(name: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            name: name.into(),
            default_qos: QoS::AtMostOnce,
            state,
            handler: RwLock::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
        }
    }

    pub fn with_default_qos(mut self, level: i32) -> Self {
        self.default_qos = qos_from_level(level).unwrap_or(QoS::AtMostOnce);
        self
    }

    /// Makes every subsequent connect attempt fail, as an unreachable broker would
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    fn require_connected(&self, operation: &str, resource: ResourceName) -> bool {
        if self.connection_state() != ConnectionState::Connected {
            warn!("[MOCK] {} not connected. Unable to {} '{}'", self.name, operation, resource);
            return false;
        }
        true
    }

    /// Simulates a message arriving from the broker
    ///
    /// Returns false when the message is dropped: unknown topic, invalid
    /// UTF-8, or no handler registered.
    pub fn simulate_incoming(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        let resource = match ResourceName::from_topic(topic) {
            Ok(resource) => resource,
            Err(e) => {
                warn!("[MOCK] Dropping message: {}", e);
                return false;
            }
        };
        let payload = match String::from_utf8(payload.into()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("[MOCK] Dropping non UTF-8 message on '{}': {}", topic, e);
                return false;
            }
        };

        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            warn!("[MOCK] No message handler registered on {}", self.name);
            return false;
        };

        info!("[MOCK] Simulated incoming on {}: {} bytes", topic, payload.len());
        handler
            .send(InboundMessage {
                resource,
                payload,
                qos: QoS::AtLeastOnce,
            })
            .is_ok()
    }

    /// Drops the session; tracked subscriptions survive for the reconnect
    pub fn simulate_connection_loss(&self) {
        if self.connection_state() == ConnectionState::Connected {
            self.state.send_replace(ConnectionState::Reconnecting);
        }
    }

    pub fn simulate_reconnect(&self) {
        if self.connection_state() == ConnectionState::Reconnecting {
            self.state.send_replace(ConnectionState::Connected);
        }
    }

    pub fn published(&self) -> Vec<MockMessage> {
        self.published.lock().clone()
    }

    pub fn published_on(&self, resource: ResourceName) -> Vec<MockMessage> {
        self.published
            .lock()
            .iter()
            .filter(|message| message.resource == resource)
            .cloned()
            .collect()
    }

    /// Parses the last payload published on `resource` as JSON
    pub fn last_json_on(&self, resource: ResourceName) -> anyhow::Result<Option<Value>> {
        match self.published_on(resource).last() {
            Some(message) => Ok(Some(serde_json::from_str(&message.payload)?)),
            None => Ok(None),
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
        self.calls.lock().clear();
    }
}

impl Default for MockPubSubClient {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl PubSubClient for MockPubSubClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect_client(&self) -> bool {
        self.record(MockCall::Connect);
        if self.connection_state() != ConnectionState::Disconnected {
            warn!("[MOCK] {} already connected", self.name);
            return false;
        }
        if self.fail_connect.load(Ordering::Relaxed) {
            warn!("[MOCK] {} connect refused", self.name);
            return false;
        }
        self.state.send_replace(ConnectionState::Connected);
        true
    }

    async fn disconnect_client(&self) -> bool {
        self.record(MockCall::Disconnect);
        if self.connection_state() == ConnectionState::Disconnected {
            warn!("[MOCK] {} not connected", self.name);
            return false;
        }
        self.subscriptions.lock().clear();
        self.state.send_replace(ConnectionState::Disconnected);
        true
    }

    async fn publish_message(&self, resource: ResourceName, payload: &str, qos: i32) -> bool {
        self.record(MockCall::Publish(resource));
        if payload.is_empty() || !self.require_connected("publish to", resource) {
            return false;
        }
        self.published.lock().push(MockMessage {
            resource,
            payload: payload.to_string(),
            qos: normalize_qos(qos, self.default_qos),
        });
        true
    }

    async fn subscribe_to_topic(&self, resource: ResourceName, qos: i32) -> bool {
        let qos = normalize_qos(qos, self.default_qos);
        self.record(MockCall::Subscribe(resource, qos));
        if !self.require_connected("subscribe to", resource) {
            return false;
        }
        self.subscriptions.lock().insert(resource, qos);
        true
    }

    async fn unsubscribe_from_topic(&self, resource: ResourceName) -> bool {
        self.record(MockCall::Unsubscribe(resource));
        if !self.require_connected("unsubscribe from", resource) {
            return false;
        }
        self.subscriptions.lock().remove(&resource);
        true
    }

    fn set_message_handler(&self, handler: MessageSender) -> bool {
        *self.handler.write() = Some(handler);
        true
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn active_subscriptions(&self) -> Vec<ResourceName> {
        self.subscriptions.lock().keys().copied().collect()
    }
}

/// Builds device payloads the way a constrained device would send them
pub struct GatewayMessageBuilder {
    codec: DataCodec,
}

impl GatewayMessageBuilder {
    pub fn new() -> Self {
        Self {
            codec: DataCodec::compact(),
        }
    }

    pub fn sensor(&self, name: &str, value: f32) -> String {
        self.encode(&SensorData::new(name, 1, value).with_location("constraineddevice001"))
    }

    pub fn system_performance(&self, cpu: f32, mem: f32, disk: f32) -> String {
        self.encode(&SystemPerformanceData {
            name: "ConstrainedDeviceSystemPerformance".to_string(),
            cpu_util: cpu,
            mem_util: mem,
            disk_util: disk,
            ..Default::default()
        })
    }

    pub fn actuator_command(&self, name: &str, command: i32, value: f32) -> String {
        self.encode(&ActuatorData::command(name, 1, command, value))
    }

    pub fn actuator_response(&self, name: &str, status_code: i32) -> String {
        self.encode(&ActuatorData::command(name, 1, 1, 0.0).to_response(status_code))
    }

    fn encode<T: gda_core::GatewayData>(&self, data: &T) -> String {
        // encoding plain entities cannot fail
        self.codec.encode(data).unwrap_or_default()
    }
}

impl Default for GatewayMessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
