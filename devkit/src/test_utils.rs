/*!
Test harness for the gateway router

- `RecordingListener` records every collaborator call it receives
- `StaticSource` reports a fixed telemetry value
- `TestHarness` wires a router to a mock connector and a recording listener
*/

use crate::mqtt_stub::MockPubSubClient;
use async_trait::async_trait;
use gda_core::telemetry::{TelemetryKind, TelemetrySource};
use gda_core::{
    ActuatorData, ActuatorDataListener, ActuatorError, DataCodec, DataMessageListener, MessageRouter, PersistenceSink,
    ResourceName, SensorData, SystemPerformanceData, UpstreamListener, DEVICE_SUBSCRIPTIONS,
};
use parking_lot::Mutex;
use rumqttc::QoS;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Installs a test-friendly tracing subscriber once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gda_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Sensor(ResourceName, SensorData),
    SystemPerformance(ResourceName, SystemPerformanceData),
    ActuatorRequest(ResourceName, ActuatorData),
    ActuatorResponse(ResourceName, ActuatorData),
    Incoming(ResourceName, String),
    Executed(ResourceName, ActuatorData),
    UpstreamSensor(ResourceName, SensorData),
    UpstreamSystemPerformance(ResourceName, SystemPerformanceData),
    UpstreamActuatorResponse(ResourceName, ActuatorData),
    StoredSensor(ResourceName, SensorData),
    StoredSystemPerformance(ResourceName, SystemPerformanceData),
    StoredActuator(ResourceName, ActuatorData),
}

/// Implements every listener contract and records what it is handed
///
/// As an actuator executor it answers with a response carrying
/// `response_status`, unless built with [`RecordingListener::silent`].
pub struct RecordingListener {
    calls: Mutex<Vec<RecordedCall>>,
    response_status: Option<i32>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response_status: Some(0),
        }
    }

    /// Executor that never produces a response
    pub fn silent() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response_status: None,
        }
    }

    fn record(&self, call: RecordedCall) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&RecordedCall) -> bool,
    {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Polls until at least `expected` calls match or `timeout` expires
    pub async fn wait_for<F>(&self, expected: usize, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&RecordedCall) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(&predicate) >= expected {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for RecordingListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataMessageListener for RecordingListener {
    async fn handle_sensor_message(&self, resource: ResourceName, data: Option<SensorData>) -> bool {
        let Some(data) = data else { return false };
        self.record(RecordedCall::Sensor(resource, data));
        true
    }

    async fn handle_system_performance_message(
        &self,
        resource: ResourceName,
        data: Option<SystemPerformanceData>,
    ) -> bool {
        let Some(data) = data else { return false };
        self.record(RecordedCall::SystemPerformance(resource, data));
        true
    }

    async fn handle_actuator_command_request(&self, resource: ResourceName, data: Option<ActuatorData>) -> bool {
        let Some(data) = data else { return false };
        self.record(RecordedCall::ActuatorRequest(resource, data));
        true
    }

    async fn handle_actuator_command_response(&self, resource: ResourceName, data: Option<ActuatorData>) -> bool {
        let Some(data) = data else { return false };
        self.record(RecordedCall::ActuatorResponse(resource, data));
        true
    }

    async fn handle_incoming_message(&self, resource: ResourceName, payload: &str) -> bool {
        self.record(RecordedCall::Incoming(resource, payload.to_string()));
        !payload.trim().is_empty()
    }
}

#[async_trait]
impl ActuatorDataListener for RecordingListener {
    async fn on_actuator_command(
        &self,
        resource: ResourceName,
        command: ActuatorData,
    ) -> Result<Option<ActuatorData>, ActuatorError> {
        let response = self.response_status.map(|status| command.to_response(status));
        self.record(RecordedCall::Executed(resource, command));
        Ok(response)
    }
}

#[async_trait]
impl UpstreamListener for RecordingListener {
    async fn on_sensor_data(&self, resource: ResourceName, data: &SensorData) {
        self.record(RecordedCall::UpstreamSensor(resource, data.clone()));
    }

    async fn on_system_performance_data(&self, resource: ResourceName, data: &SystemPerformanceData) {
        self.record(RecordedCall::UpstreamSystemPerformance(resource, data.clone()));
    }

    async fn on_actuator_response(&self, resource: ResourceName, data: &ActuatorData) {
        self.record(RecordedCall::UpstreamActuatorResponse(resource, data.clone()));
    }
}

#[async_trait]
impl PersistenceSink for RecordingListener {
    async fn store_sensor_data(&self, resource: ResourceName, data: &SensorData) -> bool {
        self.record(RecordedCall::StoredSensor(resource, data.clone()));
        true
    }

    async fn store_system_performance_data(&self, resource: ResourceName, data: &SystemPerformanceData) -> bool {
        self.record(RecordedCall::StoredSystemPerformance(resource, data.clone()));
        true
    }

    async fn store_actuator_data(&self, resource: ResourceName, data: &ActuatorData) -> bool {
        self.record(RecordedCall::StoredActuator(resource, data.clone()));
        true
    }
}

/// Telemetry source with a fixed value that counts its samples
pub struct StaticSource {
    name: String,
    kind: TelemetryKind,
    value: f32,
    samples: AtomicUsize,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, kind: TelemetryKind, value: f32) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            samples: AtomicUsize::new(0),
        }
    }

    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::Relaxed)
    }
}

impl TelemetrySource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TelemetryKind {
        self.kind
    }

    fn produce_measurement(&self) -> f32 {
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.value
    }
}

/// Router wired to one mock connector, with a recording listener as
/// upstream bridge, persistence sink and actuator executor
pub struct TestHarness {
    pub client: Arc<MockPubSubClient>,
    pub listener: Arc<RecordingListener>,
    pub router: Arc<MessageRouter>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_connectors(vec![(Arc::new(MockPubSubClient::new("mqtt")), true)])
    }

    /// Registers each connector with the device subscriptions
    ///
    /// `client` is the first connector of the list.
    pub fn with_connectors(connectors: Vec<(Arc<MockPubSubClient>, bool)>) -> Self {
        init_tracing();

        let mut router = MessageRouter::new(DataCodec::new(), QoS::AtLeastOnce);
        let client = connectors
            .first()
            .map(|(client, _)| client.clone())
            .unwrap_or_else(|| Arc::new(MockPubSubClient::new("unused")));
        for (connector, enabled) in connectors {
            router.add_connector(connector, DEVICE_SUBSCRIPTIONS.to_vec(), enabled);
        }

        let listener = Arc::new(RecordingListener::new());
        router.set_upstream_listener(listener.clone());
        router.set_persistence_sink(listener.clone());
        router.set_actuator_data_listener(ResourceName::CDA_ACTUATOR_CMD_RESOURCE, listener.clone());

        Self {
            client,
            listener,
            router: Arc::new(router),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_listener_rejects_missing_data() {
        let listener = RecordingListener::new();
        let resource = ResourceName::CDA_SENSOR_MSG_RESOURCE;

        assert!(!listener.handle_sensor_message(resource, None).await);
        assert!(listener
            .handle_sensor_message(resource, Some(SensorData::new("t", 1, 1.0)))
            .await);
        assert_eq!(listener.count(|call| matches!(call, RecordedCall::Sensor(..))), 1);
    }

    #[tokio::test]
    async fn test_executor_response() {
        let command = ActuatorData::command("led", 1, 1, 0.0);
        let resource = ResourceName::CDA_ACTUATOR_CMD_RESOURCE;

        let response = RecordingListener::new()
            .on_actuator_command(resource, command.clone())
            .await
            .unwrap()
            .unwrap();
        assert!(response.is_response);

        assert!(RecordingListener::silent()
            .on_actuator_command(resource, command)
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_static_source_counts_samples() {
        let source = StaticSource::new("cpu", TelemetryKind::Cpu, 12.5);
        assert_eq!(source.produce_measurement(), 12.5);
        assert_eq!(source.produce_measurement(), 12.5);
        assert_eq!(source.samples(), 2);
    }
}
