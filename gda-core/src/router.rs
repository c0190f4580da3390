//! Message router
//!
//! The router owns the connectors and the codec. Connectors push raw
//! arrivals onto a single queue; the dispatch task drains it, decodes each
//! payload according to the route registered for its resource and hands the
//! entity to exactly one handler. Outbound entities are encoded once and
//! published through every connected connector.

use crate::codec::DataCodec;
use crate::connection::{qos_level, ConnectionState, InboundMessage, PubSubClient};
use crate::data::{ActuatorData, GatewayData, SensorData, SystemPerformanceData};
use crate::error::RouterError;
use crate::listeners::{ActuatorDataListener, DataMessageListener, PersistenceSink, UpstreamListener};
use crate::resources::ResourceName;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rumqttc::QoS;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Router lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Handler family an inbound resource is dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Sensor,
    SystemPerformance,
    ActuatorCommand,
    ActuatorResponse,
}

/// Fixed inbound route table; management channels have no route
pub fn default_routes() -> HashMap<ResourceName, Route> {
    HashMap::from([
        (ResourceName::CDA_SENSOR_MSG_RESOURCE, Route::Sensor),
        (ResourceName::CDA_SYSTEM_PERF_MSG_RESOURCE, Route::SystemPerformance),
        (ResourceName::GDA_SYSTEM_PERF_MSG_RESOURCE, Route::SystemPerformance),
        (ResourceName::CDA_ACTUATOR_CMD_RESOURCE, Route::ActuatorCommand),
        (ResourceName::CDA_ACTUATOR_RESPONSE_RESOURCE, Route::ActuatorResponse),
    ])
}

struct ConnectorEntry {
    client: Arc<dyn PubSubClient>,
    subscriptions: Vec<ResourceName>,
    enabled: bool,
}

struct DispatchTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct MessageRouter {
    codec: DataCodec,
    default_qos: QoS,
    routes: HashMap<ResourceName, Route>,
    connectors: Vec<ConnectorEntry>,
    actuator_listeners: RwLock<HashMap<ResourceName, Arc<dyn ActuatorDataListener>>>,
    upstream: RwLock<Option<Arc<dyn UpstreamListener>>>,
    persistence: RwLock<Option<Arc<dyn PersistenceSink>>>,
    state: Mutex<ManagerState>,
    // serialises start_manager / stop_manager
    lifecycle: tokio::sync::Mutex<()>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>>,
    dispatch: Mutex<Option<DispatchTask>>,
}

impl MessageRouter {
    pub fn new(codec: DataCodec, default_qos: QoS) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            codec,
            default_qos,
            routes: default_routes(),
            connectors: Vec::new(),
            actuator_listeners: RwLock::new(HashMap::new()),
            upstream: RwLock::new(None),
            persistence: RwLock::new(None),
            state: Mutex::new(ManagerState::Stopped),
            lifecycle: tokio::sync::Mutex::new(()),
            inbound_tx,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
            dispatch: Mutex::new(None),
        }
    }

    /// Registers a connector and the resources it subscribes on start
    ///
    /// Disabled connectors are kept for reporting but never connected.
    pub fn add_connector(&mut self, client: Arc<dyn PubSubClient>, subscriptions: Vec<ResourceName>, enabled: bool) {
        if enabled {
            client.set_message_handler(self.inbound_tx.clone());
        }
        info!(
            "Registered connector '{}' ({} subscriptions, enabled = {})",
            client.name(),
            subscriptions.len(),
            enabled
        );
        self.connectors.push(ConnectorEntry {
            client,
            subscriptions,
            enabled,
        });
    }

    pub fn set_actuator_data_listener(&self, resource: ResourceName, listener: Arc<dyn ActuatorDataListener>) {
        if self.actuator_listeners.write().insert(resource, listener).is_some() {
            debug!("Replaced actuator executor for {}", resource);
        }
    }

    pub fn set_upstream_listener(&self, listener: Arc<dyn UpstreamListener>) {
        *self.upstream.write() = Some(listener);
    }

    pub fn set_persistence_sink(&self, sink: Arc<dyn PersistenceSink>) {
        *self.persistence.write() = Some(sink);
    }

    pub fn manager_state(&self) -> ManagerState {
        *self.state.lock()
    }

    pub fn route_for(&self, resource: ResourceName) -> Option<Route> {
        self.routes.get(&resource).copied()
    }

    pub fn connectors(&self) -> impl Iterator<Item = &Arc<dyn PubSubClient>> {
        self.connectors.iter().map(|entry| &entry.client)
    }

    fn set_state(&self, state: ManagerState) {
        *self.state.lock() = state;
    }

    /// Starts dispatching, connects every enabled connector and subscribes
    /// its resources with the default QoS
    ///
    /// Calling this while running is a no-op. If a connector cannot connect
    /// the already connected ones are disconnected again and the router
    /// stays stopped.
    pub async fn start_manager(self: &Arc<Self>) -> Result<ManagerState, RouterError> {
        let _lifecycle = self.lifecycle.lock().await;

        match self.manager_state() {
            ManagerState::Stopped => {}
            ManagerState::Running => {
                warn!("Message router already running");
                return Ok(ManagerState::Running);
            }
            state => {
                return Err(RouterError::InvalidTransition {
                    operation: "start",
                    state,
                })
            }
        }

        info!("Starting message router...");
        self.set_state(ManagerState::Starting);
        self.start_dispatch();

        let qos = qos_level(self.default_qos);
        let mut connected: Vec<&ConnectorEntry> = Vec::new();

        for entry in self.connectors.iter().filter(|entry| entry.enabled) {
            if !entry.client.connect_client().await && !entry.client.is_connected() {
                error!("Connector '{}' failed to connect", entry.client.name());
                for started in connected.iter().rev() {
                    release_connector(started).await;
                }
                self.stop_dispatch().await;
                self.set_state(ManagerState::Stopped);
                return Err(RouterError::ConnectorUnavailable(entry.client.name().to_string()));
            }
            connected.push(entry);

            for resource in &entry.subscriptions {
                if !entry.client.subscribe_to_topic(*resource, qos).await {
                    warn!("Connector '{}' failed to subscribe to {}", entry.client.name(), resource);
                }
            }
        }

        self.set_state(ManagerState::Running);
        info!("Message router started ({} connectors active)", connected.len());
        Ok(ManagerState::Running)
    }

    /// Unsubscribes and disconnects every connector in reverse order, then
    /// drains and stops the dispatch task
    pub async fn stop_manager(&self) -> Result<ManagerState, RouterError> {
        let _lifecycle = self.lifecycle.lock().await;

        let state = self.manager_state();
        if state != ManagerState::Running {
            return Err(RouterError::InvalidTransition {
                operation: "stop",
                state,
            });
        }

        info!("Stopping message router...");
        self.set_state(ManagerState::Stopping);

        for entry in self.connectors.iter().rev().filter(|entry| entry.enabled) {
            release_connector(entry).await;
        }

        self.stop_dispatch().await;
        self.set_state(ManagerState::Stopped);
        info!("Message router stopped");
        Ok(ManagerState::Stopped)
    }

    fn start_dispatch(self: &Arc<Self>) {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_dispatch(
            Arc::downgrade(self),
            self.inbound_rx.clone(),
            shutdown_rx,
        ));
        *self.dispatch.lock() = Some(DispatchTask { shutdown, handle });
    }

    async fn stop_dispatch(&self) {
        let Some(task) = self.dispatch.lock().take() else {
            return;
        };
        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            error!("Dispatch task ended abnormally: {}", e);
        }
    }

    /// Encodes an actuator command and publishes it to the devices
    pub async fn send_actuator_command(&self, data: &ActuatorData) -> bool {
        self.publish_entity(ResourceName::CDA_ACTUATOR_CMD_RESOURCE, data).await
    }

    /// Encodes `entity` and publishes it through every connected connector
    ///
    /// Returns true if at least one connector accepted the message.
    pub async fn publish_entity<T: GatewayData>(&self, resource: ResourceName, entity: &T) -> bool {
        let payload = match self.codec.encode(entity) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode {:?} entity for {}: {}", T::KIND, resource, e);
                return false;
            }
        };

        let qos = qos_level(self.default_qos);
        let mut published = false;
        for entry in self.connectors.iter().filter(|entry| entry.enabled) {
            if !entry.client.is_connected() {
                debug!("Skipping connector '{}' (not connected)", entry.client.name());
                continue;
            }
            if entry.client.publish_message(resource, &payload, qos).await {
                published = true;
            }
        }

        if !published {
            warn!("No connector published message on {}", resource);
        }
        published
    }

    fn decode<T: GatewayData>(&self, resource: ResourceName, payload: &str) -> Option<T> {
        match self.codec.decode(payload) {
            Ok(Some(entity)) => Some(entity),
            Ok(None) => {
                warn!("Empty payload on {}, message dropped", resource);
                None
            }
            Err(e) => {
                warn!("Failed to decode payload on {}: {}", resource, e);
                None
            }
        }
    }
}

/// Unsubscribes everything the connector holds, configured order reversed
/// first, then disconnects it
async fn release_connector(entry: &ConnectorEntry) {
    let client = &entry.client;
    let mut active = client.active_subscriptions();
    active.sort_by_key(|resource| {
        entry
            .subscriptions
            .iter()
            .rev()
            .position(|configured| configured == resource)
            .unwrap_or(usize::MAX)
    });
    for resource in active {
        if !client.unsubscribe_from_topic(resource).await {
            warn!("Connector '{}' failed to unsubscribe from {}", client.name(), resource);
        }
    }

    if client.connection_state() != ConnectionState::Disconnected {
        client.disconnect_client().await;
    }
}

async fn run_dispatch(
    router: Weak<MessageRouter>,
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut queue = queue.lock().await;
    debug!("Dispatch task started");

    loop {
        tokio::select! {
            biased;
            message = queue.recv() => match message {
                Some(message) => dispatch(&router, message).await,
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }

    let mut drained = 0;
    while let Ok(message) = queue.try_recv() {
        dispatch(&router, message).await;
        drained += 1;
    }
    debug!("Dispatch task stopped ({} queued messages drained)", drained);
}

async fn dispatch(router: &Weak<MessageRouter>, message: InboundMessage) {
    let Some(router) = router.upgrade() else {
        return;
    };
    if !router.handle_incoming_message(message.resource, &message.payload).await {
        debug!("Inbound message on {} was not handled", message.resource);
    }
}

#[async_trait]
impl DataMessageListener for MessageRouter {
    async fn handle_sensor_message(&self, resource: ResourceName, data: Option<SensorData>) -> bool {
        let Some(data) = data else {
            warn!("No sensor data on {}", resource);
            return false;
        };
        debug!("Sensor message on {}: {} = {}", resource, data.name, data.value);

        let upstream = self.upstream.read().clone();
        if let Some(upstream) = upstream {
            upstream.on_sensor_data(resource, &data).await;
        }
        let persistence = self.persistence.read().clone();
        if let Some(sink) = persistence {
            if !sink.store_sensor_data(resource, &data).await {
                warn!("Failed to store sensor data from {}", resource);
            }
        }
        true
    }

    async fn handle_system_performance_message(
        &self,
        resource: ResourceName,
        data: Option<SystemPerformanceData>,
    ) -> bool {
        let Some(data) = data else {
            warn!("No system performance data on {}", resource);
            return false;
        };
        debug!(
            "System performance on {}: cpu = {}, mem = {}, disk = {}",
            resource, data.cpu_util, data.mem_util, data.disk_util
        );

        let upstream = self.upstream.read().clone();
        if let Some(upstream) = upstream {
            upstream.on_system_performance_data(resource, &data).await;
        }
        let persistence = self.persistence.read().clone();
        if let Some(sink) = persistence {
            if !sink.store_system_performance_data(resource, &data).await {
                warn!("Failed to store system performance data from {}", resource);
            }
        }
        true
    }

    async fn handle_actuator_command_request(&self, resource: ResourceName, data: Option<ActuatorData>) -> bool {
        let Some(command) = data else {
            warn!("No actuator command on {}", resource);
            return false;
        };

        let executor = self.actuator_listeners.read().get(&resource).cloned();
        let Some(executor) = executor else {
            warn!("No actuator executor registered for {}", resource);
            return false;
        };

        debug!("Actuator command {} (command = {}) on {}", command.name, command.command, resource);
        match executor.on_actuator_command(resource, command).await {
            Ok(Some(response)) => {
                self.handle_actuator_command_response(ResourceName::CDA_ACTUATOR_RESPONSE_RESOURCE, Some(response))
                    .await
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Actuator command on {} failed: {}", resource, e);
                false
            }
        }
    }

    async fn handle_actuator_command_response(&self, resource: ResourceName, data: Option<ActuatorData>) -> bool {
        let Some(response) = data else {
            warn!("No actuator response on {}", resource);
            return false;
        };
        if !response.is_response {
            debug!("Actuator message on {} is not flagged as a response", resource);
        }

        let upstream = self.upstream.read().clone();
        if let Some(upstream) = upstream {
            upstream.on_actuator_response(resource, &response).await;
        }
        let persistence = self.persistence.read().clone();
        if let Some(sink) = persistence {
            if !sink.store_actuator_data(resource, &response).await {
                warn!("Failed to store actuator response from {}", resource);
            }
        }
        true
    }

    async fn handle_incoming_message(&self, resource: ResourceName, payload: &str) -> bool {
        let Some(route) = self.route_for(resource) else {
            warn!("No route for resource {}, message dropped", resource);
            return false;
        };

        match route {
            Route::Sensor => match self.decode::<SensorData>(resource, payload) {
                Some(data) => self.handle_sensor_message(resource, Some(data)).await,
                None => false,
            },
            Route::SystemPerformance => match self.decode::<SystemPerformanceData>(resource, payload) {
                Some(data) => self.handle_system_performance_message(resource, Some(data)).await,
                None => false,
            },
            Route::ActuatorCommand => match self.decode::<ActuatorData>(resource, payload) {
                Some(data) => self.handle_actuator_command_request(resource, Some(data)).await,
                None => false,
            },
            Route::ActuatorResponse => match self.decode::<ActuatorData>(resource, payload) {
                Some(data) => self.handle_actuator_command_response(resource, Some(data)).await,
                None => false,
            },
        }
    }
}
