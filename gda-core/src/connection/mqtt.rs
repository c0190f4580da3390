//! MQTT connector built on rumqttc
//!
//! The rumqttc event loop runs in a dedicated session task once the broker
//! has acknowledged the first CONNECT. A lost connection flips the state to
//! `Reconnecting` and the loop keeps polling, which makes rumqttc dial the
//! broker again after `reconnect_delay`. Subscriptions are re-issued when
//! the broker comes back without our session.

use super::{normalize_qos, ConnectionState, InboundMessage, MessageSender, PubSubClient};
use crate::config::MqttConnectorConfig;
use crate::resources::ResourceName;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const REQUEST_CAPACITY: usize = 10;
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// State shared between the connector and its session task
struct Shared {
    broker_addr: String,
    state: watch::Sender<ConnectionState>,
    handler: RwLock<Option<MessageSender>>,
    subscriptions: Mutex<HashMap<ResourceName, QoS>>,
    reconnects: AtomicU32,
    closing: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("MQTT state {:?} -> {:?} ({})", previous, state, self.broker_addr);
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Maps the topic and hands the message to the registered handler
    fn dispatch(&self, publish: Publish) {
        let resource = match ResourceName::from_topic(&publish.topic) {
            Ok(resource) => resource,
            Err(e) => {
                warn!("Dropping MQTT message: {}", e);
                return;
            }
        };

        let payload = match String::from_utf8(publish.payload.to_vec()) {
            Ok(text) => text,
            Err(e) => {
                warn!("Dropping non UTF-8 MQTT message on '{}': {}", publish.topic, e);
                return;
            }
        };

        debug!("MQTT message arrived on topic: '{}' (QoS {:?})", publish.topic, publish.qos);

        // clone under the read guard so a concurrent replacement never splits a delivery
        let handler = self.handler.read().clone();
        match handler {
            Some(sender) => {
                let message = InboundMessage { resource, payload, qos: publish.qos };
                if sender.send(message).is_err() {
                    warn!("Message handler for '{}' is closed, message dropped", publish.topic);
                }
            }
            None => debug!("No message handler registered, dropping message on '{}'", publish.topic),
        }
    }
}

struct Session {
    client: AsyncClient,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// [`PubSubClient`] backed by an MQTT broker
pub struct MqttClientConnector {
    config: MqttConnectorConfig,
    client_id: String,
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Option<Session>>,
    client: RwLock<Option<AsyncClient>>,
    // publish/subscribe hold a read guard; disconnect takes the write side
    op_gate: tokio::sync::RwLock<()>,
}

impl MqttClientConnector {
    pub fn new(config: MqttConnectorConfig) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("gda-{}", Uuid::new_v4().simple()));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        info!("MQTT Broker Address: {}", config.broker_addr());
        info!("MQTT Client ID: {}", client_id);

        Self {
            shared: Arc::new(Shared {
                broker_addr: config.broker_addr(),
                state,
                handler: RwLock::new(None),
                subscriptions: Mutex::new(HashMap::new()),
                reconnects: AtomicU32::new(0),
                closing: AtomicBool::new(false),
            }),
            config,
            client_id,
            session: tokio::sync::Mutex::new(None),
            client: RwLock::new(None),
            op_gate: tokio::sync::RwLock::new(()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Number of times an established connection was lost
    pub fn reconnect_count(&self) -> u32 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(false);
        options
    }

    /// Client handle, only while connected
    fn connected_client(&self, operation: &str, resource: ResourceName) -> Option<AsyncClient> {
        if self.shared.state() != ConnectionState::Connected {
            warn!(
                "MQTT client not connected. Unable to {} '{}': {}",
                operation, resource, self.shared.broker_addr
            );
            return None;
        }
        self.client.read().clone()
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<bool, ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
            return Ok(ack.session_present);
        }
    }
}

async fn run_session(
    shared: Arc<Shared>,
    client: AsyncClient,
    mut eventloop: EventLoop,
    mut shutdown: watch::Receiver<bool>,
    reconnect_delay: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("MQTT session shutdown requested ({})", shared.broker_addr);
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => shared.dispatch(publish),
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    shared.set_state(ConnectionState::Connected);
                    info!("MQTT connection successful (is reconnect = true). Broker: {}", shared.broker_addr);
                    if !ack.session_present {
                        resubscribe(&shared, &client);
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("MQTT DISCONNECT sent to {}", shared.broker_addr);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if shared.closing.load(Ordering::Acquire) {
                        break;
                    }
                    if shared.state() == ConnectionState::Connected {
                        shared.reconnects.fetch_add(1, Ordering::Relaxed);
                        warn!("Lost connection to MQTT broker {}: {}", shared.broker_addr, e);
                    } else {
                        debug!("MQTT reconnect attempt failed ({}): {}", shared.broker_addr, e);
                    }
                    shared.set_state(ConnectionState::Reconnecting);

                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                }
            }
        }
    }
}

fn resubscribe(shared: &Shared, client: &AsyncClient) {
    let subscriptions: Vec<_> = shared
        .subscriptions
        .lock()
        .iter()
        .map(|(resource, qos)| (*resource, *qos))
        .collect();

    for (resource, qos) in subscriptions {
        // try_ variant: the request queue is drained by this same task
        match client.try_subscribe(resource.topic(), qos) {
            Ok(()) => info!("Re-subscribed to topic: {}", resource),
            Err(e) => error!("Failed to re-subscribe to topic {}: {}", resource, e),
        }
    }
}

#[async_trait]
impl PubSubClient for MqttClientConnector {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn connect_client(&self) -> bool {
        let mut session = self.session.lock().await;
        if session.is_some() {
            warn!("MQTT client already connected to broker: {}", self.shared.broker_addr);
            return false;
        }

        info!("MQTT client connecting to broker: {}", self.shared.broker_addr);
        self.shared.closing.store(false, Ordering::Release);
        self.shared.set_state(ConnectionState::Connecting);

        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        match tokio::time::timeout(self.config.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(session_present)) => {
                debug!("CONNACK received (session present = {})", session_present);
            }
            Ok(Err(e)) => {
                error!("Failed to connect MQTT client to broker {}: {}", self.shared.broker_addr, e);
                self.shared.set_state(ConnectionState::Disconnected);
                return false;
            }
            Err(_) => {
                error!(
                    "Timed out after {:?} connecting MQTT client to broker {}",
                    self.config.connect_timeout, self.shared.broker_addr
                );
                self.shared.set_state(ConnectionState::Disconnected);
                return false;
            }
        }

        self.shared.set_state(ConnectionState::Connected);
        info!("MQTT connection successful (is reconnect = false). Broker: {}", self.shared.broker_addr);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_session(
            self.shared.clone(),
            client.clone(),
            eventloop,
            shutdown_rx,
            self.config.reconnect_delay,
        ));

        *self.client.write() = Some(client.clone());
        *session = Some(Session { client, shutdown, task });
        true
    }

    async fn disconnect_client(&self) -> bool {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            warn!("MQTT client not connected to broker: {}", self.shared.broker_addr);
            return false;
        };

        // wait for in-flight publish/subscribe calls
        let _gate = self.op_gate.write().await;

        info!("Disconnecting MQTT client from broker: {}", self.shared.broker_addr);
        *self.client.write() = None;
        self.shared.closing.store(true, Ordering::Release);

        let mut task = active.task;
        let mut graceful = false;
        if self.shared.state() == ConnectionState::Connected {
            match active.client.disconnect().await {
                Ok(()) => graceful = true,
                Err(e) => warn!("Failed to send DISCONNECT to {}: {}", self.shared.broker_addr, e),
            }
        }

        // without a DISCONNECT in flight there is nothing to wait for
        if !graceful || tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
            let _ = active.shutdown.send(true);
            if let Err(e) = task.await {
                warn!("MQTT session task ended abnormally: {}", e);
            }
        }

        self.shared.subscriptions.lock().clear();
        self.shared.set_state(ConnectionState::Disconnected);
        true
    }

    async fn publish_message(&self, resource: ResourceName, payload: &str, qos: i32) -> bool {
        if payload.is_empty() {
            warn!("Message is empty. Unable to publish message on '{}'", resource);
            return false;
        }

        let _gate = self.op_gate.read().await;
        let Some(client) = self.connected_client("publish to", resource) else {
            return false;
        };

        let qos = normalize_qos(qos, self.config.default_qos);
        match client
            .publish(resource.topic(), qos, false, payload.as_bytes().to_vec())
            .await
        {
            Ok(()) => {
                debug!("Published {} bytes to topic: {} ({:?})", payload.len(), resource, qos);
                true
            }
            Err(e) => {
                error!("Failed to publish message to topic {}: {}", resource, e);
                false
            }
        }
    }

    async fn subscribe_to_topic(&self, resource: ResourceName, qos: i32) -> bool {
        let _gate = self.op_gate.read().await;
        let Some(client) = self.connected_client("subscribe to", resource) else {
            return false;
        };

        let qos = normalize_qos(qos, self.config.default_qos);
        match client.subscribe(resource.topic(), qos).await {
            Ok(()) => {
                // the broker replaces an existing registration for the same filter
                self.shared.subscriptions.lock().insert(resource, qos);
                info!("Successfully subscribed to topic: {}", resource);
                true
            }
            Err(e) => {
                error!("Failed to subscribe to topic {}: {}", resource, e);
                false
            }
        }
    }

    async fn unsubscribe_from_topic(&self, resource: ResourceName) -> bool {
        let _gate = self.op_gate.read().await;
        let Some(client) = self.connected_client("unsubscribe from", resource) else {
            return false;
        };

        match client.unsubscribe(resource.topic()).await {
            Ok(()) => {
                self.shared.subscriptions.lock().remove(&resource);
                info!("Successfully unsubscribed from topic: {}", resource);
                true
            }
            Err(e) => {
                error!("Failed to unsubscribe from topic {}: {}", resource, e);
                false
            }
        }
    }

    fn set_message_handler(&self, handler: MessageSender) -> bool {
        *self.shared.handler.write() = Some(handler);
        true
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    fn active_subscriptions(&self) -> Vec<ResourceName> {
        self.shared.subscriptions.lock().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> MqttConnectorConfig {
        // bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        MqttConnectorConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout: Duration::from_secs(2),
            client_id: Some("gda-test".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let connector = MqttClientConnector::new(unreachable_config());
        assert_eq!(connector.client_id(), "gda-test");

        assert!(!connector.connect_client().await);
        assert_eq!(connector.connection_state(), ConnectionState::Disconnected);
        assert_eq!(connector.reconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let connector = MqttClientConnector::new(unreachable_config());
        let resource = ResourceName::CDA_SENSOR_MSG_RESOURCE;

        assert!(!connector.publish_message(resource, "{}", 1).await);
        assert!(!connector.publish_message(resource, "", 1).await);
        assert!(!connector.subscribe_to_topic(resource, 1).await);
        assert!(!connector.unsubscribe_from_topic(resource).await);
        assert!(!connector.disconnect_client().await);
        assert!(connector.active_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_generated_client_id() {
        let connector = MqttClientConnector::new(MqttConnectorConfig::default());
        assert!(connector.client_id().starts_with("gda-"));
        assert_eq!(connector.name(), "mqtt");
    }

    #[test]
    fn test_dispatch_routes_known_topics_only() {
        let (state, _) = watch::channel(ConnectionState::Connected);
        let shared = Shared {
            broker_addr: "tcp://test:1883".to_string(),
            state,
            handler: RwLock::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            reconnects: AtomicU32::new(0),
            closing: AtomicBool::new(false),
        };
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        *shared.handler.write() = Some(tx);

        shared.dispatch(Publish::new("PIOT/Unknown", QoS::AtMostOnce, "x"));
        shared.dispatch(Publish::new(
            ResourceName::CDA_ACTUATOR_RESPONSE_RESOURCE.topic(),
            QoS::AtLeastOnce,
            vec![0xff, 0xfe],
        ));
        shared.dispatch(Publish::new(
            ResourceName::CDA_SENSOR_MSG_RESOURCE.topic(),
            QoS::AtLeastOnce,
            "{\"value\": 1.0}",
        ));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.resource, ResourceName::CDA_SENSOR_MSG_RESOURCE);
        assert_eq!(message.payload, "{\"value\": 1.0}");
        assert_eq!(message.qos, QoS::AtLeastOnce);
        assert!(rx.try_recv().is_err());
    }
}
