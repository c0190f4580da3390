//! Pub/sub connectors
//!
//! A connector owns one transport connection and its subscription set. The
//! router talks to connectors only through [`PubSubClient`]; inbound traffic
//! is handed off as [`InboundMessage`] values on a channel registered with
//! [`PubSubClient::set_message_handler`].

mod mqtt;

pub use mqtt::MqttClientConnector;

use crate::resources::ResourceName;
use async_trait::async_trait;
use rumqttc::QoS;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

/// Connection lifecycle, owned by each connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Message received from the transport, already mapped to a resource
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub resource: ResourceName,
    pub payload: String,
    pub qos: QoS,
}

/// Downstream consumer of inbound messages
pub type MessageSender = mpsc::UnboundedSender<InboundMessage>;

/// Contract every transport adapter satisfies
///
/// All operations report failure through their boolean result and the log;
/// none of them is fatal.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &str;

    /// Opens the session. Returns false (and warns) if not disconnected.
    async fn connect_client(&self) -> bool;

    /// Closes the session gracefully. Returns false if already disconnected.
    async fn disconnect_client(&self) -> bool;

    async fn publish_message(&self, resource: ResourceName, payload: &str, qos: i32) -> bool;

    async fn subscribe_to_topic(&self, resource: ResourceName, qos: i32) -> bool;

    async fn unsubscribe_from_topic(&self, resource: ResourceName) -> bool;

    /// Replaces the single downstream consumer
    fn set_message_handler(&self, handler: MessageSender) -> bool;

    fn connection_state(&self) -> ConnectionState;

    fn state_changes(&self) -> watch::Receiver<ConnectionState>;

    fn active_subscriptions(&self) -> Vec<ResourceName>;

    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}

pub fn qos_from_level(level: i32) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

pub fn qos_level(qos: QoS) -> i32 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// Maps a requested level onto a valid QoS, falling back to `default`
pub fn normalize_qos(level: i32, default: QoS) -> QoS {
    qos_from_level(level).unwrap_or_else(|| {
        tracing::debug!("QoS {} out of range, using {:?}", level, default);
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        for level in 0..=2 {
            assert_eq!(qos_level(qos_from_level(level).unwrap()), level);
        }
        assert!(qos_from_level(3).is_none());
        assert!(qos_from_level(-1).is_none());
    }

    #[test]
    fn test_normalize_qos() {
        assert_eq!(normalize_qos(2, QoS::AtMostOnce), QoS::ExactlyOnce);
        assert_eq!(normalize_qos(5, QoS::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(normalize_qos(-3, QoS::AtMostOnce), QoS::AtMostOnce);
    }
}
