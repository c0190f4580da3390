//! Error types for the gateway core

use crate::router::ManagerState;

/// Errors raised while mapping strings onto the resource namespace
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),
}

/// Errors raised by the data codec
///
/// An empty payload is not an error: decoding returns `Ok(None)` instead.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors raised by an actuator executor
#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Actuator message {0} is a response, not a command")]
    NotACommand(String),
    #[error("Failed to encode actuator command: {0}")]
    Encode(#[from] CodecError),
    #[error("Connector '{connector}' did not relay actuator command {name}")]
    NotRelayed { connector: String, name: String },
}

/// Errors raised by the message router
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Cannot {operation} manager while {state:?}")]
    InvalidTransition {
        operation: &'static str,
        state: ManagerState,
    },
    #[error("Connector '{0}' failed to connect")]
    ConnectorUnavailable(String),
}
