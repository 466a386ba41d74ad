use thiserror::Error;

/// Conditions that stop the bridge.
///
/// Anything surfacing as a `BridgeError` aborts the current cycle and ends the
/// collector loop; restarting is left to the process supervisor.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Modbus transport error: {0}")]
    Transport(String),

    #[error("Modbus exception: {0}")]
    ModbusException(String),

    #[error("Expected {expected} registers in response, got {actual}")]
    ResponseLength { expected: usize, actual: usize },

    #[error("Decoded {actual} values but the catalog holds {expected} definitions")]
    DecodeLength { expected: usize, actual: usize },

    #[error("type must be total_increasing but {metric} is {kind}")]
    NotACounter { metric: String, kind: String },
}

/// A single publish that did not go through. Never fatal to a cycle.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publisher rejected message for {0}")]
    Rejected(String),
}
