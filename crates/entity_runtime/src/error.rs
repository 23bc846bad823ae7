//! Runtime errors

use entity_types::EntityError;

// ─────────────────────────────────────────────────────────────────────────────
// Bus Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors reported by a bus connection
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BusError {
    #[error("Service unknown: {0}")]
    ServiceUnknown(String),

    #[error("Object {path} not found on {service}")]
    ObjectNotFound { service: String, path: String },

    #[error("Interface {interface} not found on {path}")]
    InterfaceNotFound { path: String, interface: String },

    #[error("Property {interface}.{property} not found on {path}")]
    PropertyNotFound {
        path: String,
        interface: String,
        property: String,
    },

    #[error("Bus disconnected")]
    Disconnected,

    #[error("No bus connection available within {0:?}")]
    PoolExhausted(std::time::Duration),

    #[error("Connection failed: {0}")]
    Connect(String),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

// ─────────────────────────────────────────────────────────────────────────────
// Query Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that abort a query execution.
///
/// Remote fetch failures are not represented here: they degrade to
/// unavailable fields or an empty match set inside the query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("Provider {0} is no longer registered")]
    ProviderGone(String),

    #[error(transparent)]
    Entity(#[from] EntityError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

// ─────────────────────────────────────────────────────────────────────────────
// Broker Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker already started")]
    AlreadyStarted,

    #[error("Failed to spawn broker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
