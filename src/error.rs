//! Error types for the collaboration bus.

use thiserror::Error;

/// Main error type for bus operations.
///
/// Errors are cloneable so a single store failure can be fanned out to every
/// subscriber of the affected topic.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BusError {
    /// Transient store failure. Subscriptions stay open.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Rejected before any store call was issued.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl BusError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::StoreUnavailable(_))
    }
}

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            BusError::Deserialization(e.to_string())
        } else {
            BusError::Serialization(e.to_string())
        }
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
