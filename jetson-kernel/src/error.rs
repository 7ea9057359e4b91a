use crate::models::NodeHandle;
use std::time::Duration;

/// Malformed identity keys or sample payload. The sample is dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing cluster id")]
    MissingClusterKey,
    #[error("missing node id")]
    MissingNodeKey,
    #[error("core {core} utilization {value} outside 0..=100")]
    CoreUtilization { core: usize, value: f32 },
    #[error("non-finite power reading")]
    PowerReading,
}

/// Failure reaching a node or decoding its answer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("node answered with HTTP {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(Duration::ZERO)
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Connect(e.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Catalog and store out of sync; never expected when the catalog is consulted first.
    #[error("unknown node handle {0}")]
    UnknownNode(NodeHandle),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of one ingestion cycle that did not produce a stored pair.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid report: {0}")]
    Validation(#[from] ValidationError),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
