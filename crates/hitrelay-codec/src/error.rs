use thiserror::Error;

/// Errors returned by envelope encode/decode operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization/deserialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Envelope decoded fine but carries a different message type.
    #[error("unexpected envelope type: {0}")]
    UnexpectedType(&'static str),
    /// Envelope sentinel does not belong to the receiving channel.
    #[error("sentinel mismatch")]
    SentinelMismatch,
    /// Required payload field absent or empty.
    #[error("missing field: {0}")]
    MissingField(&'static str),
}
