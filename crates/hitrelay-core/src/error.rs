use thiserror::Error;

use crate::types::{DestinationKey, SenderId};

/// Precondition violations raised by relay operations.
///
/// These mark programming errors at the call site (operating on a channel
/// that was never acquired, or on a sender that was never registered). They
/// terminate the operation that raised them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    /// No live channel exists for the destination.
    #[error("no channel registered for destination {0}")]
    UnknownDestination(DestinationKey),
    /// The sender id was not issued by this relay.
    #[error("unknown sender {0}")]
    UnknownSender(SenderId),
    /// Invalid caller input.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}
