//! Core hitrelay primitives shared across crates.
//!
//! Includes identifier newtypes, strategy options, the id allocator, and base
//! errors.

pub mod error;
pub mod ids;
pub mod types;

pub use error::RelayError;
pub use ids::{EntropySource, IdAllocator, RandomEntropy, SequenceEntropy};
pub use types::{DestinationKey, Message, SenderId, Sentinel, Step, TransportOptions};
