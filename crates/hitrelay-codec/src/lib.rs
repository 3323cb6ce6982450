//! hitrelay wire codec.
//!
//! Defines the JSON envelopes exchanged with a shared channel endpoint:
//! batched events and extra data outbound, responses inbound.

pub mod envelope;
pub mod error;
