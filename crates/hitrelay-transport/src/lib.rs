//! Transport abstractions for hitrelay.
//!
//! The relay only depends on the primitive, endpoint and ping-host traits
//! defined in this crate. Network-backed implementations live in
//! `hitrelay-transport-http`; the in-memory variants here back tests and
//! simulations.

pub mod endpoint;
pub mod ping;
pub mod primitives;

/// Settled outcome of an asynchronous load (pixel, ping frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Failed,
}

/// Coarse per-transport health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHealthSnapshot {
    pub outbound_queued: u64,
    pub outbound_send_ok: u64,
    pub outbound_send_err: u64,
    pub inbound_received: u64,
    pub inbound_dropped: u64,
    pub last_error: Option<String>,
}
