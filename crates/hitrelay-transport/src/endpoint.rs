use std::collections::VecDeque;
use std::fmt;

use hitrelay_core::{DestinationKey, Sentinel};

use crate::TransportHealthSnapshot;

/// Byte-oriented contract of the shared cross-origin endpoint behind every
/// channel.
///
/// One implementation serves all destinations; calls are keyed by
/// destination. Loading is asynchronous: `begin_load` returns at once and the
/// completion surfaces later through `poll_loaded`, tagged with the sentinel
/// the load was started with so a late completion of a torn-down channel can
/// be told apart from the current one.
pub trait ChannelEndpoint {
    /// Transport-specific error.
    type Error: fmt::Display;

    /// Starts loading the endpoint for `destination`.
    fn begin_load(
        &mut self,
        destination: &DestinationKey,
        sentinel: &Sentinel,
    ) -> Result<(), Self::Error>;

    /// Returns the next completed load and the sentinel it was started with.
    fn poll_loaded(&mut self) -> Option<(DestinationKey, Sentinel)>;

    /// Delivers one encoded envelope to a loaded endpoint.
    fn send(&mut self, destination: &DestinationKey, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Returns the next inbound payload and the destination it came from.
    fn recv(&mut self) -> Option<(DestinationKey, Vec<u8>)>;

    /// Tears down the endpoint resource for `destination`.
    fn destroy(&mut self, destination: &DestinationKey);

    /// Best-effort health counters.
    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot::default()
    }
}

/// In-memory endpoint for tests and simulations.
///
/// Loads complete when the caller signals [`InMemoryEndpoint::complete_load`],
/// or immediately once auto-complete is enabled.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEndpoint {
    loads: Vec<(DestinationKey, Sentinel)>,
    loaded: VecDeque<(DestinationKey, Sentinel)>,
    inbound: VecDeque<(DestinationKey, Vec<u8>)>,
    outbound: Vec<(DestinationKey, Vec<u8>)>,
    destroyed: Vec<DestinationKey>,
    fail_sends: bool,
    auto_complete: bool,
    send_ok: u64,
    send_err: u64,
    recv_ok: u64,
}

impl InMemoryEndpoint {
    /// Every `begin_load` call so far, in order.
    pub fn loads(&self) -> &[(DestinationKey, Sentinel)] {
        &self.loads
    }

    /// Number of loads started for `destination`.
    pub fn load_count(&self, destination: &DestinationKey) -> usize {
        self.loads.iter().filter(|(d, _)| d == destination).count()
    }

    /// Sentinel handed to the most recent load of `destination`.
    pub fn sentinel_for(&self, destination: &DestinationKey) -> Option<&Sentinel> {
        self.loads
            .iter()
            .rev()
            .find(|(d, _)| d == destination)
            .map(|(_, s)| s)
    }

    /// Signals that the most recent load of `destination` finished.
    ///
    /// Returns false if no load was ever started for it.
    pub fn complete_load(&mut self, destination: impl Into<DestinationKey>) -> bool {
        let destination = destination.into();
        let Some(sentinel) = self.sentinel_for(&destination).cloned() else {
            return false;
        };
        self.loaded.push_back((destination, sentinel));
        true
    }

    /// Signals that the load started with `sentinel` finished, even if a
    /// newer load of the same destination has begun since.
    pub fn complete_load_of(&mut self, destination: impl Into<DestinationKey>, sentinel: Sentinel) {
        self.loaded.push_back((destination.into(), sentinel));
    }

    /// Queues bytes as inbound traffic from `destination`.
    pub fn enqueue_inbound(&mut self, destination: impl Into<DestinationKey>, bytes: Vec<u8>) {
        self.inbound.push_back((destination.into(), bytes));
    }

    /// Drains and returns all outbound sends captured so far.
    pub fn take_outbound(&mut self) -> Vec<(DestinationKey, Vec<u8>)> {
        std::mem::take(&mut self.outbound)
    }

    pub fn destroyed(&self) -> &[DestinationKey] {
        &self.destroyed
    }

    /// If enabled, every send fails.
    pub fn set_fail_sends(&mut self, fail_sends: bool) {
        self.fail_sends = fail_sends;
    }

    /// If enabled, every load completes as soon as it starts.
    pub fn set_auto_complete(&mut self, auto_complete: bool) {
        self.auto_complete = auto_complete;
    }
}

impl ChannelEndpoint for InMemoryEndpoint {
    type Error = &'static str;

    fn begin_load(
        &mut self,
        destination: &DestinationKey,
        sentinel: &Sentinel,
    ) -> Result<(), Self::Error> {
        self.loads.push((destination.clone(), sentinel.clone()));
        if self.auto_complete {
            self.loaded.push_back((destination.clone(), sentinel.clone()));
        }
        Ok(())
    }

    fn poll_loaded(&mut self) -> Option<(DestinationKey, Sentinel)> {
        self.loaded.pop_front()
    }

    fn send(&mut self, destination: &DestinationKey, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_sends {
            self.send_err += 1;
            return Err("send failed");
        }
        self.outbound.push((destination.clone(), bytes.to_vec()));
        self.send_ok += 1;
        Ok(())
    }

    fn recv(&mut self) -> Option<(DestinationKey, Vec<u8>)> {
        let msg = self.inbound.pop_front();
        if msg.is_some() {
            self.recv_ok += 1;
        }
        msg
    }

    fn destroy(&mut self, destination: &DestinationKey) {
        self.destroyed.push(destination.clone());
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot {
            outbound_queued: self.outbound.len() as u64,
            outbound_send_ok: self.send_ok,
            outbound_send_err: self.send_err,
            inbound_received: self.recv_ok,
            inbound_dropped: 0,
            last_error: None,
        }
    }
}
