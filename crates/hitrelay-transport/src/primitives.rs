use std::collections::VecDeque;
use std::fmt;

use crate::{LoadOutcome, TransportHealthSnapshot};

/// Direct (non-channel) delivery primitives offered by the runtime.
///
/// Every method is non-blocking. Capability checks default to "absent" so an
/// implementation only opts into what it can actually do.
pub trait HitPrimitives {
    /// Transport-specific dispatch error.
    type Error: fmt::Display;

    /// Whether the beacon capability exists at all.
    fn supports_beacon(&self) -> bool {
        false
    }

    /// Queues a beacon. Returns whether the runtime accepted it.
    fn send_beacon(&mut self, url: &str) -> bool;

    /// Whether credentialed cross-origin POST is available.
    fn supports_credentialed_post(&self) -> bool {
        false
    }

    /// Dispatches a credentialed POST without awaiting any response.
    fn send_credentialed_post(&mut self, url: &str) -> Result<(), Self::Error>;

    /// Starts a one-pixel GET; its outcome surfaces via `poll_pixel_outcome`.
    fn send_pixel(&mut self, url: &str) -> Result<(), Self::Error>;

    /// Returns the next settled pixel request, if any.
    fn poll_pixel_outcome(&mut self) -> Option<(String, LoadOutcome)> {
        None
    }

    /// Returns the next completed credentialed POST, if any.
    fn poll_post_completion(&mut self) -> Option<String> {
        None
    }

    /// Best-effort health counters.
    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot::default()
    }
}

/// One request captured by [`InMemoryPrimitives`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentHit {
    Beacon(String),
    CredentialedPost(String),
    Pixel(String),
}

/// In-memory primitives with explicit capability toggles, for tests and
/// simulations.
#[derive(Debug, Clone)]
pub struct InMemoryPrimitives {
    sent: Vec<SentHit>,
    pending_pixels: VecDeque<(String, LoadOutcome)>,
    pending_posts: VecDeque<String>,
    beacon_supported: bool,
    beacon_accepts: bool,
    post_supported: bool,
    pixel_outcome: LoadOutcome,
    send_ok: u64,
    send_err: u64,
}

impl Default for InMemoryPrimitives {
    fn default() -> Self {
        Self {
            sent: Vec::new(),
            pending_pixels: VecDeque::new(),
            pending_posts: VecDeque::new(),
            beacon_supported: true,
            beacon_accepts: true,
            post_supported: true,
            pixel_outcome: LoadOutcome::Loaded,
            send_ok: 0,
            send_err: 0,
        }
    }
}

impl InMemoryPrimitives {
    /// Runtime with neither beacon nor credentialed POST; only pixels work.
    pub fn pixel_only() -> Self {
        Self {
            beacon_supported: false,
            post_supported: false,
            ..Self::default()
        }
    }

    pub fn set_beacon_supported(&mut self, supported: bool) {
        self.beacon_supported = supported;
    }

    /// Whether a supported beacon reports the request as accepted.
    pub fn set_beacon_accepts(&mut self, accepts: bool) {
        self.beacon_accepts = accepts;
    }

    pub fn set_post_supported(&mut self, supported: bool) {
        self.post_supported = supported;
    }

    /// Outcome reported for subsequently sent pixels.
    pub fn set_pixel_outcome(&mut self, outcome: LoadOutcome) {
        self.pixel_outcome = outcome;
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> &[SentHit] {
        &self.sent
    }

    /// Drains and returns all captured sends.
    pub fn take_sent(&mut self) -> Vec<SentHit> {
        std::mem::take(&mut self.sent)
    }
}

impl HitPrimitives for InMemoryPrimitives {
    type Error = &'static str;

    fn supports_beacon(&self) -> bool {
        self.beacon_supported
    }

    fn send_beacon(&mut self, url: &str) -> bool {
        if !self.beacon_supported || !self.beacon_accepts {
            self.send_err += 1;
            return false;
        }
        self.sent.push(SentHit::Beacon(url.to_string()));
        self.send_ok += 1;
        true
    }

    fn supports_credentialed_post(&self) -> bool {
        self.post_supported
    }

    fn send_credentialed_post(&mut self, url: &str) -> Result<(), Self::Error> {
        if !self.post_supported {
            self.send_err += 1;
            return Err("credentialed post unsupported");
        }
        self.sent.push(SentHit::CredentialedPost(url.to_string()));
        self.pending_posts.push_back(url.to_string());
        self.send_ok += 1;
        Ok(())
    }

    fn send_pixel(&mut self, url: &str) -> Result<(), Self::Error> {
        self.sent.push(SentHit::Pixel(url.to_string()));
        self.pending_pixels
            .push_back((url.to_string(), self.pixel_outcome));
        match self.pixel_outcome {
            LoadOutcome::Loaded => self.send_ok += 1,
            LoadOutcome::Failed => self.send_err += 1,
        }
        Ok(())
    }

    fn poll_pixel_outcome(&mut self) -> Option<(String, LoadOutcome)> {
        self.pending_pixels.pop_front()
    }

    fn poll_post_completion(&mut self) -> Option<String> {
        self.pending_posts.pop_front()
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot {
            outbound_queued: (self.pending_pixels.len() + self.pending_posts.len()) as u64,
            outbound_send_ok: self.send_ok,
            outbound_send_err: self.send_err,
            ..TransportHealthSnapshot::default()
        }
    }
}
