//! HTTP transports for hitrelay.
//!
//! Blocking `ureq` requests run on one worker thread per transport. The relay
//! side never blocks: jobs are queued with `try_send` and completions are
//! drained with `try_recv` whenever the relay polls.

use std::time::Duration;

use thiserror::Error;

pub mod endpoint;
pub mod ping;
pub mod primitives;
mod worker;

pub use endpoint::HttpChannelEndpoint;
pub use ping::HttpPingHost;
pub use primitives::HttpPrimitives;

/// Header carrying the channel sentinel on loads and envelope deliveries.
pub const SENTINEL_HEADER: &str = "X-Hitrelay-Sentinel";

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Overall per-request timeout.
    pub timeout: Duration,
    /// Jobs that may wait for the worker before submissions are refused.
    pub queue_capacity: usize,
    /// Advertise the beacon capability.
    pub beacon: bool,
    /// Advertise the credentialed POST capability.
    ///
    /// There is no cookie jar behind these requests, so the POST carries
    /// credentials only when `cookie` is set; otherwise it goes out like a
    /// plain POST.
    pub credentialed_post: bool,
    /// `Cookie` header attached to credentialed POSTs. Beacons never send it.
    pub cookie: Option<String>,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            queue_capacity: 1024,
            beacon: true,
            credentialed_post: true,
            cookie: None,
            user_agent: format!("hitrelay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpTransportError {
    #[error("http worker is closed")]
    Closed,
    #[error("http worker queue is full")]
    QueueFull,
    #[error("failed to spawn http worker: {0}")]
    Spawn(String),
    #[error("no channel loaded for {0}")]
    NotLoaded(String),
}
