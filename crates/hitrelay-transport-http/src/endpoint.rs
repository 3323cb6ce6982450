use std::collections::{HashMap, VecDeque};

use hitrelay_core::{DestinationKey, Sentinel};
use hitrelay_transport::endpoint::ChannelEndpoint;
use hitrelay_transport::TransportHealthSnapshot;
use tracing::{debug, warn};

use crate::worker::{HttpEvent, HttpJob, HttpWorker};
use crate::{HttpTransportConfig, HttpTransportError};

/// Channel endpoint that treats each destination as an HTTP collector.
///
/// Loading issues a GET; a successful response marks the destination ready.
/// Envelopes go out as JSON POSTs and any non-empty response body comes back
/// as inbound traffic for that destination.
pub struct HttpChannelEndpoint {
    worker: HttpWorker,
    sentinels: HashMap<DestinationKey, Sentinel>,
    loaded: VecDeque<(DestinationKey, Sentinel)>,
    inbound: VecDeque<(DestinationKey, Vec<u8>)>,
    inbound_dropped: u64,
}

impl HttpChannelEndpoint {
    pub fn new(config: &HttpTransportConfig) -> Result<Self, HttpTransportError> {
        Ok(Self {
            worker: HttpWorker::spawn("endpoint", config)?,
            sentinels: HashMap::new(),
            loaded: VecDeque::new(),
            inbound: VecDeque::new(),
            inbound_dropped: 0,
        })
    }

    fn pump(&mut self) {
        while let Some(event) = self.worker.poll() {
            match event {
                HttpEvent::Loaded {
                    destination,
                    sentinel,
                } => {
                    if self.sentinels.get(&destination) == Some(&sentinel) {
                        self.loaded.push_back((destination, sentinel));
                    } else {
                        debug!(%destination, "stale load completion dropped");
                    }
                }
                HttpEvent::LoadFailed { destination, error } => {
                    warn!(%destination, "channel load failed: {error}");
                }
                HttpEvent::Response { destination, body } => {
                    if body.is_empty() {
                        continue;
                    }
                    if self.sentinels.contains_key(&destination) {
                        self.inbound.push_back((destination, body));
                    } else {
                        self.inbound_dropped += 1;
                    }
                }
                HttpEvent::DeliverFailed { destination, error } => {
                    warn!(%destination, "envelope delivery failed: {error}");
                }
                other => debug!(?other, "unexpected event on endpoint worker"),
            }
        }
    }
}

impl ChannelEndpoint for HttpChannelEndpoint {
    type Error = HttpTransportError;

    fn begin_load(
        &mut self,
        destination: &DestinationKey,
        sentinel: &Sentinel,
    ) -> Result<(), Self::Error> {
        self.sentinels.insert(destination.clone(), sentinel.clone());
        self.worker.submit(HttpJob::Load {
            destination: destination.clone(),
            sentinel: sentinel.clone(),
        })
    }

    fn poll_loaded(&mut self) -> Option<(DestinationKey, Sentinel)> {
        self.pump();
        self.loaded.pop_front()
    }

    fn send(&mut self, destination: &DestinationKey, bytes: &[u8]) -> Result<(), Self::Error> {
        let sentinel = self
            .sentinels
            .get(destination)
            .ok_or_else(|| HttpTransportError::NotLoaded(destination.to_string()))?;
        self.worker.submit(HttpJob::Deliver {
            destination: destination.clone(),
            sentinel: sentinel.clone(),
            body: bytes.to_vec(),
        })
    }

    fn recv(&mut self) -> Option<(DestinationKey, Vec<u8>)> {
        self.pump();
        self.inbound.pop_front()
    }

    fn destroy(&mut self, destination: &DestinationKey) {
        self.sentinels.remove(destination);
        self.loaded.retain(|(d, _)| d != destination);
        let before = self.inbound.len();
        self.inbound.retain(|(d, _)| d != destination);
        self.inbound_dropped += (before - self.inbound.len()) as u64;
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        self.worker.health_snapshot(self.inbound_dropped)
    }
}

#[cfg(test)]
mod tests {
    use hitrelay_core::{DestinationKey, Sentinel};
    use hitrelay_transport::endpoint::ChannelEndpoint;

    use super::HttpChannelEndpoint;
    use crate::worker::test_server::{serve, wait_for};
    use crate::{HttpTransportConfig, HttpTransportError};

    const RESPONSE: &str =
        r#"{"type":"ampAnalytics3pResponse","sentinel":"s-1","ampAnalytics3pResponse":"ok"}"#;

    #[test]
    fn load_then_send_round_trips_response_body() {
        let (base, server) = serve(RESPONSE, 2);
        let dest = DestinationKey::new(format!("{base}/frame"));
        let mut endpoint = HttpChannelEndpoint::new(&HttpTransportConfig::default()).expect("spawn");

        endpoint
            .begin_load(&dest, &Sentinel::new("s-1"))
            .expect("load queued");
        assert_eq!(
            wait_for(|| endpoint.poll_loaded()),
            Some((dest.clone(), Sentinel::new("s-1")))
        );

        endpoint.send(&dest, br#"{"type":"x"}"#).expect("send queued");
        let (from, body) = wait_for(|| endpoint.recv()).expect("response");
        assert_eq!(from, dest);
        assert_eq!(body, RESPONSE.as_bytes());

        let seen = server.join().expect("server");
        assert_eq!(seen, vec!["GET /frame HTTP/1.1", "POST /frame HTTP/1.1"]);
        assert_eq!(endpoint.health_snapshot().inbound_received, 1);
    }

    #[test]
    fn send_without_load_is_rejected() {
        let mut endpoint = HttpChannelEndpoint::new(&HttpTransportConfig::default()).expect("spawn");
        let dest = DestinationKey::new("http://127.0.0.1:9/frame");
        assert_eq!(
            endpoint.send(&dest, b"{}"),
            Err(HttpTransportError::NotLoaded(dest.to_string()))
        );
    }

    #[test]
    fn destroyed_destination_never_reports_loaded() {
        let (base, server) = serve("", 1);
        let dest = DestinationKey::new(format!("{base}/frame"));
        let mut endpoint = HttpChannelEndpoint::new(&HttpTransportConfig::default()).expect("spawn");
        endpoint
            .begin_load(&dest, &Sentinel::new("s-1"))
            .expect("load queued");
        endpoint.destroy(&dest);

        server.join().expect("server");
        // The stale completion is dropped rather than reported.
        assert_eq!(wait_for(|| endpoint.poll_loaded()), None);
    }
}
