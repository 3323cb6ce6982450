use std::collections::{HashSet, VecDeque};

use hitrelay_transport::ping::{PingFrameHost, PingId};
use hitrelay_transport::LoadOutcome;
use tracing::debug;

use crate::worker::{HttpEvent, HttpJob, HttpWorker};
use crate::{HttpTransportConfig, HttpTransportError};

/// Ping host issuing one GET per frame.
///
/// There is no document to detach, so removal only forgets the frame and
/// discards any late completion.
pub struct HttpPingHost {
    worker: HttpWorker,
    next_id: PingId,
    open: HashSet<PingId>,
    settled: VecDeque<(PingId, LoadOutcome)>,
}

impl HttpPingHost {
    pub fn new(config: &HttpTransportConfig) -> Result<Self, HttpTransportError> {
        Ok(Self {
            worker: HttpWorker::spawn("ping", config)?,
            next_id: 0,
            open: HashSet::new(),
            settled: VecDeque::new(),
        })
    }

    pub fn open_frames(&self) -> usize {
        self.open.len()
    }
}

impl PingFrameHost for HttpPingHost {
    type Error = HttpTransportError;

    fn open(&mut self, url: &str) -> Result<PingId, Self::Error> {
        self.next_id += 1;
        let id = self.next_id;
        self.worker.submit(HttpJob::Ping {
            id,
            url: url.to_string(),
        })?;
        self.open.insert(id);
        Ok(id)
    }

    fn poll_settled(&mut self) -> Option<(PingId, LoadOutcome)> {
        while let Some(event) = self.worker.poll() {
            match event {
                HttpEvent::PingSettled { id, outcome } if self.open.contains(&id) => {
                    self.settled.push_back((id, outcome));
                }
                other => debug!(?other, "ping completion ignored"),
            }
        }
        self.settled.pop_front()
    }

    fn remove(&mut self, id: PingId) {
        self.open.remove(&id);
        self.settled.retain(|(settled, _)| *settled != id);
    }
}
