use std::collections::VecDeque;

use hitrelay_transport::primitives::HitPrimitives;
use hitrelay_transport::{LoadOutcome, TransportHealthSnapshot};
use tracing::{debug, warn};

use crate::worker::{HttpEvent, HttpJob, HttpWorker};
use crate::{HttpTransportConfig, HttpTransportError};

/// Beacon, credentialed POST and pixel primitives over HTTP.
///
/// A beacon counts as accepted once it is queued for the worker, mirroring a
/// runtime that only reports whether it took the request.
pub struct HttpPrimitives {
    worker: HttpWorker,
    beacon: bool,
    credentialed_post: bool,
    cookie: Option<String>,
    pixel_outcomes: VecDeque<(String, LoadOutcome)>,
    post_completions: VecDeque<String>,
}

impl HttpPrimitives {
    pub fn new(config: &HttpTransportConfig) -> Result<Self, HttpTransportError> {
        Ok(Self {
            worker: HttpWorker::spawn("primitives", config)?,
            beacon: config.beacon,
            credentialed_post: config.credentialed_post,
            cookie: config.cookie.clone(),
            pixel_outcomes: VecDeque::new(),
            post_completions: VecDeque::new(),
        })
    }

    fn pump(&mut self) {
        while let Some(event) = self.worker.poll() {
            match event {
                HttpEvent::BeaconDone { url, error: None } => debug!(url, "beacon delivered"),
                HttpEvent::BeaconDone {
                    url,
                    error: Some(error),
                } => warn!(url, "beacon delivery failed: {error}"),
                HttpEvent::PostDone { url, error: None } => self.post_completions.push_back(url),
                HttpEvent::PostDone {
                    url,
                    error: Some(error),
                } => warn!(url, "credentialed post failed: {error}"),
                HttpEvent::PixelDone { url, outcome } => self.pixel_outcomes.push_back((url, outcome)),
                other => debug!(?other, "unexpected event on primitives worker"),
            }
        }
    }
}

impl HitPrimitives for HttpPrimitives {
    type Error = HttpTransportError;

    fn supports_beacon(&self) -> bool {
        self.beacon
    }

    fn send_beacon(&mut self, url: &str) -> bool {
        if !self.beacon {
            return false;
        }
        match self.worker.submit(HttpJob::Beacon {
            url: url.to_string(),
        }) {
            Ok(()) => true,
            Err(err) => {
                debug!(url, "beacon not accepted: {err}");
                false
            }
        }
    }

    fn supports_credentialed_post(&self) -> bool {
        self.credentialed_post
    }

    fn send_credentialed_post(&mut self, url: &str) -> Result<(), Self::Error> {
        self.worker.submit(HttpJob::Post {
            url: url.to_string(),
            cookie: self.cookie.clone(),
        })
    }

    fn send_pixel(&mut self, url: &str) -> Result<(), Self::Error> {
        self.worker.submit(HttpJob::Pixel {
            url: url.to_string(),
        })
    }

    fn poll_pixel_outcome(&mut self) -> Option<(String, LoadOutcome)> {
        self.pump();
        self.pixel_outcomes.pop_front()
    }

    fn poll_post_completion(&mut self) -> Option<String> {
        self.pump();
        self.post_completions.pop_front()
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        self.worker.health_snapshot(0)
    }
}
