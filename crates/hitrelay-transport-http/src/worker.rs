use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use hitrelay_core::{DestinationKey, Sentinel};
use hitrelay_transport::ping::PingId;
use hitrelay_transport::{LoadOutcome, TransportHealthSnapshot};
use tracing::debug;

use crate::{HttpTransportConfig, HttpTransportError, SENTINEL_HEADER};

/// Request handed to the worker thread.
#[derive(Debug)]
pub(crate) enum HttpJob {
    Beacon {
        url: String,
    },
    Post {
        url: String,
        cookie: Option<String>,
    },
    Pixel {
        url: String,
    },
    Load {
        destination: DestinationKey,
        sentinel: Sentinel,
    },
    Deliver {
        destination: DestinationKey,
        sentinel: Sentinel,
        body: Vec<u8>,
    },
    Ping {
        id: PingId,
        url: String,
    },
}

/// Completion reported back by the worker thread.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HttpEvent {
    BeaconDone {
        url: String,
        error: Option<String>,
    },
    PostDone {
        url: String,
        error: Option<String>,
    },
    PixelDone {
        url: String,
        outcome: LoadOutcome,
    },
    Loaded {
        destination: DestinationKey,
        sentinel: Sentinel,
    },
    LoadFailed {
        destination: DestinationKey,
        error: String,
    },
    Response {
        destination: DestinationKey,
        body: Vec<u8>,
    },
    DeliverFailed {
        destination: DestinationKey,
        error: String,
    },
    PingSettled {
        id: PingId,
        outcome: LoadOutcome,
    },
}

#[derive(Debug, Default)]
struct HttpWorkerMetrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    ok: AtomicU64,
    err: AtomicU64,
    inbound: AtomicU64,
}

/// One blocking HTTP worker thread fed through a bounded queue.
pub(crate) struct HttpWorker {
    jobs_tx: Option<mpsc::SyncSender<HttpJob>>,
    events_rx: mpsc::Receiver<HttpEvent>,
    worker: Option<JoinHandle<()>>,
    metrics: Arc<HttpWorkerMetrics>,
}

impl HttpWorker {
    pub(crate) fn spawn(name: &str, config: &HttpTransportConfig) -> Result<Self, HttpTransportError> {
        let (jobs_tx, jobs_rx) = mpsc::sync_channel::<HttpJob>(config.queue_capacity);
        let (events_tx, events_rx) = mpsc::channel::<HttpEvent>();
        let metrics = Arc::new(HttpWorkerMetrics::default());
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build();

        let worker_metrics = Arc::clone(&metrics);
        let worker = thread::Builder::new()
            .name(format!("hitrelay-http-{name}"))
            .spawn(move || {
                for job in jobs_rx {
                    let event = execute(&agent, job);
                    worker_metrics.completed.fetch_add(1, Ordering::Relaxed);
                    if event_failed(&event) {
                        worker_metrics.err.fetch_add(1, Ordering::Relaxed);
                    } else {
                        worker_metrics.ok.fetch_add(1, Ordering::Relaxed);
                    }
                    if events_tx.send(event).is_err() {
                        break;
                    }
                }
            })
            .map_err(|err| HttpTransportError::Spawn(err.to_string()))?;

        Ok(Self {
            jobs_tx: Some(jobs_tx),
            events_rx,
            worker: Some(worker),
            metrics,
        })
    }

    pub(crate) fn submit(&self, job: HttpJob) -> Result<(), HttpTransportError> {
        let tx = self.jobs_tx.as_ref().ok_or(HttpTransportError::Closed)?;
        tx.try_send(job).map_err(|err| match err {
            mpsc::TrySendError::Full(_) => HttpTransportError::QueueFull,
            mpsc::TrySendError::Disconnected(_) => HttpTransportError::Closed,
        })?;
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn poll(&self) -> Option<HttpEvent> {
        let event = self.events_rx.try_recv().ok()?;
        if matches!(event, HttpEvent::Response { .. }) {
            self.metrics.inbound.fetch_add(1, Ordering::Relaxed);
        }
        Some(event)
    }

    pub(crate) fn health_snapshot(&self, inbound_dropped: u64) -> TransportHealthSnapshot {
        let submitted = self.metrics.submitted.load(Ordering::Relaxed);
        let completed = self.metrics.completed.load(Ordering::Relaxed);
        TransportHealthSnapshot {
            outbound_queued: submitted.saturating_sub(completed),
            outbound_send_ok: self.metrics.ok.load(Ordering::Relaxed),
            outbound_send_err: self.metrics.err.load(Ordering::Relaxed),
            inbound_received: self.metrics.inbound.load(Ordering::Relaxed),
            inbound_dropped,
            last_error: None,
        }
    }
}

impl Drop for HttpWorker {
    fn drop(&mut self) {
        // Closing the job queue ends the worker loop after in-flight requests.
        self.jobs_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn event_failed(event: &HttpEvent) -> bool {
    match event {
        HttpEvent::BeaconDone { error, .. } | HttpEvent::PostDone { error, .. } => error.is_some(),
        HttpEvent::PixelDone { outcome, .. } | HttpEvent::PingSettled { outcome, .. } => {
            *outcome == LoadOutcome::Failed
        }
        HttpEvent::LoadFailed { .. } | HttpEvent::DeliverFailed { .. } => true,
        HttpEvent::Loaded { .. } | HttpEvent::Response { .. } => false,
    }
}

fn load_outcome(result: Result<ureq::Response, ureq::Error>) -> LoadOutcome {
    match result {
        Ok(_) => LoadOutcome::Loaded,
        Err(_) => LoadOutcome::Failed,
    }
}

fn execute(agent: &ureq::Agent, job: HttpJob) -> HttpEvent {
    match job {
        HttpJob::Beacon { url } => {
            let error = agent
                .post(&url)
                .set("Content-Type", "text/plain;charset=UTF-8")
                .send_string("")
                .err()
                .map(|err| err.to_string());
            HttpEvent::BeaconDone { url, error }
        }
        HttpJob::Post { url, cookie } => {
            let mut request = agent
                .post(&url)
                .set("Content-Type", "text/plain;charset=UTF-8");
            if let Some(cookie) = &cookie {
                request = request.set("Cookie", cookie);
            }
            let error = request
                .send_string("")
                .err()
                .map(|err| err.to_string());
            HttpEvent::PostDone { url, error }
        }
        HttpJob::Pixel { url } => {
            let outcome = load_outcome(agent.get(&url).call());
            HttpEvent::PixelDone { url, outcome }
        }
        HttpJob::Load {
            destination,
            sentinel,
        } => {
            let result = agent
                .get(destination.as_str())
                .set(SENTINEL_HEADER, sentinel.as_str())
                .call();
            match result {
                Ok(_) => HttpEvent::Loaded {
                    destination,
                    sentinel,
                },
                Err(err) => HttpEvent::LoadFailed {
                    destination,
                    error: err.to_string(),
                },
            }
        }
        HttpJob::Deliver {
            destination,
            sentinel,
            body,
        } => {
            let result = agent
                .post(destination.as_str())
                .set("Content-Type", "application/json")
                .set(SENTINEL_HEADER, sentinel.as_str())
                .send_bytes(&body);
            match result.map_err(|err| err.to_string()).and_then(|resp| {
                resp.into_string().map_err(|err| err.to_string())
            }) {
                Ok(text) => {
                    debug!(%destination, bytes = text.len(), "envelope delivered");
                    HttpEvent::Response {
                        destination,
                        body: text.into_bytes(),
                    }
                }
                Err(error) => HttpEvent::DeliverFailed { destination, error },
            }
        }
        HttpJob::Ping { id, url } => {
            let outcome = load_outcome(agent.get(&url).call());
            HttpEvent::PingSettled { id, outcome }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    /// One request as seen by the test server.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct SeenRequest {
        pub(crate) line: String,
        /// Header lines, names lowercased.
        pub(crate) headers: Vec<String>,
    }

    impl SeenRequest {
        pub(crate) fn header(&self, name: &str) -> Option<&str> {
            self.headers.iter().find_map(|h| {
                let (key, value) = h.split_once(':')?;
                (key == name).then(|| value.trim())
            })
        }
    }

    /// Serves `requests` HTTP requests with a fixed 200 body and returns the
    /// request lines it saw.
    pub(crate) fn serve(body: &'static str, requests: usize) -> (String, JoinHandle<Vec<String>>) {
        let (base, handle) = serve_recording(body, requests);
        let lines = thread::spawn(move || {
            handle
                .join()
                .expect("server")
                .into_iter()
                .map(|seen| seen.line)
                .collect()
        });
        (base, lines)
    }

    /// Like [`serve`], but keeps the headers of every request.
    pub(crate) fn serve_recording(
        body: &'static str,
        requests: usize,
    ) -> (String, JoinHandle<Vec<SeenRequest>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for stream in listener.incoming().take(requests) {
                let mut stream = stream.expect("accept");
                let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
                let mut request_line = String::new();
                reader.read_line(&mut request_line).expect("request line");
                let mut content_length = 0usize;
                let mut headers = Vec::new();
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).expect("header line");
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().expect("content length");
                        }
                        headers.push(format!("{}:{value}", name.to_ascii_lowercase()));
                    }
                }
                let mut request_body = vec![0u8; content_length];
                reader.read_exact(&mut request_body).expect("request body");
                seen.push(SeenRequest {
                    line: request_line.trim_end().to_string(),
                    headers,
                });

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).expect("write response");
            }
            seen
        });
        (format!("http://{addr}"), handle)
    }

    /// Polls `f` until it yields a value or five seconds pass.
    pub(crate) fn wait_for<T>(mut f: impl FnMut() -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(value) = f() {
                return Some(value);
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }
}
