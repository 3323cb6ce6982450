use std::collections::VecDeque;
use std::fmt;

use crate::LoadOutcome;

/// Handle of one open ping frame.
pub type PingId = u64;

/// Host for standalone one-shot ping frames.
///
/// A ping frame issues a single GET; once it settles (load or error) the
/// caller removes it after a teardown delay.
pub trait PingFrameHost {
    type Error: fmt::Display;

    /// Opens a hidden frame requesting `url`.
    fn open(&mut self, url: &str) -> Result<PingId, Self::Error>;

    /// Returns the next frame that finished loading or failed.
    fn poll_settled(&mut self) -> Option<(PingId, LoadOutcome)>;

    /// Removes a frame. Unknown ids are ignored.
    fn remove(&mut self, id: PingId);
}

/// In-memory ping host for tests and simulations.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPingHost {
    next_id: PingId,
    open: Vec<(PingId, String)>,
    settled: VecDeque<(PingId, LoadOutcome)>,
    removed: Vec<PingId>,
    auto_settle: Option<LoadOutcome>,
}

impl InMemoryPingHost {
    /// Frames currently attached.
    pub fn open_frames(&self) -> &[(PingId, String)] {
        &self.open
    }

    pub fn removed(&self) -> &[PingId] {
        &self.removed
    }

    /// If set, every frame settles with `outcome` as soon as it opens.
    pub fn set_auto_settle(&mut self, outcome: Option<LoadOutcome>) {
        self.auto_settle = outcome;
    }

    /// Signals that frame `id` settled.
    pub fn settle(&mut self, id: PingId, outcome: LoadOutcome) {
        self.settled.push_back((id, outcome));
    }
}

impl PingFrameHost for InMemoryPingHost {
    type Error = &'static str;

    fn open(&mut self, url: &str) -> Result<PingId, Self::Error> {
        self.next_id += 1;
        self.open.push((self.next_id, url.to_string()));
        if let Some(outcome) = self.auto_settle {
            self.settled.push_back((self.next_id, outcome));
        }
        Ok(self.next_id)
    }

    fn poll_settled(&mut self) -> Option<(PingId, LoadOutcome)> {
        self.settled.pop_front()
    }

    fn remove(&mut self, id: PingId) {
        let before = self.open.len();
        self.open.retain(|(open_id, _)| *open_id != id);
        if self.open.len() != before {
            self.removed.push(id);
        }
    }
}
