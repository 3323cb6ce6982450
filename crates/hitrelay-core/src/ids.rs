use std::collections::{HashSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{SenderId, Sentinel};

/// Source of candidate identifiers for [`IdAllocator`].
///
/// Candidates may repeat; the allocator rejects anything already issued.
pub trait EntropySource: Send {
    fn next_candidate(&mut self) -> String;
}

/// Uniform random decimal-digit candidates.
#[derive(Debug)]
pub struct RandomEntropy {
    rng: StdRng,
}

impl RandomEntropy {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic source for simulations.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomEntropy {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl EntropySource for RandomEntropy {
    fn next_candidate(&mut self) -> String {
        self.rng.gen::<u64>().to_string()
    }
}

/// Replays a fixed candidate list, then falls back to a counter.
///
/// Lets tests force collisions.
#[derive(Debug, Default)]
pub struct SequenceEntropy {
    scripted: VecDeque<String>,
    fallback: u64,
    draws: u64,
}

impl SequenceEntropy {
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scripted: candidates.into_iter().map(Into::into).collect(),
            fallback: 0,
            draws: 0,
        }
    }

    /// Number of candidates handed out so far.
    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl EntropySource for SequenceEntropy {
    fn next_candidate(&mut self) -> String {
        self.draws += 1;
        if let Some(next) = self.scripted.pop_front() {
            return next;
        }
        self.fallback += 1;
        format!("seq-{}", self.fallback)
    }
}

/// Issues identifiers that never repeat over the allocator's lifetime.
///
/// Rejection sampling: draw, redraw while already issued, then record. The
/// issued set only grows until [`IdAllocator::reset`].
pub struct IdAllocator {
    source: Box<dyn EntropySource>,
    used: HashSet<String>,
    rejected_draws: u64,
}

impl IdAllocator {
    pub fn new(source: impl EntropySource + 'static) -> Self {
        Self {
            source: Box::new(source),
            used: HashSet::new(),
            rejected_draws: 0,
        }
    }

    /// Returns a fresh identifier never issued before by this allocator.
    pub fn new_id(&mut self) -> String {
        loop {
            let candidate = self.source.next_candidate();
            if !self.used.contains(&candidate) {
                self.used.insert(candidate.clone());
                return candidate;
            }
            self.rejected_draws += 1;
        }
    }

    pub fn new_sender_id(&mut self) -> SenderId {
        SenderId(self.new_id())
    }

    pub fn new_sentinel(&mut self) -> Sentinel {
        Sentinel(self.new_id())
    }

    /// Whether `id` has been issued.
    pub fn is_issued(&self, id: &str) -> bool {
        self.used.contains(id)
    }

    /// Number of identifiers issued.
    pub fn issued(&self) -> usize {
        self.used.len()
    }

    /// Candidates rejected because they collided with an issued id.
    pub fn rejected_draws(&self) -> u64 {
        self.rejected_draws
    }

    /// Forgets every issued id. Only for test isolation.
    pub fn reset(&mut self) {
        self.used.clear();
        self.rejected_draws = 0;
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(RandomEntropy::from_entropy())
    }
}

impl std::fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("issued", &self.used.len())
            .field("rejected_draws", &self.rejected_draws)
            .finish()
    }
}
