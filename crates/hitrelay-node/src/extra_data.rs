use hitrelay_core::{DestinationKey, RelayError, SenderId, Step};
use hitrelay_transport::endpoint::ChannelEndpoint;
use tracing::{debug, warn};

use crate::registry::ChannelRegistry;
use crate::stats::RelayStats;

/// Retry policy for extra data waiting on a loading channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraDataRetryPolicy {
    /// Steps between attempts.
    pub retry_steps: Step,
    /// Total attempts allowed, including the first. `None` is unbounded.
    pub max_attempts: Option<u32>,
}

/// Outcome of [`ExtraDataScheduler::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraDataOutcome {
    /// Sent on the first attempt.
    Delivered,
    /// Channel still loading; another attempt is due at `next_attempt_step`.
    Scheduled { next_attempt_step: Step },
    /// Channel still loading and the retry bound allowed no further attempt.
    Dropped,
}

/// Extra data waiting for its channel to become ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExtraData {
    pub destination: DestinationKey,
    pub sender_id: SenderId,
    pub data: String,
    /// Step of the next delivery attempt.
    pub next_attempt_step: Step,
    /// Attempts made so far.
    pub attempts: u32,
}

/// Side channel delivering one auxiliary payload per acquisition, outside the
/// message queue.
///
/// Each payload retries on its own schedule until its channel is ready; it is
/// never coalesced with other payloads or with queued hits.
#[derive(Debug, Default)]
pub struct ExtraDataScheduler {
    pending: Vec<PendingExtraData>,
}

impl ExtraDataScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts delivery now, scheduling retries while the channel loads.
    ///
    /// The destination must have a live channel.
    #[allow(clippy::too_many_arguments)]
    pub fn send<E: ChannelEndpoint>(
        &mut self,
        registry: &mut ChannelRegistry<E>,
        destination: &DestinationKey,
        sender_id: &SenderId,
        data: &str,
        now_step: Step,
        policy: ExtraDataRetryPolicy,
        stats: &mut RelayStats,
    ) -> Result<ExtraDataOutcome, RelayError> {
        if registry.send_extra_data(destination, sender_id, data, stats)? {
            return Ok(ExtraDataOutcome::Delivered);
        }
        if attempts_exhausted(1, policy) {
            stats.extra_data_dropped += 1;
            warn!(%destination, sender = %sender_id, "extra data dropped: channel not ready");
            return Ok(ExtraDataOutcome::Dropped);
        }
        let next_attempt_step = now_step.saturating_add(policy.retry_steps);
        self.pending.push(PendingExtraData {
            destination: destination.clone(),
            sender_id: sender_id.clone(),
            data: data.to_string(),
            next_attempt_step,
            attempts: 1,
        });
        debug!(%destination, sender = %sender_id, next_attempt_step, "extra data waiting for channel");
        Ok(ExtraDataOutcome::Scheduled { next_attempt_step })
    }

    /// Runs every attempt due at `now_step`. Returns payloads delivered.
    pub fn tick<E: ChannelEndpoint>(
        &mut self,
        registry: &mut ChannelRegistry<E>,
        now_step: Step,
        policy: ExtraDataRetryPolicy,
        stats: &mut RelayStats,
    ) -> usize {
        let mut delivered = 0;
        let mut kept = Vec::with_capacity(self.pending.len());
        for mut entry in std::mem::take(&mut self.pending) {
            if entry.next_attempt_step > now_step {
                kept.push(entry);
                continue;
            }
            match registry.send_extra_data(&entry.destination, &entry.sender_id, &entry.data, stats)
            {
                Ok(true) => delivered += 1,
                Ok(false) => {
                    entry.attempts += 1;
                    if attempts_exhausted(entry.attempts, policy) {
                        stats.extra_data_dropped += 1;
                        warn!(
                            destination = %entry.destination,
                            sender = %entry.sender_id,
                            attempts = entry.attempts,
                            "extra data dropped: channel never became ready"
                        );
                        continue;
                    }
                    entry.next_attempt_step = now_step.saturating_add(policy.retry_steps);
                    kept.push(entry);
                }
                Err(_) => {
                    stats.extra_data_dropped += 1;
                    debug!(destination = %entry.destination, "extra data dropped: channel released");
                }
            }
        }
        self.pending = kept;
        delivered
    }

    /// Delivers everything waiting on `destination` at once.
    ///
    /// Called right after the channel turns ready so payloads do not wait for
    /// their next retry tick.
    pub fn deliver_ready<E: ChannelEndpoint>(
        &mut self,
        registry: &mut ChannelRegistry<E>,
        destination: &DestinationKey,
        stats: &mut RelayStats,
    ) -> usize {
        let mut delivered = 0;
        let mut kept = Vec::with_capacity(self.pending.len());
        for entry in std::mem::take(&mut self.pending) {
            if &entry.destination != destination {
                kept.push(entry);
                continue;
            }
            match registry.send_extra_data(&entry.destination, &entry.sender_id, &entry.data, stats)
            {
                Ok(true) => delivered += 1,
                Ok(false) => kept.push(entry),
                Err(_) => stats.extra_data_dropped += 1,
            }
        }
        self.pending = kept;
        delivered
    }

    /// Drops everything waiting on a torn-down channel.
    pub fn cancel_for(&mut self, destination: &DestinationKey, stats: &mut RelayStats) -> usize {
        let before = self.pending.len();
        self.pending.retain(|entry| &entry.destination != destination);
        let dropped = before - self.pending.len();
        stats.extra_data_dropped += dropped;
        dropped
    }

    pub fn pending(&self) -> &[PendingExtraData] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Earliest scheduled attempt.
    pub fn next_due(&self) -> Option<Step> {
        self.pending.iter().map(|e| e.next_attempt_step).min()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

fn attempts_exhausted(attempts: u32, policy: ExtraDataRetryPolicy) -> bool {
    policy.max_attempts.is_some_and(|max| attempts >= max)
}
