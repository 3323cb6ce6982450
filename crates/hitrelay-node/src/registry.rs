use std::collections::BTreeMap;

use hitrelay_codec::envelope::{decode_response, encode_envelope, Envelope};
use hitrelay_core::{DestinationKey, IdAllocator, Message, RelayError, SenderId, Step};
use hitrelay_transport::endpoint::ChannelEndpoint;
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelState, ResponseHandler};
use crate::stats::RelayStats;

/// Result of [`ChannelRegistry::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOutcome {
    /// Whether this call created the channel (and started its load).
    pub created: bool,
    pub refcount: usize,
    pub state: ChannelState,
}

/// Result of [`ChannelRegistry::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other holders remain; the channel stays usable.
    Decremented { refcount: usize },
    /// Last holder left; the channel and its endpoint are gone.
    Destroyed {
        discarded_messages: usize,
        cancelled_flush: bool,
    },
}

/// Owns every live channel, keyed by destination, and the endpoint that
/// carries their traffic.
///
/// A channel exists exactly while its refcount is positive.
#[derive(Debug)]
pub struct ChannelRegistry<E> {
    channels: BTreeMap<DestinationKey, Channel>,
    endpoint: E,
    throttle_steps: Step,
}

impl<E: ChannelEndpoint> ChannelRegistry<E> {
    pub fn new(endpoint: E, throttle_steps: Step) -> Self {
        Self {
            channels: BTreeMap::new(),
            endpoint,
            throttle_steps,
        }
    }

    /// Returns the channel for `destination`, creating it if absent.
    ///
    /// Creation allocates a sentinel and starts the endpoint load; the
    /// returned channel is still `Creating`. Every later acquire before or
    /// after the load completes resolves to the same channel.
    pub fn acquire(
        &mut self,
        destination: &DestinationKey,
        ids: &mut IdAllocator,
        now_step: Step,
    ) -> AcquireOutcome {
        if let Some(channel) = self.channels.get_mut(destination) {
            let refcount = channel.increment();
            debug!(%destination, refcount, "channel reused");
            return AcquireOutcome {
                created: false,
                refcount,
                state: channel.state(),
            };
        }

        let sentinel = ids.new_sentinel();
        if let Err(err) = self.endpoint.begin_load(destination, &sentinel) {
            warn!(%destination, "channel endpoint load failed to start: {err}");
        }
        self.channels.insert(
            destination.clone(),
            Channel::new(destination.clone(), sentinel, now_step),
        );
        debug!(%destination, "channel created");
        AcquireOutcome {
            created: true,
            refcount: 1,
            state: ChannelState::Creating,
        }
    }

    /// Drops one reference to `destination`'s channel.
    ///
    /// Releasing the last reference cancels the pending flush, discards
    /// unsent messages, destroys the endpoint resource and removes the entry.
    pub fn release(
        &mut self,
        destination: &DestinationKey,
        stats: &mut RelayStats,
    ) -> Result<ReleaseOutcome, RelayError> {
        let channel = self
            .channels
            .get_mut(destination)
            .ok_or_else(|| RelayError::UnknownDestination(destination.clone()))?;
        let refcount = channel.decrement();
        if refcount > 0 {
            debug!(%destination, refcount, "channel reference released");
            return Ok(ReleaseOutcome::Decremented { refcount });
        }

        let (discarded_messages, cancelled_flush) = channel.discard_queue();
        self.channels.remove(destination);
        self.endpoint.destroy(destination);
        stats.discarded_messages += discarded_messages;
        debug!(
            %destination,
            discarded_messages, cancelled_flush, "channel destroyed"
        );
        Ok(ReleaseOutcome::Destroyed {
            discarded_messages,
            cancelled_flush,
        })
    }

    /// Queues a message on `destination`'s channel.
    ///
    /// Returns the due step when this call scheduled the throttle flush.
    pub fn enqueue(
        &mut self,
        destination: &DestinationKey,
        message: Message,
        now_step: Step,
        stats: &mut RelayStats,
    ) -> Result<Option<Step>, RelayError> {
        let throttle_steps = self.throttle_steps;
        let channel = self
            .channels
            .get_mut(destination)
            .ok_or_else(|| RelayError::UnknownDestination(destination.clone()))?;
        stats.queued_messages += 1;
        Ok(channel.enqueue(message, now_step, throttle_steps))
    }

    /// Marks `destination` ready and flushes everything queued so far.
    ///
    /// Returns false when the destination is unknown (released before its
    /// load finished) or was already ready.
    pub fn mark_ready(
        &mut self,
        destination: &DestinationKey,
        now_step: Step,
        stats: &mut RelayStats,
    ) -> bool {
        let Some(channel) = self.channels.get_mut(destination) else {
            debug!(%destination, "load completed for released channel");
            return false;
        };
        if !channel.mark_ready(now_step) {
            return false;
        }
        debug!(
            %destination,
            queued = channel.queue().len(),
            load_steps = now_step.saturating_sub(channel.created_step()),
            "channel ready"
        );
        flush_channel(&mut self.endpoint, channel, stats);
        true
    }

    /// Flushes `destination` now. Returns the number of messages sent.
    ///
    /// A channel that is still loading or has nothing queued sends nothing.
    pub fn flush(
        &mut self,
        destination: &DestinationKey,
        stats: &mut RelayStats,
    ) -> Result<usize, RelayError> {
        let channel = self
            .channels
            .get_mut(destination)
            .ok_or_else(|| RelayError::UnknownDestination(destination.clone()))?;
        Ok(flush_channel(&mut self.endpoint, channel, stats))
    }

    /// Runs every throttle flush due at `now_step`. Returns messages sent.
    pub fn flush_due(&mut self, now_step: Step, stats: &mut RelayStats) -> usize {
        let mut sent = 0;
        for channel in self.channels.values_mut() {
            if channel.is_flush_due(now_step) {
                sent += flush_channel(&mut self.endpoint, channel, stats);
            }
        }
        sent
    }

    /// Earliest pending throttle flush across all channels.
    pub fn next_flush_due(&self) -> Option<Step> {
        self.channels
            .values()
            .filter_map(Channel::pending_flush)
            .min()
    }

    /// Drains load completions from the endpoint and marks those channels
    /// ready. Returns the destinations that became ready.
    ///
    /// A completion only counts for the channel whose sentinel it carries; a
    /// late completion of a torn-down predecessor leaves the live channel
    /// loading.
    pub fn pump_loaded(&mut self, now_step: Step, stats: &mut RelayStats) -> Vec<DestinationKey> {
        let mut ready = Vec::new();
        while let Some((destination, sentinel)) = self.endpoint.poll_loaded() {
            let stale = self
                .channels
                .get(&destination)
                .is_some_and(|channel| channel.sentinel() != &sentinel);
            if stale {
                stats.stale_loads_ignored += 1;
                debug!(%destination, %sentinel, "stale load completion ignored");
                continue;
            }
            if self.mark_ready(&destination, now_step, stats) {
                ready.push(destination);
            }
        }
        ready
    }

    /// Drains inbound payloads and routes valid responses to handlers.
    ///
    /// Malformed or foreign payloads are ignored. Returns how many responses
    /// reached a channel.
    pub fn pump_inbound(&mut self, stats: &mut RelayStats) -> usize {
        let mut delivered = 0;
        while let Some((destination, bytes)) = self.endpoint.recv() {
            let Some(channel) = self.channels.get_mut(&destination) else {
                stats.responses_ignored += 1;
                debug!(%destination, "response for unknown channel ignored");
                continue;
            };
            match decode_response(&bytes, channel.sentinel()) {
                Ok(response) => {
                    let handlers = channel.dispatch_response(&response);
                    stats.responses_delivered += 1;
                    delivered += 1;
                    debug!(%destination, handlers, "response delivered");
                }
                Err(err) => {
                    stats.responses_ignored += 1;
                    debug!(%destination, "inbound payload ignored: {err}");
                }
            }
        }
        delivered
    }

    /// Sends one extra-data payload if the channel is ready.
    ///
    /// `Ok(false)` means the channel is still loading and nothing was sent.
    pub fn send_extra_data(
        &mut self,
        destination: &DestinationKey,
        sender: &SenderId,
        data: &str,
        stats: &mut RelayStats,
    ) -> Result<bool, RelayError> {
        let channel = self
            .channels
            .get(destination)
            .ok_or_else(|| RelayError::UnknownDestination(destination.clone()))?;
        if !channel.is_ready() {
            return Ok(false);
        }
        let envelope = Envelope::extra_data(channel.sentinel().clone(), sender.clone(), data);
        send_envelope(&mut self.endpoint, destination, &envelope, stats);
        stats.extra_data_delivered += 1;
        Ok(true)
    }

    /// Registers `sender`'s response handler on `destination`'s channel,
    /// replacing any earlier handler of the same sender.
    pub fn set_response_handler(
        &mut self,
        destination: &DestinationKey,
        sender: SenderId,
        handler: ResponseHandler,
    ) -> Result<(), RelayError> {
        let channel = self
            .channels
            .get_mut(destination)
            .ok_or_else(|| RelayError::UnknownDestination(destination.clone()))?;
        if channel.set_handler(sender, handler) {
            debug!(%destination, "response handler replaced");
        }
        Ok(())
    }

    pub fn remove_response_handler(
        &mut self,
        destination: &DestinationKey,
        sender: &SenderId,
    ) -> Result<bool, RelayError> {
        let channel = self
            .channels
            .get_mut(destination)
            .ok_or_else(|| RelayError::UnknownDestination(destination.clone()))?;
        Ok(channel.remove_handler(sender))
    }

    pub fn channel(&self, destination: &DestinationKey) -> Option<&Channel> {
        self.channels.get(destination)
    }

    pub fn contains(&self, destination: &DestinationKey) -> bool {
        self.channels.contains_key(destination)
    }

    pub fn destinations(&self) -> impl Iterator<Item = &DestinationKey> {
        self.channels.keys()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Total messages waiting in all channel queues.
    pub fn queued_messages(&self) -> usize {
        self.channels.values().map(|c| c.queue().len()).sum()
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut E {
        &mut self.endpoint
    }

    /// Destroys every channel regardless of refcount.
    ///
    /// Unsent messages are discarded. Returns the number of channels removed.
    pub fn reset(&mut self, stats: &mut RelayStats) -> usize {
        let channels = std::mem::take(&mut self.channels);
        let removed = channels.len();
        for (destination, mut channel) in channels {
            let (discarded, _) = channel.discard_queue();
            stats.discarded_messages += discarded;
            self.endpoint.destroy(&destination);
        }
        removed
    }
}

/// Sends the channel's whole pending batch in one envelope.
fn flush_channel<E: ChannelEndpoint>(
    endpoint: &mut E,
    channel: &mut Channel,
    stats: &mut RelayStats,
) -> usize {
    let Some(batch) = channel.take_batch() else {
        return 0;
    };
    let sent = batch.len();
    let envelope = Envelope::events(channel.sentinel().clone(), batch);
    send_envelope(endpoint, channel.key(), &envelope, stats);
    stats.flushed_batches += 1;
    stats.flushed_messages += sent;
    sent
}

fn send_envelope<E: ChannelEndpoint>(
    endpoint: &mut E,
    destination: &DestinationKey,
    envelope: &Envelope,
    stats: &mut RelayStats,
) {
    let bytes = match encode_envelope(envelope) {
        Ok(bytes) => bytes,
        Err(err) => {
            stats.delivery_failures += 1;
            warn!(%destination, "failed to encode {}: {err}", envelope.message_type());
            return;
        }
    };
    if let Err(err) = endpoint.send(destination, &bytes) {
        stats.delivery_failures += 1;
        warn!(%destination, "failed to send {}: {err}", envelope.message_type());
    }
}
