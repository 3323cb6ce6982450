use std::collections::HashSet;

use hitrelay_core::{DestinationKey, IdAllocator, RelayError, SenderId, Step, TransportOptions};
use hitrelay_transport::endpoint::ChannelEndpoint;
use hitrelay_transport::ping::{PingFrameHost, PingId};
use hitrelay_transport::primitives::HitPrimitives;
use tracing::debug;

use crate::channel::ResponseHandler;
use crate::config::RelayConfig;
use crate::dispatcher::{dispatch, drain_primitive_completions, DispatchOutcome, DispatchParams};
use crate::extra_data::{ExtraDataOutcome, ExtraDataScheduler};
use crate::ping::OneShotPings;
use crate::registry::{AcquireOutcome, ChannelRegistry, ReleaseOutcome};
use crate::stats::RelayStats;

/// What one [`HitRelay::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Channels whose load completed during this tick.
    pub became_ready: Vec<DestinationKey>,
    pub responses_delivered: usize,
    /// Messages sent by throttle flushes that came due.
    pub flushed_messages: usize,
    pub extra_data_delivered: usize,
    pub pings_removed: usize,
    /// Primitive completions observed and logged.
    pub completions: usize,
}

/// Stateful relay facade.
///
/// Owns the id allocator, channel registry, extra-data scheduler, pings,
/// transports, config and stats. Every asynchronous boundary (endpoint loads,
/// throttle timers, primitive completions, frame teardown) is polled by
/// [`HitRelay::tick`].
pub struct HitRelay<P, E, H>
where
    P: HitPrimitives,
    E: ChannelEndpoint,
    H: PingFrameHost,
{
    pub primitives: P,
    pub registry: ChannelRegistry<E>,
    pub ping_host: H,
    pub config: RelayConfig,
    pub stats: RelayStats,
    ids: IdAllocator,
    senders: HashSet<SenderId>,
    extra_data: ExtraDataScheduler,
    pings: OneShotPings,
    now_step: Step,
}

impl<P, E, H> HitRelay<P, E, H>
where
    P: HitPrimitives,
    E: ChannelEndpoint,
    H: PingFrameHost,
{
    pub fn new(
        primitives: P,
        endpoint: E,
        ping_host: H,
        config: RelayConfig,
        ids: IdAllocator,
    ) -> Self {
        Self {
            primitives,
            registry: ChannelRegistry::new(endpoint, config.throttle_steps),
            ping_host,
            config,
            stats: RelayStats::default(),
            ids,
            senders: HashSet::new(),
            extra_data: ExtraDataScheduler::new(),
            pings: OneShotPings::new(),
            now_step: 0,
        }
    }

    /// Issues a fresh sender id. Senders are never unregistered.
    pub fn register_sender(&mut self) -> SenderId {
        let sender = self.ids.new_sender_id();
        self.senders.insert(sender.clone());
        debug!(%sender, "sender registered");
        sender
    }

    pub fn is_registered(&self, sender: &SenderId) -> bool {
        self.senders.contains(sender)
    }

    /// Acquires the channel named by `options.channel` on behalf of `sender`.
    ///
    /// Also registers the optional response handler and sends
    /// `options.extra_data` (when non-empty) through the retrying side
    /// channel.
    pub fn begin_channel(
        &mut self,
        sender: &SenderId,
        options: &TransportOptions,
        handler: Option<ResponseHandler>,
    ) -> Result<AcquireOutcome, RelayError> {
        self.require_sender(sender)?;
        let destination = options
            .channel
            .as_ref()
            .ok_or(RelayError::InvalidInput("options name no channel destination"))?;

        let outcome = self
            .registry
            .acquire(destination, &mut self.ids, self.now_step);
        if let Some(handler) = handler {
            self.registry
                .set_response_handler(destination, sender.clone(), handler)?;
        }
        if let Some(data) = options.extra_data.as_deref().filter(|d| !d.is_empty()) {
            let outcome = self.extra_data.send(
                &mut self.registry,
                destination,
                sender,
                data,
                self.now_step,
                self.config.extra_data_retry_policy(),
                &mut self.stats,
            )?;
            if let ExtraDataOutcome::Scheduled { next_attempt_step } = outcome {
                debug!(%destination, %sender, next_attempt_step, "extra data deferred");
            }
        }
        Ok(outcome)
    }

    /// Sends one hit for `sender` with the first applicable strategy.
    pub fn send_request(
        &mut self,
        sender: &SenderId,
        request: &str,
        options: &TransportOptions,
    ) -> Result<DispatchOutcome, RelayError> {
        self.require_sender(sender)?;
        dispatch(
            &mut self.primitives,
            &mut self.registry,
            DispatchParams {
                sender,
                request,
                options,
                now_step: self.now_step,
                stats: &mut self.stats,
            },
        )
    }

    /// Drops `sender`'s response handler and its reference to `destination`.
    ///
    /// Tearing down the channel also abandons extra data still waiting on it.
    pub fn done_using_channel(
        &mut self,
        sender: &SenderId,
        destination: &DestinationKey,
    ) -> Result<ReleaseOutcome, RelayError> {
        self.require_sender(sender)?;
        self.registry.remove_response_handler(destination, sender)?;
        let outcome = self.registry.release(destination, &mut self.stats)?;
        if let ReleaseOutcome::Destroyed { .. } = outcome {
            let dropped = self.extra_data.cancel_for(destination, &mut self.stats);
            if dropped > 0 {
                debug!(%destination, dropped, "pending extra data abandoned");
            }
        }
        Ok(outcome)
    }

    /// Fires a standalone ping. Not routed through the strategy chain.
    pub fn send_ping(&mut self, url: &str) -> Option<PingId> {
        self.pings.send(&mut self.ping_host, url, &mut self.stats)
    }

    /// Signals that `destination` finished loading.
    ///
    /// Flushes the queue and delivers waiting extra data at once. Returns
    /// false if the channel is gone or was already ready.
    pub fn mark_ready(&mut self, destination: &DestinationKey) -> bool {
        if !self
            .registry
            .mark_ready(destination, self.now_step, &mut self.stats)
        {
            return false;
        }
        self.extra_data
            .deliver_ready(&mut self.registry, destination, &mut self.stats);
        true
    }

    /// Advances the relay to `now_step` and services everything due.
    pub fn tick(&mut self, now_step: Step) -> TickReport {
        self.now_step = self.now_step.max(now_step);
        let now_step = self.now_step;
        let mut report = TickReport::default();

        report.became_ready = self.registry.pump_loaded(now_step, &mut self.stats);
        for destination in &report.became_ready {
            report.extra_data_delivered +=
                self.extra_data
                    .deliver_ready(&mut self.registry, destination, &mut self.stats);
        }
        report.responses_delivered = self.registry.pump_inbound(&mut self.stats);
        report.flushed_messages = self.registry.flush_due(now_step, &mut self.stats);
        report.extra_data_delivered += self.extra_data.tick(
            &mut self.registry,
            now_step,
            self.config.extra_data_retry_policy(),
            &mut self.stats,
        );
        report.pings_removed = self.pings.tick(
            &mut self.ping_host,
            now_step,
            self.config.ping_teardown_steps,
            &mut self.stats,
        );
        report.completions = drain_primitive_completions(&mut self.primitives, &mut self.stats);
        report
    }

    /// True when nothing is queued, waiting or attached.
    pub fn is_idle(&self) -> bool {
        self.registry.queued_messages() == 0
            && self.extra_data.is_empty()
            && self.pings.open_count() == 0
    }

    /// Earliest step at which a tick has timed work to do.
    pub fn next_wakeup(&self) -> Option<Step> {
        [
            self.registry.next_flush_due(),
            self.extra_data.next_due(),
            self.pings.next_removal(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn now_step(&self) -> Step {
        self.now_step
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn extra_data(&self) -> &ExtraDataScheduler {
        &self.extra_data
    }

    /// Tears everything down and forgets every issued id.
    pub fn reset(&mut self) {
        let channels = self.registry.reset(&mut self.stats);
        self.extra_data.clear();
        self.pings.clear(&mut self.ping_host);
        self.ids.reset();
        self.senders.clear();
        debug!(channels, "relay reset");
    }

    fn require_sender(&self, sender: &SenderId) -> Result<(), RelayError> {
        if self.senders.contains(sender) {
            Ok(())
        } else {
            Err(RelayError::UnknownSender(sender.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use hitrelay_codec::envelope::{encode_envelope, Envelope};
    use hitrelay_core::{
        DestinationKey, IdAllocator, RelayError, SenderId, SequenceEntropy, TransportOptions,
    };
    use hitrelay_transport::endpoint::InMemoryEndpoint;
    use hitrelay_transport::ping::InMemoryPingHost;
    use hitrelay_transport::primitives::InMemoryPrimitives;
    use hitrelay_transport::LoadOutcome;
    use serde_json::{json, Value};

    use super::HitRelay;
    use crate::config::RelayConfig;
    use crate::registry::ReleaseOutcome;

    type TestRelay = HitRelay<InMemoryPrimitives, InMemoryEndpoint, InMemoryPingHost>;

    const DEST: &str = "https://vendor.example/frame";

    fn relay() -> TestRelay {
        HitRelay::new(
            InMemoryPrimitives::default(),
            InMemoryEndpoint::default(),
            InMemoryPingHost::default(),
            RelayConfig::default(),
            IdAllocator::new(SequenceEntropy::default()),
        )
    }

    fn with_extra(data: &str) -> TransportOptions {
        TransportOptions {
            extra_data: Some(data.to_string()),
            ..TransportOptions::channel(DEST)
        }
    }

    #[test]
    fn unregistered_sender_is_rejected() {
        let mut relay = relay();
        let stranger = SenderId::new("stranger");
        let err = relay
            .send_request(&stranger, "https://x", &TransportOptions::default())
            .expect_err("unknown sender");
        assert_eq!(err, RelayError::UnknownSender(stranger));
    }

    #[test]
    fn begin_channel_requires_a_channel_destination() {
        let mut relay = relay();
        let sender = relay.register_sender();
        let err = relay
            .begin_channel(&sender, &TransportOptions::default(), None)
            .expect_err("no destination");
        assert!(matches!(err, RelayError::InvalidInput(_)));
        assert!(relay.registry.is_empty());
    }

    #[test]
    fn senders_get_distinct_ids() {
        let mut relay = relay();
        let a = relay.register_sender();
        let b = relay.register_sender();
        assert_ne!(a, b);
        assert!(relay.is_registered(&a));
        assert_eq!(relay.ids().issued(), 2);
    }

    #[test]
    fn extra_data_waits_for_readiness_then_is_delivered_once() {
        let mut relay = relay();
        let sender = relay.register_sender();
        let dest = DestinationKey::new(DEST);
        relay
            .begin_channel(&sender, &with_extra("ctx"), None)
            .expect("begin");
        assert_eq!(relay.extra_data().pending().len(), 1);

        let report = relay.tick(10);
        assert_eq!(report.extra_data_delivered, 0);
        assert!(relay.registry.endpoint_mut().take_outbound().is_empty());

        relay.registry.endpoint_mut().complete_load(DEST);
        let report = relay.tick(15);
        assert_eq!(report.became_ready, vec![dest.clone()]);
        assert_eq!(report.extra_data_delivered, 1);

        relay.tick(100);
        let outbound = relay.registry.endpoint_mut().take_outbound();
        assert_eq!(outbound.len(), 1);
        let sent: Value = serde_json::from_slice(&outbound[0].1).expect("json");
        assert_eq!(sent["type"], "ampAnalytics3pExtraData");
        assert_eq!(sent["ampAnalytics3pExtraData"], "ctx");
        assert_eq!(relay.stats.extra_data_delivered, 1);
    }

    #[test]
    fn empty_extra_data_is_not_sent() {
        let mut relay = relay();
        let sender = relay.register_sender();
        relay
            .begin_channel(&sender, &with_extra(""), None)
            .expect("begin");
        assert!(relay.extra_data().is_empty());
    }

    #[test]
    fn bounded_extra_data_is_dropped_when_channel_never_loads() {
        let mut relay = relay();
        relay.config.extra_data_max_attempts = Some(3);
        let sender = relay.register_sender();
        relay
            .begin_channel(&sender, &with_extra("ctx"), None)
            .expect("begin");

        relay.tick(10);
        relay.tick(20);
        assert!(relay.extra_data().is_empty());
        assert_eq!(relay.stats.extra_data_dropped, 1);
    }

    #[test]
    fn responses_reach_handlers_until_done_using_channel() {
        let mut relay = relay();
        let sender = relay.register_sender();
        let dest = DestinationKey::new(DEST);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        relay
            .begin_channel(
                &sender,
                &TransportOptions::channel(DEST),
                Some(Box::new(move |v: &Value| sink.lock().expect("lock").push(v.clone()))),
            )
            .expect("begin");
        relay.registry.endpoint_mut().complete_load(DEST);
        relay.tick(1);

        let sentinel = relay
            .registry
            .channel(&dest)
            .expect("live channel")
            .sentinel()
            .clone();
        let bytes = encode_envelope(&Envelope::response(sentinel, json!({"ok": true})))
            .expect("encode");
        relay.registry.endpoint_mut().enqueue_inbound(DEST, bytes);
        assert_eq!(relay.tick(2).responses_delivered, 1);
        assert_eq!(*seen.lock().expect("lock"), vec![json!({"ok": true})]);

        let outcome = relay
            .done_using_channel(&sender, &dest)
            .expect("release");
        assert!(matches!(outcome, ReleaseOutcome::Destroyed { .. }));
        assert!(relay.registry.is_empty());
    }

    #[test]
    fn teardown_abandons_pending_extra_data() {
        let mut relay = relay();
        let sender = relay.register_sender();
        let dest = DestinationKey::new(DEST);
        relay
            .begin_channel(&sender, &with_extra("ctx"), None)
            .expect("begin");
        relay.done_using_channel(&sender, &dest).expect("release");
        assert!(relay.extra_data().is_empty());
        assert_eq!(relay.stats.extra_data_dropped, 1);
        assert!(relay.is_idle());
    }

    #[test]
    fn next_wakeup_tracks_earliest_timer() {
        let mut relay = relay();
        let sender = relay.register_sender();
        assert_eq!(relay.next_wakeup(), None);

        relay
            .begin_channel(&sender, &TransportOptions::channel(DEST), None)
            .expect("begin");
        relay.registry.endpoint_mut().complete_load(DEST);
        relay.tick(40);
        relay
            .send_request(&sender, "hit", &TransportOptions::channel(DEST))
            .expect("queued");
        assert_eq!(relay.next_wakeup(), Some(140));

        let ping = relay.send_ping("https://ping.example").expect("ping");
        relay.ping_host.settle(ping, LoadOutcome::Loaded);
        relay.tick(50);
        assert_eq!(relay.next_wakeup(), Some(140));
        relay.tick(140);
        assert_eq!(relay.next_wakeup(), Some(5_050));
        assert_eq!(relay.tick(5_050).pings_removed, 1);
        assert!(relay.is_idle());
    }

    #[test]
    fn time_never_moves_backwards() {
        let mut relay = relay();
        relay.tick(500);
        relay.tick(100);
        assert_eq!(relay.now_step(), 500);
    }

    #[test]
    fn reset_clears_channels_senders_and_ids() {
        let mut relay = relay();
        let sender = relay.register_sender();
        relay
            .begin_channel(&sender, &with_extra("ctx"), None)
            .expect("begin");
        relay.reset();
        assert!(relay.registry.is_empty());
        assert!(relay.extra_data().is_empty());
        assert!(!relay.is_registered(&sender));
        assert_eq!(relay.ids().issued(), 0);
    }
}
