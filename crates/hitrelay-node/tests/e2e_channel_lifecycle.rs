use hitrelay_codec::envelope::{decode_envelope, Envelope};
use hitrelay_core::{DestinationKey, IdAllocator, SenderId, SequenceEntropy, TransportOptions};
use hitrelay_node::channel::ChannelState;
use hitrelay_node::config::RelayConfig;
use hitrelay_node::dispatcher::DispatchOutcome;
use hitrelay_node::registry::ReleaseOutcome;
use hitrelay_node::service::HitRelay;
use hitrelay_transport::endpoint::InMemoryEndpoint;
use hitrelay_transport::ping::InMemoryPingHost;
use hitrelay_transport::primitives::InMemoryPrimitives;

type Relay = HitRelay<InMemoryPrimitives, InMemoryEndpoint, InMemoryPingHost>;

const VENDOR: &str = "https://vendor/x";

fn relay() -> Relay {
    HitRelay::new(
        InMemoryPrimitives::default(),
        InMemoryEndpoint::default(),
        InMemoryPingHost::default(),
        RelayConfig::default(),
        IdAllocator::new(SequenceEntropy::default()),
    )
}

fn batch_payloads(bytes: &[u8]) -> Vec<(SenderId, String)> {
    match decode_envelope(bytes).expect("outbound envelope decodes") {
        Envelope::Events { events, .. } => events
            .into_iter()
            .map(|e| (e.sender_id, e.request))
            .collect(),
        other => panic!("expected events envelope, got {}", other.message_type()),
    }
}

#[test]
fn concurrent_acquires_share_one_channel_and_one_load() {
    let mut relay = relay();
    let a = relay.register_sender();
    let b = relay.register_sender();
    let options = TransportOptions::channel(VENDOR);
    let dest = DestinationKey::new(VENDOR);

    let first = relay.begin_channel(&a, &options, None).expect("acquire a");
    let second = relay.begin_channel(&b, &options, None).expect("acquire b");

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(second.refcount, 2);
    assert_eq!(relay.registry.len(), 1);
    assert_eq!(relay.registry.endpoint().load_count(&dest), 1);
    assert_eq!(
        relay.registry.channel(&dest).map(|c| c.state()),
        Some(ChannelState::Creating)
    );
}

#[test]
fn hits_queued_before_readiness_flush_once_in_order() {
    let mut relay = relay();
    let sender = relay.register_sender();
    let options = TransportOptions::channel(VENDOR);
    relay.begin_channel(&sender, &options, None).expect("acquire");

    for hit in ["m1", "m2", "m3"] {
        let outcome = relay.send_request(&sender, hit, &options).expect("queue");
        assert!(matches!(
            outcome,
            DispatchOutcome::Queued {
                flush_due: None,
                ..
            }
        ));
    }
    relay.tick(50);
    assert!(relay.registry.endpoint_mut().take_outbound().is_empty());

    relay.registry.endpoint_mut().complete_load(VENDOR);
    relay.tick(60);

    let outbound = relay.registry.endpoint_mut().take_outbound();
    assert_eq!(outbound.len(), 1);
    let payloads: Vec<String> = batch_payloads(&outbound[0].1)
        .into_iter()
        .map(|(_, m)| m)
        .collect();
    assert_eq!(payloads, vec!["m1", "m2", "m3"]);
    assert_eq!(relay.registry.queued_messages(), 0);

    relay.tick(1_000);
    assert!(relay.registry.endpoint_mut().take_outbound().is_empty());
    assert_eq!(relay.stats.flushed_batches, 1);
    assert_eq!(relay.stats.flushed_messages, 3);
}

#[test]
fn post_readiness_hits_coalesce_into_throttled_batches() {
    let mut relay = relay();
    let a = relay.register_sender();
    let b = relay.register_sender();
    let options = TransportOptions::channel(VENDOR);
    relay.begin_channel(&a, &options, None).expect("acquire a");
    relay.begin_channel(&b, &options, None).expect("acquire b");
    relay.registry.endpoint_mut().complete_load(VENDOR);
    relay.tick(0);

    relay.send_request(&a, "a1", &options).expect("queue");
    relay.tick(30);
    relay.send_request(&b, "b1", &options).expect("queue");
    relay.tick(99);
    assert!(relay.registry.endpoint_mut().take_outbound().is_empty());

    assert_eq!(relay.tick(100).flushed_messages, 2);
    let outbound = relay.registry.endpoint_mut().take_outbound();
    assert_eq!(outbound.len(), 1);
    assert_eq!(
        batch_payloads(&outbound[0].1),
        vec![(a.clone(), "a1".to_string()), (b, "b1".to_string())]
    );

    relay.tick(150);
    relay.send_request(&a, "a2", &options).expect("queue");
    assert_eq!(relay.next_wakeup(), Some(250));
}

#[test]
fn channel_survives_until_last_release() {
    let mut relay = relay();
    let a = relay.register_sender();
    let b = relay.register_sender();
    let options = TransportOptions::channel(VENDOR);
    let dest = DestinationKey::new(VENDOR);
    relay.begin_channel(&a, &options, None).expect("acquire a");
    relay.begin_channel(&b, &options, None).expect("acquire b");

    assert_eq!(
        relay.done_using_channel(&a, &dest).expect("first release"),
        ReleaseOutcome::Decremented { refcount: 1 }
    );
    assert!(relay.registry.contains(&dest));
    assert!(relay.registry.endpoint().destroyed().is_empty());

    assert!(matches!(
        relay.done_using_channel(&b, &dest).expect("second release"),
        ReleaseOutcome::Destroyed { .. }
    ));
    assert!(!relay.registry.contains(&dest));
    assert_eq!(relay.registry.endpoint().destroyed(), &[dest]);
}

#[test]
fn last_release_discards_unsent_hits_and_cancels_flush() {
    let mut relay = relay();
    let sender = relay.register_sender();
    let options = TransportOptions::channel(VENDOR);
    let dest = DestinationKey::new(VENDOR);
    relay.begin_channel(&sender, &options, None).expect("acquire");
    relay.registry.endpoint_mut().complete_load(VENDOR);
    relay.tick(0);
    relay.send_request(&sender, "late", &options).expect("queue");

    let outcome = relay.done_using_channel(&sender, &dest).expect("release");
    assert_eq!(
        outcome,
        ReleaseOutcome::Destroyed {
            discarded_messages: 1,
            cancelled_flush: true
        }
    );
    relay.tick(500);
    assert!(relay.registry.endpoint_mut().take_outbound().is_empty());
    assert_eq!(relay.stats.discarded_messages, 1);
    assert_eq!(relay.next_wakeup(), None);
}

#[test]
fn extra_data_sent_while_loading_arrives_once_after_ready() {
    let mut relay = relay();
    let sender = relay.register_sender();
    let options = TransportOptions {
        extra_data: Some("creative=42".to_string()),
        ..TransportOptions::channel(VENDOR)
    };
    relay.begin_channel(&sender, &options, None).expect("acquire");

    for step in (10..=100).step_by(10) {
        relay.tick(step);
    }
    assert!(relay.registry.endpoint_mut().take_outbound().is_empty());

    relay.registry.endpoint_mut().complete_load(VENDOR);
    relay.tick(105);
    for step in (110..=300).step_by(10) {
        relay.tick(step);
    }

    let outbound = relay.registry.endpoint_mut().take_outbound();
    assert_eq!(outbound.len(), 1);
    match decode_envelope(&outbound[0].1).expect("decodes") {
        Envelope::ExtraData {
            sender_id, data, ..
        } => {
            assert_eq!(sender_id, sender);
            assert_eq!(data, "creative=42");
        }
        other => panic!("expected extra data, got {}", other.message_type()),
    }
}

#[test]
fn reacquiring_after_teardown_starts_a_fresh_channel() {
    let mut relay = relay();
    let sender = relay.register_sender();
    let options = TransportOptions::channel(VENDOR);
    let dest = DestinationKey::new(VENDOR);

    relay.begin_channel(&sender, &options, None).expect("acquire");
    let old = relay
        .registry
        .channel(&dest)
        .map(|c| c.sentinel().clone())
        .expect("live");
    relay.done_using_channel(&sender, &dest).expect("release");
    relay.registry.endpoint_mut().complete_load(VENDOR);
    relay.tick(1);

    let outcome = relay.begin_channel(&sender, &options, None).expect("again");
    assert!(outcome.created);
    assert_eq!(outcome.state, ChannelState::Creating);
    let fresh = relay
        .registry
        .channel(&dest)
        .map(|c| c.sentinel().clone())
        .expect("live");
    assert_ne!(old, fresh);
    assert_eq!(relay.registry.endpoint().load_count(&dest), 2);

    // A duplicate completion of the first load must not ready the new channel.
    relay.registry.endpoint_mut().complete_load_of(VENDOR, old);
    let report = relay.tick(2);
    assert!(report.became_ready.is_empty());
    assert_eq!(relay.stats.stale_loads_ignored, 1);
    assert_eq!(
        relay.registry.channel(&dest).map(|c| c.state()),
        Some(ChannelState::Creating)
    );
}
