use hitrelay_core::{IdAllocator, RelayError, SequenceEntropy, TransportOptions};
use hitrelay_node::config::RelayConfig;
use hitrelay_node::dispatcher::{DispatchOutcome, Strategy};
use hitrelay_node::service::HitRelay;
use hitrelay_transport::endpoint::InMemoryEndpoint;
use hitrelay_transport::ping::InMemoryPingHost;
use hitrelay_transport::primitives::{InMemoryPrimitives, SentHit};
use hitrelay_transport::LoadOutcome;

type Relay = HitRelay<InMemoryPrimitives, InMemoryEndpoint, InMemoryPingHost>;

const HIT: &str = "https://collect.example/p?ev=view";

fn relay_with(primitives: InMemoryPrimitives) -> Relay {
    HitRelay::new(
        primitives,
        InMemoryEndpoint::default(),
        InMemoryPingHost::default(),
        RelayConfig::default(),
        IdAllocator::new(SequenceEntropy::default()),
    )
}

fn opts(beacon: bool, xhr_post: bool, image: bool) -> TransportOptions {
    TransportOptions {
        beacon,
        xhr_post,
        image,
        ..TransportOptions::default()
    }
}

#[test]
fn missing_beacon_api_falls_back_to_credentialed_post() {
    let mut prims = InMemoryPrimitives::default();
    prims.set_beacon_supported(false);
    let mut relay = relay_with(prims);
    let sender = relay.register_sender();

    let outcome = relay
        .send_request(&sender, HIT, &opts(true, true, false))
        .expect("dispatch");
    assert_eq!(outcome, DispatchOutcome::Sent(Strategy::CredentialedPost));
    assert_eq!(
        relay.primitives.sent(),
        &[SentHit::CredentialedPost(HIT.to_string())]
    );
}

#[test]
fn no_requested_strategy_sends_nothing() {
    let mut relay = relay_with(InMemoryPrimitives::default());
    let sender = relay.register_sender();

    let outcome = relay
        .send_request(&sender, HIT, &TransportOptions::default())
        .expect("exhaustion returns normally");
    assert_eq!(outcome, DispatchOutcome::Exhausted);
    assert!(relay.primitives.sent().is_empty());
    assert!(relay.registry.is_empty());
    assert_eq!(relay.stats.exhausted_requests, 1);
}

#[test]
fn priority_holds_across_capability_matrix() {
    let cases = [
        (true, true, true, Some(Strategy::Beacon)),
        (false, true, true, Some(Strategy::CredentialedPost)),
        (false, false, true, Some(Strategy::Pixel)),
        (false, false, false, None),
    ];
    for (beacon_ok, post_ok, request_image, expected) in cases {
        let mut prims = InMemoryPrimitives::default();
        prims.set_beacon_supported(beacon_ok);
        prims.set_post_supported(post_ok);
        let mut relay = relay_with(prims);
        let sender = relay.register_sender();

        let outcome = relay
            .send_request(&sender, HIT, &opts(true, true, request_image))
            .expect("dispatch");
        assert_eq!(outcome.strategy(), expected, "beacon={beacon_ok} post={post_ok}");
        assert!(relay.primitives.sent().len() <= 1);
    }
}

#[test]
fn pixel_outcome_is_only_logged() {
    let mut prims = InMemoryPrimitives::pixel_only();
    prims.set_pixel_outcome(LoadOutcome::Failed);
    let mut relay = relay_with(prims);
    let sender = relay.register_sender();

    let outcome = relay
        .send_request(&sender, HIT, &opts(false, false, true))
        .expect("dispatch");
    assert_eq!(outcome, DispatchOutcome::Sent(Strategy::Pixel));
    assert_eq!(relay.tick(1).completions, 1);
    assert_eq!(relay.stats.delivery_failures, 1);
    assert_eq!(relay.primitives.sent().len(), 1);
}

#[test]
fn channel_request_without_begin_channel_is_rejected() {
    let mut relay = relay_with(InMemoryPrimitives::default());
    let sender = relay.register_sender();
    let options = TransportOptions {
        image: true,
        ..TransportOptions::channel("https://vendor/unacquired")
    };

    let err = relay
        .send_request(&sender, HIT, &options)
        .expect_err("precondition violation");
    assert!(matches!(err, RelayError::UnknownDestination(_)));
    assert!(relay.primitives.sent().is_empty());
}

#[test]
fn pings_bypass_the_strategy_chain() {
    let mut relay = relay_with(InMemoryPrimitives::default());
    let first = relay.send_ping("https://ping.example/a").expect("open");
    let second = relay.send_ping("https://ping.example/a").expect("open");
    assert_ne!(first, second);
    assert!(relay.primitives.sent().is_empty());

    relay.ping_host.settle(first, LoadOutcome::Loaded);
    relay.tick(10);
    assert_eq!(relay.tick(5_009).pings_removed, 0);
    assert_eq!(relay.tick(5_010).pings_removed, 1);
    assert_eq!(relay.ping_host.open_frames().len(), 1);
    assert_eq!(relay.stats.pings_opened, 2);
}
