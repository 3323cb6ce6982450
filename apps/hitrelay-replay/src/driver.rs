use hitrelay_core::{SenderId, Step};
use hitrelay_node::channel::ResponseHandler;
use hitrelay_node::dispatcher::DispatchOutcome;
use hitrelay_node::service::HitRelay;
use hitrelay_node::stats::RelayStats;
use hitrelay_transport::endpoint::ChannelEndpoint;
use hitrelay_transport::ping::PingFrameHost;
use hitrelay_transport::primitives::HitPrimitives;
use serde_json::Value;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::scenario::{Scenario, ScheduledEvent, SenderPlan};

/// Outcome of one replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub hits_sent: usize,
    pub hits_exhausted: usize,
    pub pings_sent: usize,
    /// Whether the relay went idle before the drain timeout.
    pub drained: bool,
    pub final_step: Step,
    pub stats: RelayStats,
}

struct ActiveSender<'a> {
    id: SenderId,
    plan: &'a SenderPlan,
    holds_channel: bool,
}

/// Plays `scenario` against `relay` in real time.
///
/// Steps advance with wall-clock time at `step_duration`; the relay is ticked
/// every `tick_interval`. Once every scheduled event has fired the run waits
/// for the relay to go idle, up to `drain_timeout`, then releases every
/// channel still held.
pub async fn replay<P, E, H>(
    relay: &mut HitRelay<P, E, H>,
    scenario: &Scenario,
    config: &ReplayConfig,
) -> Result<ReplayReport, ReplayError>
where
    P: HitPrimitives,
    E: ChannelEndpoint,
    H: PingFrameHost,
{
    let mut report = ReplayReport::default();
    let mut senders = start_senders(relay, scenario)?;
    let timeline = scenario.timeline();
    let mut next_event = 0;
    let mut drain_deadline: Option<Instant> = None;

    let start = Instant::now();
    let mut ticker = interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let now_step = config.steps_for(start.elapsed());
        let tick = relay.tick(now_step);
        if !tick.became_ready.is_empty() {
            debug!(now_step, ready = ?tick.became_ready, "channels ready");
        }

        while let Some((at, event)) = timeline.get(next_event) {
            if *at > now_step {
                break;
            }
            fire(relay, &mut senders, event, &mut report)?;
            next_event += 1;
        }

        if next_event < timeline.len() {
            continue;
        }
        if relay.is_idle() {
            report.drained = true;
            break;
        }
        let deadline = *drain_deadline.get_or_insert_with(|| Instant::now() + config.drain_timeout);
        if Instant::now() >= deadline {
            warn!(
                queued = relay.registry.queued_messages(),
                pending_extra_data = relay.extra_data().pending().len(),
                "drain timeout reached; abandoning pending work"
            );
            break;
        }
    }

    for sender in senders.iter_mut().filter(|s| s.holds_channel) {
        release(relay, sender)?;
    }
    report.final_step = config.steps_for(start.elapsed());
    relay.tick(report.final_step);
    report.stats = relay.stats;
    Ok(report)
}

fn start_senders<'a, P, E, H>(
    relay: &mut HitRelay<P, E, H>,
    scenario: &'a Scenario,
) -> Result<Vec<ActiveSender<'a>>, ReplayError>
where
    P: HitPrimitives,
    E: ChannelEndpoint,
    H: PingFrameHost,
{
    let mut senders = Vec::with_capacity(scenario.senders.len());
    for plan in &scenario.senders {
        let id = relay.register_sender();
        let holds_channel = plan.options.channel.is_some();
        if holds_channel {
            let name = plan.name.clone();
            let handler: ResponseHandler = Box::new(move |response: &Value| {
                info!(sender = %name, %response, "channel response");
            });
            let outcome = relay.begin_channel(&id, &plan.options, Some(handler))?;
            debug!(sender = %plan.name, created = outcome.created, refcount = outcome.refcount, "channel acquired");
        } else if plan.options.requests_nothing() {
            warn!(sender = %plan.name, "sender requests no delivery strategy");
        }
        info!(sender = %plan.name, id = %id, hits = plan.hits.len(), "sender registered");
        senders.push(ActiveSender {
            id,
            plan,
            holds_channel,
        });
    }
    Ok(senders)
}

fn fire<P, E, H>(
    relay: &mut HitRelay<P, E, H>,
    senders: &mut [ActiveSender<'_>],
    event: &ScheduledEvent,
    report: &mut ReplayReport,
) -> Result<(), ReplayError>
where
    P: HitPrimitives,
    E: ChannelEndpoint,
    H: PingFrameHost,
{
    match event {
        ScheduledEvent::Hit { sender, url } => {
            let sender = &senders[*sender];
            match relay.send_request(&sender.id, url, &sender.plan.options)? {
                DispatchOutcome::Exhausted => report.hits_exhausted += 1,
                outcome => {
                    report.hits_sent += 1;
                    debug!(sender = %sender.plan.name, url, strategy = ?outcome.strategy(), "hit dispatched");
                }
            }
        }
        ScheduledEvent::Ping { url } => {
            if relay.send_ping(url).is_some() {
                report.pings_sent += 1;
            }
        }
        ScheduledEvent::Release { sender } => release(relay, &mut senders[*sender])?,
    }
    Ok(())
}

fn release<P, E, H>(
    relay: &mut HitRelay<P, E, H>,
    sender: &mut ActiveSender<'_>,
) -> Result<(), ReplayError>
where
    P: HitPrimitives,
    E: ChannelEndpoint,
    H: PingFrameHost,
{
    let Some(destination) = &sender.plan.options.channel else {
        return Ok(());
    };
    if !sender.holds_channel {
        return Ok(());
    }
    let outcome = relay.done_using_channel(&sender.id, destination)?;
    sender.holds_channel = false;
    debug!(sender = %sender.plan.name, %destination, ?outcome, "channel released");
    Ok(())
}
