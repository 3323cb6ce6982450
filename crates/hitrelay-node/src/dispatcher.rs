use hitrelay_core::{DestinationKey, Message, RelayError, SenderId, Step, TransportOptions};
use hitrelay_transport::endpoint::ChannelEndpoint;
use hitrelay_transport::primitives::HitPrimitives;
use hitrelay_transport::LoadOutcome;
use tracing::{debug, warn};

use crate::registry::ChannelRegistry;
use crate::stats::RelayStats;

/// Delivery strategies in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Channel,
    Beacon,
    CredentialedPost,
    Pixel,
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Queued on a shared channel; delivery is deferred to its flush.
    Queued {
        destination: DestinationKey,
        flush_due: Option<Step>,
    },
    /// Handed to a direct primitive.
    Sent(Strategy),
    /// No requested strategy applied. Nothing was sent.
    Exhausted,
}

impl DispatchOutcome {
    /// Strategy that carried the hit, if any did.
    pub fn strategy(&self) -> Option<Strategy> {
        match self {
            DispatchOutcome::Queued { .. } => Some(Strategy::Channel),
            DispatchOutcome::Sent(strategy) => Some(*strategy),
            DispatchOutcome::Exhausted => None,
        }
    }
}

/// Inputs of one [`dispatch`] call.
pub struct DispatchParams<'a> {
    pub sender: &'a SenderId,
    pub request: &'a str,
    pub options: &'a TransportOptions,
    pub now_step: Step,
    pub stats: &'a mut RelayStats,
}

/// Sends one hit with the first applicable strategy.
///
/// Order is channel, beacon, credentialed POST, pixel. A strategy the options
/// do not request, or the runtime does not support, does not apply and the
/// chain moves on; nothing is ever retried. A channel route fails only when
/// no channel was acquired for its destination.
pub fn dispatch<P, E>(
    primitives: &mut P,
    registry: &mut ChannelRegistry<E>,
    params: DispatchParams<'_>,
) -> Result<DispatchOutcome, RelayError>
where
    P: HitPrimitives,
    E: ChannelEndpoint,
{
    let DispatchParams {
        sender,
        request,
        options,
        now_step,
        stats,
    } = params;

    if let Some(destination) = &options.channel {
        let message = Message::new(sender.clone(), request);
        let flush_due = registry.enqueue(destination, message, now_step, stats)?;
        return Ok(DispatchOutcome::Queued {
            destination: destination.clone(),
            flush_due,
        });
    }

    if options.beacon && primitives.supports_beacon() && primitives.send_beacon(request) {
        stats.beacon_sends += 1;
        debug!(request, "sent beacon request");
        return Ok(DispatchOutcome::Sent(Strategy::Beacon));
    }

    if options.xhr_post && primitives.supports_credentialed_post() {
        match primitives.send_credentialed_post(request) {
            Ok(()) => {
                stats.post_sends += 1;
                return Ok(DispatchOutcome::Sent(Strategy::CredentialedPost));
            }
            Err(err) => {
                stats.delivery_failures += 1;
                warn!(request, "failed to dispatch credentialed post: {err}");
            }
        }
    }

    if options.image {
        stats.pixel_sends += 1;
        if let Err(err) = primitives.send_pixel(request) {
            stats.delivery_failures += 1;
            warn!(request, "failed to start image request: {err}");
        }
        return Ok(DispatchOutcome::Sent(Strategy::Pixel));
    }

    stats.exhausted_requests += 1;
    warn!(request, ?options, "failed to send request");
    Ok(DispatchOutcome::Exhausted)
}

/// Drains and logs completions of fire-and-forget primitives.
///
/// Outcomes never feed back into control flow. Returns how many were seen.
pub fn drain_primitive_completions<P: HitPrimitives>(
    primitives: &mut P,
    stats: &mut RelayStats,
) -> usize {
    let mut seen = 0;
    while let Some((url, outcome)) = primitives.poll_pixel_outcome() {
        seen += 1;
        match outcome {
            LoadOutcome::Loaded => debug!(url, "sent image request"),
            LoadOutcome::Failed => {
                stats.delivery_failures += 1;
                warn!(url, "response unparseable or failed to send image request");
            }
        }
    }
    while let Some(url) = primitives.poll_post_completion() {
        seen += 1;
        debug!(url, "sent credentialed post request");
    }
    seen
}
