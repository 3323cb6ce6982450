use std::collections::BTreeMap;

use hitrelay_core::Step;
use hitrelay_transport::ping::{PingFrameHost, PingId};
use hitrelay_transport::LoadOutcome;
use tracing::{debug, warn};

use crate::stats::RelayStats;

/// Tracks standalone ping frames from open to removal.
///
/// A frame is never reused. Once it settles it stays attached for the
/// teardown delay, then it is removed.
#[derive(Debug, Default)]
pub struct OneShotPings {
    open: BTreeMap<PingId, Option<Step>>,
}

impl OneShotPings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens one frame requesting `url`. Nothing is queued or batched.
    pub fn send<H: PingFrameHost>(
        &mut self,
        host: &mut H,
        url: &str,
        stats: &mut RelayStats,
    ) -> Option<PingId> {
        match host.open(url) {
            Ok(id) => {
                self.open.insert(id, None);
                stats.pings_opened += 1;
                debug!(url, id, "ping frame opened");
                Some(id)
            }
            Err(err) => {
                stats.delivery_failures += 1;
                warn!(url, "failed to open ping frame: {err}");
                None
            }
        }
    }

    /// Records settled frames and removes the ones whose teardown is due.
    ///
    /// Returns the number of frames removed.
    pub fn tick<H: PingFrameHost>(
        &mut self,
        host: &mut H,
        now_step: Step,
        teardown_steps: Step,
        stats: &mut RelayStats,
    ) -> usize {
        while let Some((id, outcome)) = host.poll_settled() {
            let Some(removal) = self.open.get_mut(&id) else {
                continue;
            };
            if removal.is_none() {
                *removal = Some(now_step.saturating_add(teardown_steps));
            }
            if outcome == LoadOutcome::Failed {
                debug!(id, "ping frame failed to load");
            }
        }

        let due: Vec<PingId> = self
            .open
            .iter()
            .filter(|(_, removal)| removal.is_some_and(|at| at <= now_step))
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            self.open.remove(id);
            host.remove(*id);
            stats.pings_removed += 1;
        }
        due.len()
    }

    /// Frames still attached.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Earliest scheduled removal.
    pub fn next_removal(&self) -> Option<Step> {
        self.open.values().filter_map(|removal| *removal).min()
    }

    /// Removes every frame immediately.
    pub fn clear<H: PingFrameHost>(&mut self, host: &mut H) {
        for id in std::mem::take(&mut self.open).into_keys() {
            host.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use hitrelay_transport::ping::InMemoryPingHost;
    use hitrelay_transport::LoadOutcome;

    use super::OneShotPings;
    use crate::stats::RelayStats;

    #[test]
    fn settled_frame_is_removed_after_teardown_delay() {
        let mut host = InMemoryPingHost::default();
        let mut pings = OneShotPings::new();
        let mut stats = RelayStats::default();

        let id = pings
            .send(&mut host, "https://ping.example/p", &mut stats)
            .expect("open");
        assert_eq!(stats.pings_opened, 1);
        assert_eq!(pings.tick(&mut host, 10, 5_000, &mut stats), 0);
        assert_eq!(pings.next_removal(), None);

        host.settle(id, LoadOutcome::Loaded);
        assert_eq!(pings.tick(&mut host, 20, 5_000, &mut stats), 0);
        assert_eq!(pings.next_removal(), Some(5_020));
        assert_eq!(pings.tick(&mut host, 5_019, 5_000, &mut stats), 0);
        assert_eq!(host.open_frames().len(), 1);

        assert_eq!(pings.tick(&mut host, 5_020, 5_000, &mut stats), 1);
        assert_eq!(host.removed(), &[id]);
        assert_eq!(pings.open_count(), 0);
        assert_eq!(stats.pings_removed, 1);
    }

    #[test]
    fn failed_frame_follows_the_same_teardown() {
        let mut host = InMemoryPingHost::default();
        let mut pings = OneShotPings::new();
        let mut stats = RelayStats::default();

        let id = pings
            .send(&mut host, "https://ping.example/p", &mut stats)
            .expect("open");
        host.settle(id, LoadOutcome::Failed);
        pings.tick(&mut host, 0, 5, &mut stats);
        assert_eq!(pings.tick(&mut host, 5, 5, &mut stats), 1);
        assert_eq!(host.removed(), &[id]);
    }

    #[test]
    fn each_send_opens_a_fresh_frame() {
        let mut host = InMemoryPingHost::default();
        let mut pings = OneShotPings::new();
        let mut stats = RelayStats::default();

        let a = pings.send(&mut host, "https://ping.example/p", &mut stats);
        let b = pings.send(&mut host, "https://ping.example/p", &mut stats);
        assert_ne!(a, b);
        assert_eq!(host.open_frames().len(), 2);

        pings.clear(&mut host);
        assert!(host.open_frames().is_empty());
    }
}
