use hitrelay_core::Step;

use crate::extra_data::ExtraDataRetryPolicy;

/// Steps between scheduling a flush and running it.
pub const DEFAULT_THROTTLE_STEPS: Step = 100;
/// Steps between extra-data delivery attempts while a channel is loading.
pub const DEFAULT_EXTRA_DATA_RETRY_STEPS: Step = 10;
/// Steps a settled ping frame stays attached before removal.
pub const DEFAULT_PING_TEARDOWN_STEPS: Step = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Throttle interval coalescing post-readiness hits into one batch.
    pub throttle_steps: Step,
    /// Delay between extra-data attempts while the channel is not ready.
    pub extra_data_retry_steps: Step,
    /// Upper bound on extra-data attempts. `None` retries until the channel
    /// is ready or released.
    pub extra_data_max_attempts: Option<u32>,
    /// Delay before a settled one-shot ping frame is removed.
    pub ping_teardown_steps: Step,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            throttle_steps: DEFAULT_THROTTLE_STEPS,
            extra_data_retry_steps: DEFAULT_EXTRA_DATA_RETRY_STEPS,
            extra_data_max_attempts: None,
            ping_teardown_steps: DEFAULT_PING_TEARDOWN_STEPS,
        }
    }
}

impl RelayConfig {
    /// Returns the extra-data retry policy derived from this config.
    pub fn extra_data_retry_policy(&self) -> ExtraDataRetryPolicy {
        ExtraDataRetryPolicy {
            retry_steps: self.extra_data_retry_steps,
            max_attempts: self.extra_data_max_attempts,
        }
    }
}
