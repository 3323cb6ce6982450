use config::{Config, ConfigError, Environment, File};
use hitrelay_core::Step;
use hitrelay_node::config::RelayConfig;
use hitrelay_transport_http::HttpTransportConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ReplayConfig {
    /// Wall-clock length of one relay step.
    #[serde(with = "humantime_serde")]
    pub step_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// How long to keep ticking after the last scheduled event.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
    pub throttle_steps: Step,
    pub extra_data_retry_steps: Step,
    pub extra_data_max_attempts: Option<u32>,
    pub ping_teardown_steps: Step,
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    pub http_beacon: bool,
    pub http_credentialed_post: bool,
    /// `Cookie` header sent with credentialed POSTs.
    pub http_cookie: Option<String>,
    /// Seed for id generation. Unset draws from OS entropy.
    pub seed: Option<u64>,
    /// Use in-memory transports that complete instantly.
    pub dry_run: bool,
}

impl ReplayConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("step_duration", "1ms")?
            .set_default("tick_interval", "10ms")?
            .set_default("drain_timeout", "10s")?
            .set_default("throttle_steps", 100)?
            .set_default("extra_data_retry_steps", 10)?
            .set_default("ping_teardown_steps", 5_000)?
            .set_default("http_timeout", "10s")?
            .set_default("http_beacon", true)?
            .set_default("http_credentialed_post", true)?
            .set_default("dry_run", false)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix("HITRELAY").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            throttle_steps: self.throttle_steps,
            extra_data_retry_steps: self.extra_data_retry_steps,
            extra_data_max_attempts: self.extra_data_max_attempts,
            ping_teardown_steps: self.ping_teardown_steps,
        }
    }

    pub fn http_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            timeout: self.http_timeout,
            beacon: self.http_beacon,
            credentialed_post: self.http_credentialed_post,
            cookie: self.http_cookie.clone(),
            ..HttpTransportConfig::default()
        }
    }

    /// Converts elapsed wall-clock time into relay steps.
    pub fn steps_for(&self, elapsed: Duration) -> Step {
        let step = self.step_duration.as_nanos().max(1);
        (elapsed.as_nanos() / step).min(u128::from(Step::MAX)) as Step
    }
}
