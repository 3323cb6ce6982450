use std::path::PathBuf;

use hitrelay_core::RelayError;
use hitrelay_transport_http::HttpTransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("scenario parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
    #[error("transport error: {0}")]
    Transport(#[from] HttpTransportError),
}
