//! Error types for the market data hub

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Debug, Error)]
pub enum HubError {
    /// `subscribe` or a publish call arrived after `stop_all`
    #[error("hub is stopped")]
    HubStopped,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The OS refused to start a delivery thread
    #[error("failed to spawn delivery worker: {0}")]
    Spawn(#[from] std::io::Error),
}
