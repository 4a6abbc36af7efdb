//! Hub and subscription configuration

use crate::channel::OverflowPolicy;
use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hub-wide defaults
///
/// Every field has a default, so an empty TOML document is a valid config.
///
/// ```toml
/// channel_capacity = 4096
/// overflow_policy = "drop_newest"
/// idle_park_us = 500
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Slots per subscriber channel
    pub channel_capacity: usize,

    /// What a full channel does with the next event
    pub overflow_policy: OverflowPolicy,

    /// Upper bound on how long an idle worker parks before re-checking its channel
    pub idle_park_us: u64,

    /// Slots in the out-of-band callback failure queue
    pub failure_report_capacity: usize,

    /// Delivery threads are named `{prefix}-sub-{id}`
    pub thread_name_prefix: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 512,
            overflow_policy: OverflowPolicy::default(),
            idle_park_us: 1_000,
            failure_report_capacity: 1_024,
            thread_name_prefix: "mdhub".to_string(),
        }
    }
}

impl HubConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: HubConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(HubError::InvalidConfig("channel_capacity must be > 0".into()));
        }
        if self.idle_park_us == 0 {
            return Err(HubError::InvalidConfig("idle_park_us must be > 0".into()));
        }
        Ok(())
    }

    #[inline]
    pub fn idle_park(&self) -> Duration {
        Duration::from_micros(self.idle_park_us)
    }
}

/// Per-subscription overrides of [`HubConfig`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    pub capacity: Option<usize>,
    pub overflow_policy: Option<OverflowPolicy>,
}

impl SubscriptionOptions {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = Some(policy);
        self
    }

    /// Resolve against hub defaults
    pub(crate) fn resolve(&self, config: &HubConfig) -> Result<(usize, OverflowPolicy)> {
        let capacity = self.capacity.unwrap_or(config.channel_capacity);
        if capacity == 0 {
            return Err(HubError::InvalidConfig("subscription capacity must be > 0".into()));
        }
        Ok((capacity, self.overflow_policy.unwrap_or(config.overflow_policy)))
    }
}
