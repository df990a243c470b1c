//! Configuration management

use serde::Deserialize;
use std::time::Duration;

use crate::matching::MatchPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct FanoutConfig {
    #[serde(default)]
    pub matching: MatchPolicy,

    #[serde(default)]
    pub policy_mode: PolicyMode,

    #[serde(default = "default_receive_wait_seconds")]
    pub receive_wait_seconds: u64,

    #[serde(default)]
    pub broker: BrokerConfig,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            matching: MatchPolicy::default(),
            policy_mode: PolicyMode::default(),
            receive_wait_seconds: default_receive_wait_seconds(),
            broker: BrokerConfig::default(),
        }
    }
}

/// How binding a topic treats a policy already installed on the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Overwrite the policy; earlier topics lose their authorization
    #[default]
    Replace,
    /// Add a statement for the topic to the existing policy
    Merge,
}

/// Where the broker client connects. Credentials come from the client's own
/// provider chain.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub endpoint_url: Option<String>,

    #[serde(default)]
    pub region: Option<String>,
}

fn default_receive_wait_seconds() -> u64 {
    1
}

impl FanoutConfig {
    /// Load configuration from an optional `fanout` file and `FANOUT_*`
    /// environment variables (`FANOUT_BROKER__ENDPOINT_URL` for nested keys)
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("fanout").required(false))
            .add_source(
                config::Environment::with_prefix("FANOUT")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize::<FanoutConfig>()
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_secs(self.receive_wait_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FanoutConfig::default();
        assert_eq!(config.matching, MatchPolicy::Exact);
        assert_eq!(config.policy_mode, PolicyMode::Replace);
        assert_eq!(config.receive_wait(), Duration::from_secs(1));
        assert!(config.broker.endpoint_url.is_none());
    }

    #[test]
    fn test_deserialize_from_source() {
        let config = config::Config::builder()
            .set_override("matching", "contains")
            .unwrap()
            .set_override("policy_mode", "merge")
            .unwrap()
            .set_override("receive_wait_seconds", 5)
            .unwrap()
            .set_override("broker.endpoint_url", "http://localhost:4566")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize::<FanoutConfig>()
            .unwrap();

        assert_eq!(config.matching, MatchPolicy::Contains);
        assert_eq!(config.policy_mode, PolicyMode::Merge);
        assert_eq!(config.receive_wait_seconds, 5);
        assert_eq!(
            config.broker.endpoint_url.as_deref(),
            Some("http://localhost:4566")
        );
        assert!(config.broker.region.is_none());
    }
}
