//! Topic resolution

use fanout_core::{MatchPolicy, Result};
use tracing::{debug, info};

use crate::SharedBroker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    pub arn: String,
}

/// Resolves topic names to broker ARNs, creating topics on first use
#[derive(Clone)]
pub struct TopicRegistry {
    broker: SharedBroker,
    matching: MatchPolicy,
}

impl TopicRegistry {
    pub fn new(broker: SharedBroker, matching: MatchPolicy) -> Self {
        Self { broker, matching }
    }

    /// Return the ARN of the first listed topic matching `name`, or create
    /// the topic. Concurrent first calls for one name are not serialized.
    pub async fn resolve_or_create(&self, name: &str) -> Result<String> {
        let existing = self.broker.list_topics().await?;
        if let Some(arn) = existing
            .into_iter()
            .find(|arn| self.matching.matches(arn, name))
        {
            debug!(topic = %name, arn = %arn, "Resolved existing topic");
            return Ok(arn);
        }

        let arn = self.broker.create_topic(name).await?;
        info!(topic = %name, arn = %arn, "Created topic");
        Ok(arn)
    }

    pub async fn resolve(&self, name: &str) -> Result<Topic> {
        let arn = self.resolve_or_create(name).await?;
        Ok(Topic {
            name: name.to_string(),
            arn,
        })
    }
}
