//! Queue resolution

use fanout_core::{FanoutError, MatchPolicy, QueueAttribute, Result};
use tracing::{debug, info};

use crate::SharedBroker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queue {
    pub name: String,
    pub url: String,
    pub arn: String,
}

/// Resolves queue names to broker URLs and ARNs, creating queues on first use
#[derive(Clone)]
pub struct QueueRegistry {
    broker: SharedBroker,
    matching: MatchPolicy,
}

impl QueueRegistry {
    pub fn new(broker: SharedBroker, matching: MatchPolicy) -> Self {
        Self { broker, matching }
    }

    pub(crate) fn broker(&self) -> &SharedBroker {
        &self.broker
    }

    /// Return the URL of the first listed queue matching `name`, or create
    /// the queue. Concurrent first calls for one name are not serialized.
    pub async fn resolve_or_create(&self, name: &str) -> Result<String> {
        let existing = self.broker.list_queues().await?;
        if let Some(url) = existing
            .into_iter()
            .find(|url| self.matching.matches(url, name))
        {
            debug!(queue = %name, url = %url, "Resolved existing queue");
            return Ok(url);
        }

        let url = self.broker.create_queue(name).await?;
        info!(queue = %name, url = %url, "Created queue");
        Ok(url)
    }

    pub async fn get_arn(&self, name: &str) -> Result<String> {
        let url = self.resolve_or_create(name).await?;
        self.arn_for_url(name, &url).await
    }

    pub async fn resolve(&self, name: &str) -> Result<Queue> {
        let url = self.resolve_or_create(name).await?;
        let arn = self.arn_for_url(name, &url).await?;
        Ok(Queue {
            name: name.to_string(),
            url,
            arn,
        })
    }

    async fn arn_for_url(&self, name: &str, url: &str) -> Result<String> {
        let mut attributes = self
            .broker
            .get_queue_attributes(url, &[QueueAttribute::QueueArn])
            .await?;

        attributes
            .remove(&QueueAttribute::QueueArn)
            .ok_or_else(|| FanoutError::AttributeMissing {
                queue: name.to_string(),
                attribute: QueueAttribute::QueueArn,
            })
    }
}
