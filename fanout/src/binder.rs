//! Wiring queues to topics

use fanout_core::{
    FanoutError, PolicyDocument, PolicyMode, QueueAttribute, Result, QUEUE_PROTOCOL,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::queue::{Queue, QueueRegistry};
use crate::topic::{Topic, TopicRegistry};

/// A queue subscribed to a topic with a policy authorizing delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub queue: Queue,
    pub topic: Topic,
    pub subscription_arn: Option<String>,
}

/// Subscribes queues to topics and authorizes the topics on the queues
#[derive(Clone)]
pub struct SubscriptionBinder {
    topics: TopicRegistry,
    queues: QueueRegistry,
    policy_mode: PolicyMode,
}

impl SubscriptionBinder {
    pub fn new(topics: TopicRegistry, queues: QueueRegistry, policy_mode: PolicyMode) -> Self {
        Self {
            topics,
            queues,
            policy_mode,
        }
    }

    /// Subscribe `queue_name` to `topic_name`, creating either if needed,
    /// then install the queue policy.
    ///
    /// The two steps are not atomic. If the policy install fails the
    /// subscription stays in place without authorization; calling `bind`
    /// again repairs it.
    ///
    /// With [`PolicyMode::Replace`] the new policy overwrites whatever the
    /// queue had, so a queue bound to a second topic stops accepting
    /// deliveries from the first.
    pub async fn bind(&self, queue_name: &str, topic_name: &str) -> Result<Binding> {
        let queue = self.queues.resolve(queue_name).await?;
        let topic = self.topics.resolve(topic_name).await?;

        let subscription_arn = self
            .queues
            .broker()
            .subscribe(&topic.arn, QUEUE_PROTOCOL, &queue.arn)
            .await?;
        info!(queue = %queue.name, topic = %topic.name,
            subscription = ?subscription_arn, "Subscribed queue to topic");

        if let Err(e) = self.install_policy(&queue, &topic).await {
            warn!(queue = %queue.name, topic = %topic.name, error = %e,
                "Policy install failed, subscription left without authorization");
            return Err(e);
        }

        Ok(Binding {
            queue,
            topic,
            subscription_arn,
        })
    }

    /// Bind each queue to the topic in order, stopping at the first failure.
    /// Running this once before any publish keeps concurrent producers and
    /// consumers from racing to create the same names.
    pub async fn bind_all<I, S>(&self, queue_names: I, topic_name: &str) -> Result<Vec<Binding>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bindings = Vec::new();
        for queue_name in queue_names {
            bindings.push(self.bind(queue_name.as_ref(), topic_name).await?);
        }
        Ok(bindings)
    }

    async fn install_policy(&self, queue: &Queue, topic: &Topic) -> Result<()> {
        let broker = self.queues.broker();

        let policy = match self.policy_mode {
            PolicyMode::Replace => PolicyDocument::allow_topic(&queue.url, &topic.arn),
            PolicyMode::Merge => {
                let mut attributes = broker
                    .get_queue_attributes(&queue.url, &[QueueAttribute::Policy])
                    .await?;
                match attributes
                    .remove(&QueueAttribute::Policy)
                    .filter(|p| !p.trim().is_empty())
                {
                    None => PolicyDocument::allow_topic(&queue.url, &topic.arn),
                    Some(existing) => {
                        let mut policy: PolicyDocument =
                            existing.parse().map_err(FanoutError::InvalidPolicy)?;
                        if !policy.merge_topic(&queue.url, &topic.arn) {
                            debug!(queue = %queue.name, topic = %topic.name,
                                "Topic already authorized");
                            return Ok(());
                        }
                        policy
                    }
                }
            }
        };

        let mut attributes = HashMap::new();
        attributes.insert(
            QueueAttribute::Policy,
            policy.to_json().map_err(FanoutError::InvalidPolicy)?,
        );
        broker.set_queue_attributes(&queue.url, attributes).await?;

        info!(queue = %queue.name, topic = %topic.name,
            statements = policy.statement.len(), "Installed queue policy");
        Ok(())
    }
}
