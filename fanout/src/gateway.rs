//! Publishing to topics and draining queues

use fanout_core::{FanoutError, Notification, Result};
use std::time::Duration;
use tracing::{debug, info};

use crate::queue::QueueRegistry;
use crate::topic::TopicRegistry;

/// Publishes to named topics and receives from named queues
#[derive(Clone)]
pub struct MessageGateway {
    topics: TopicRegistry,
    queues: QueueRegistry,
    wait: Duration,
}

impl MessageGateway {
    /// `wait` is the long-poll used by [`MessageGateway::receive`]
    pub fn new(topics: TopicRegistry, queues: QueueRegistry, wait: Duration) -> Self {
        Self {
            topics,
            queues,
            wait,
        }
    }

    /// Publish `payload` to every queue bound to `topic_name` and return the
    /// broker's message id
    pub async fn publish(&self, topic_name: &str, payload: &str) -> Result<String> {
        let topic_arn = self.topics.resolve_or_create(topic_name).await?;

        let message_id = self
            .queues
            .broker()
            .publish(&topic_arn, payload)
            .await?
            .ok_or_else(|| FanoutError::PublishFailed {
                topic: topic_name.to_string(),
            })?;

        info!(topic = %topic_name, message_id = %message_id, "Published message");
        Ok(message_id)
    }

    /// Send `payload` straight to a queue, bypassing any topic
    pub async fn send(&self, queue_name: &str, payload: &str) -> Result<String> {
        let queue_url = self.queues.resolve_or_create(queue_name).await?;
        let message_id = self
            .queues
            .broker()
            .send_message(&queue_url, payload)
            .await?;

        info!(queue = %queue_name, message_id = %message_id, "Sent message");
        Ok(message_id)
    }

    /// Receive one published payload, waiting up to the configured long-poll
    pub async fn receive(&self, queue_name: &str) -> Result<Option<String>> {
        self.receive_with_wait(queue_name, self.wait).await
    }

    /// Receive one published payload, waiting up to `wait`.
    ///
    /// The message is deleted before its envelope is opened, so a body that
    /// is not a notification envelope is consumed and reported as
    /// [`FanoutError::MalformedEnvelope`].
    pub async fn receive_with_wait(
        &self,
        queue_name: &str,
        wait: Duration,
    ) -> Result<Option<String>> {
        let Some(body) = self.receive_raw(queue_name, wait).await? else {
            return Ok(None);
        };

        let notification = Notification::from_body(&body).map_err(FanoutError::MalformedEnvelope)?;
        Ok(Some(notification.message))
    }

    /// Receive and delete one message, returning its body as stored
    pub async fn receive_raw(&self, queue_name: &str, wait: Duration) -> Result<Option<String>> {
        let queue_url = self.queues.resolve_or_create(queue_name).await?;
        let broker = self.queues.broker();

        let Some(message) = broker
            .receive_message(&queue_url, 1, wait)
            .await?
            .into_iter()
            .next()
        else {
            debug!(queue = %queue_name, wait = ?wait, "No message available");
            return Ok(None);
        };

        broker
            .delete_message(&queue_url, &message.receipt_handle)
            .await?;

        info!(queue = %queue_name, message_id = %message.message_id, "Received message");
        Ok(Some(message.body))
    }
}
