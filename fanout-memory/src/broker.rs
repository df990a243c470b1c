//! `Broker` implementation over the in-memory topic and queue storage

use async_trait::async_trait;
use fanout_core::matching::resource_name;
use fanout_core::policy::SEND_MESSAGE_ACTION;
use fanout_core::{
    Broker, BrokerError, ErrorCode, Notification, PolicyDocument, QueueAttribute, ReceivedMessage,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::queues::{Queue, QueueError, QueueStorage};
use crate::topics::{Protocol, Topic, TopicError, TopicStorage};

/// Topics and queues living in this process. Publishing delivers a
/// notification envelope into every subscribed queue whose access policy
/// authorizes the topic.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    topics: TopicStorage,
    queues: QueueStorage,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topics(&self) -> &TopicStorage {
        &self.topics
    }

    pub fn queues(&self) -> &QueueStorage {
        &self.queues
    }

    fn topic_by_arn(&self, topic_arn: &str) -> Result<Topic, TopicError> {
        let topic = self.topics.get_topic(resource_name(topic_arn))?;
        if topic.arn == topic_arn {
            Ok(topic)
        } else {
            Err(TopicError::TopicNotFound(topic_arn.to_string()))
        }
    }

    fn queue_by_url(&self, queue_url: &str) -> Result<Queue, QueueError> {
        let queue = self.queues.get_queue(resource_name(queue_url))?;
        if queue.url == queue_url {
            Ok(queue)
        } else {
            Err(QueueError::QueueNotFound(queue_url.to_string()))
        }
    }

    /// Whether the queue's policy lets `topic` send into it. A queue without
    /// a policy, or with one that no longer parses, refuses delivery.
    fn authorizes(queue: &Queue, topic: &Topic) -> bool {
        queue
            .policy
            .as_deref()
            .and_then(|policy| policy.parse::<PolicyDocument>().ok())
            .is_some_and(|policy| {
                policy.allows(
                    SEND_MESSAGE_ACTION,
                    &[queue.url.as_str(), queue.arn.as_str()],
                    &topic.arn,
                )
            })
    }

    fn deliver(
        &self,
        topic: &Topic,
        message_id: &str,
        message: &str,
    ) -> Result<usize, BrokerError> {
        let body = Notification::new(message_id, topic.arn.as_str(), message)
            .to_body()
            .map_err(|e| BrokerError::new(ErrorCode::InternalError, e.to_string()))?;

        let mut delivered = 0;
        for subscription in self.topics.list_subscriptions(&topic.name)? {
            match subscription.protocol {
                Protocol::Sqs => {
                    let Some(queue) = self.queues.find_by_arn(&subscription.endpoint) else {
                        warn!(topic = %topic.name, endpoint = %subscription.endpoint,
                            "Subscribed queue does not exist, dropping delivery");
                        continue;
                    };
                    if !Self::authorizes(&queue, topic) {
                        warn!(topic = %topic.name, queue = %queue.name,
                            "Queue policy does not authorize topic, dropping delivery");
                        continue;
                    }
                    match self.queues.send_message(&queue.name, body.clone()) {
                        Ok(_) => delivered += 1,
                        // The queue went away between lookup and send
                        Err(e) => warn!(topic = %topic.name, queue = %queue.name,
                            error = %e, "Delivery failed"),
                    }
                }
            }
        }
        Ok(delivered)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        Ok(self.topics.list_topics().into_iter().map(|t| t.arn).collect())
    }

    async fn create_topic(&self, name: &str) -> Result<String, BrokerError> {
        match self.topics.create_topic(name) {
            Ok(topic) => Ok(topic.arn),
            Err(TopicError::TopicAlreadyExists(name)) => Ok(self.topics.get_topic(&name)?.arn),
            Err(e) => Err(e.into()),
        }
    }

    async fn publish(
        &self,
        topic_arn: &str,
        message: &str,
    ) -> Result<Option<String>, BrokerError> {
        if message.is_empty() {
            return Err(TopicError::InvalidParameter("Empty message".to_string()).into());
        }
        let topic = self.topic_by_arn(topic_arn)?;
        let message_id = uuid::Uuid::new_v4().to_string();

        let delivered = self.deliver(&topic, &message_id, message)?;

        info!(topic = %topic.name, arn = %topic.arn, message_id = %message_id,
            delivered = delivered, "Published message");
        Ok(Some(message_id))
    }

    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<Option<String>, BrokerError> {
        let topic = self.topic_by_arn(topic_arn)?;
        let subscription = self.topics.subscribe(&topic.name, protocol, endpoint)?;
        Ok(Some(subscription.subscription_arn))
    }

    async fn list_queues(&self) -> Result<Vec<String>, BrokerError> {
        Ok(self.queues.list_queues())
    }

    async fn create_queue(&self, name: &str) -> Result<String, BrokerError> {
        match self.queues.create_queue(name) {
            Ok(queue) => Ok(queue.url),
            Err(QueueError::QueueAlreadyExists(name)) => Ok(self.queues.get_queue(&name)?.url),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &str,
        attributes: &[QueueAttribute],
    ) -> Result<HashMap<QueueAttribute, String>, BrokerError> {
        let queue = self.queue_by_url(queue_url)?;
        Ok(self.queues.get_attributes(&queue.name, attributes)?)
    }

    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        attributes: HashMap<QueueAttribute, String>,
    ) -> Result<(), BrokerError> {
        let queue = self.queue_by_url(queue_url)?;
        Ok(self.queues.set_attributes(&queue.name, attributes)?)
    }

    async fn send_message(&self, queue_url: &str, body: &str) -> Result<String, BrokerError> {
        let queue = self.queue_by_url(queue_url)?;
        Ok(self
            .queues
            .send_message(&queue.name, body.to_string())?
            .message_id)
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let queue = self.queue_by_url(queue_url)?;
        Ok(self
            .queues
            .receive_message(&queue.name, max_messages, wait)
            .await?)
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), BrokerError> {
        let queue = self.queue_by_url(queue_url)?;
        Ok(self.queues.delete_message(&queue.name, receipt_handle)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::QUEUE_PROTOCOL;

    async fn bound_queue(broker: &MemoryBroker, queue: &str, topic_arn: &str) -> String {
        let url = broker.create_queue(queue).await.unwrap();
        let arn = broker.queues().get_queue(queue).unwrap().arn;
        broker
            .subscribe(topic_arn, QUEUE_PROTOCOL, &arn)
            .await
            .unwrap();

        let mut attributes = HashMap::new();
        attributes.insert(
            QueueAttribute::Policy,
            PolicyDocument::allow_topic(&url, topic_arn).to_json().unwrap(),
        );
        broker.set_queue_attributes(&url, attributes).await.unwrap();
        url
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let broker = MemoryBroker::new();

        let first = broker.create_topic("events").await.unwrap();
        let second = broker.create_topic("events").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(broker.list_topics().await.unwrap(), vec![first]);

        let q1 = broker.create_queue("orders").await.unwrap();
        let q2 = broker.create_queue("orders").await.unwrap();
        assert_eq!(q1, q2);
        assert_eq!(broker.list_queues().await.unwrap(), vec![q1]);
    }

    #[tokio::test]
    async fn test_publish_delivers_envelope() {
        let broker = MemoryBroker::new();
        let topic_arn = broker.create_topic("events").await.unwrap();
        let url = bound_queue(&broker, "orders", &topic_arn).await;

        let message_id = broker
            .publish(&topic_arn, "payload")
            .await
            .unwrap()
            .unwrap();

        let received = broker
            .receive_message(&url, 1, Duration::ZERO)
            .await
            .unwrap();
        let envelope = Notification::from_body(&received[0].body).unwrap();
        assert_eq!(envelope.message, "payload");
        assert_eq!(envelope.message_id, message_id);
        assert_eq!(envelope.topic_arn, topic_arn);
    }

    #[tokio::test]
    async fn test_publish_without_policy_is_dropped() {
        let broker = MemoryBroker::new();
        let topic_arn = broker.create_topic("events").await.unwrap();
        let url = broker.create_queue("orders").await.unwrap();
        let arn = broker.queues().get_queue("orders").unwrap().arn;
        broker
            .subscribe(&topic_arn, QUEUE_PROTOCOL, &arn)
            .await
            .unwrap();

        assert!(broker.publish(&topic_arn, "payload").await.unwrap().is_some());
        assert!(broker
            .receive_message(&url, 1, Duration::ZERO)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_policy_for_other_topic_is_dropped() {
        let broker = MemoryBroker::new();
        let events = broker.create_topic("events").await.unwrap();
        let audit = broker.create_topic("audit").await.unwrap();
        let url = bound_queue(&broker, "orders", &events).await;
        let arn = broker.queues().get_queue("orders").unwrap().arn;
        broker.subscribe(&audit, QUEUE_PROTOCOL, &arn).await.unwrap();

        broker.publish(&audit, "from audit").await.unwrap();
        assert!(broker
            .receive_message(&url, 1, Duration::ZERO)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unknown_identifiers() {
        let broker = MemoryBroker::new();

        let err = broker
            .publish("arn:aws:sns:us-east-1:000000000000:missing", "x")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);

        let err = broker
            .send_message("http://localhost:4566/000000000000/missing", "x")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::QueueDoesNotExist);

        broker.create_queue("orders").await.unwrap();
        let err = broker
            .send_message("http://elsewhere:9324/000000000000/orders", "x")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::QueueDoesNotExist);
    }

    #[tokio::test]
    async fn test_empty_publish_rejected() {
        let broker = MemoryBroker::new();
        let topic_arn = broker.create_topic("events").await.unwrap();

        let err = broker.publish(&topic_arn, "").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameterValue);
    }
}
