//! Broker client abstraction

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::BrokerError;

/// Subscription protocol that delivers topic messages into a queue
pub const QUEUE_PROTOCOL: &str = "sqs";

/// Queue attributes the fanout components read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueAttribute {
    QueueArn,
    Policy,
    VisibilityTimeout,
    ApproximateNumberOfMessages,
}

impl QueueAttribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueArn => "QueueArn",
            Self::Policy => "Policy",
            Self::VisibilityTimeout => "VisibilityTimeout",
            Self::ApproximateNumberOfMessages => "ApproximateNumberOfMessages",
        }
    }
}

impl fmt::Display for QueueAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueAttribute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QueueArn" => Ok(Self::QueueArn),
            "Policy" => Ok(Self::Policy),
            "VisibilityTimeout" => Ok(Self::VisibilityTimeout),
            "ApproximateNumberOfMessages" => Ok(Self::ApproximateNumberOfMessages),
            other => Err(format!("unknown queue attribute: {other}")),
        }
    }
}

/// A message handed out by a receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
}

/// Primitive operations a pub/sub broker has to provide
///
/// Topics are addressed by ARN and queues by URL, the identifiers the broker
/// hands back on creation. Implementations report every failure as a
/// [`BrokerError`] and never retry on their own behalf.
#[async_trait]
pub trait Broker: Send + Sync {
    /// List the ARNs of all topics
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError>;

    /// Create a topic and return its ARN
    async fn create_topic(&self, name: &str) -> Result<String, BrokerError>;

    /// Publish a message, returning the message id if the broker assigned one
    async fn publish(&self, topic_arn: &str, message: &str)
        -> Result<Option<String>, BrokerError>;

    /// Subscribe an endpoint, returning the subscription ARN if one was assigned
    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<Option<String>, BrokerError>;

    /// List the URLs of all queues
    async fn list_queues(&self) -> Result<Vec<String>, BrokerError>;

    /// Create a queue and return its URL
    async fn create_queue(&self, name: &str) -> Result<String, BrokerError>;

    /// Fetch the requested attributes; absent attributes are left out of the map
    async fn get_queue_attributes(
        &self,
        queue_url: &str,
        attributes: &[QueueAttribute],
    ) -> Result<HashMap<QueueAttribute, String>, BrokerError>;

    /// Set queue attributes, replacing previous values
    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        attributes: HashMap<QueueAttribute, String>,
    ) -> Result<(), BrokerError>;

    /// Send a message straight to a queue and return its message id
    async fn send_message(&self, queue_url: &str, body: &str) -> Result<String, BrokerError>;

    /// Long-poll a queue for up to `wait`, returning at most `max_messages`
    async fn receive_message(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError>;

    /// Acknowledge a received message
    async fn delete_message(&self, queue_url: &str, receipt_handle: &str)
        -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_attribute_names() {
        for attribute in [
            QueueAttribute::QueueArn,
            QueueAttribute::Policy,
            QueueAttribute::VisibilityTimeout,
            QueueAttribute::ApproximateNumberOfMessages,
        ] {
            assert_eq!(attribute.as_str().parse::<QueueAttribute>(), Ok(attribute));
        }
        assert!("RedrivePolicy".parse::<QueueAttribute>().is_err());
    }
}
