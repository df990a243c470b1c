//! Topic and subscription storage

use dashmap::{mapref::entry::Entry, DashMap};
use fanout_core::{BrokerError, ErrorCode};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

use crate::{ACCOUNT_ID, REGION};

#[derive(Error, Debug)]
pub enum TopicError {
    #[error("Topic does not exist: {0}")]
    TopicNotFound(String),
    #[error("Topic already exists: {0}")]
    TopicAlreadyExists(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<TopicError> for BrokerError {
    fn from(e: TopicError) -> Self {
        let message = e.to_string();
        match e {
            TopicError::TopicNotFound(name) => {
                BrokerError::new(ErrorCode::NotFound, message).with_resource(name)
            }
            TopicError::TopicAlreadyExists(name) => {
                BrokerError::new(ErrorCode::InvalidParameterValue, message).with_resource(name)
            }
            TopicError::InvalidParameter(_) => {
                BrokerError::new(ErrorCode::InvalidParameterValue, message)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Topic {
    pub name: String,
    pub arn: String,
}

impl Topic {
    pub fn new(name: String) -> Self {
        Self {
            arn: format!("arn:aws:sns:{REGION}:{ACCOUNT_ID}:{name}"),
            name,
        }
    }
}

/// Delivery protocols this broker can honour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Sqs,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Sqs => "sqs",
        }
    }
}

impl FromStr for Protocol {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqs" => Ok(Protocol::Sqs),
            other => Err(TopicError::InvalidParameter(format!(
                "Unsupported protocol: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscription_arn: String,
    pub protocol: Protocol,
    pub endpoint: String,
}

impl Subscription {
    fn new(topic_arn: &str, protocol: Protocol, endpoint: &str) -> Self {
        Self {
            subscription_arn: format!("{}:{}", topic_arn, uuid::Uuid::new_v4()),
            protocol,
            endpoint: endpoint.to_string(),
        }
    }
}

fn validate_topic_name(name: &str) -> Result<(), TopicError> {
    let valid = !name.is_empty()
        && name.len() <= 256
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TopicError::InvalidParameter(format!(
            "Invalid topic name: {name}"
        )))
    }
}

#[derive(Debug, Default)]
pub struct TopicStorage {
    topics: DashMap<String, Topic>,
    subscriptions: DashMap<String, Vec<Subscription>>,
}

impl TopicStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_topic(&self, name: &str) -> Result<Topic, TopicError> {
        validate_topic_name(name)?;

        match self.topics.entry(name.to_string()) {
            Entry::Occupied(_) => Err(TopicError::TopicAlreadyExists(name.to_string())),
            Entry::Vacant(slot) => {
                let topic = Topic::new(name.to_string());
                info!(name = %name, arn = %topic.arn, "Creating topic");
                self.subscriptions.insert(name.to_string(), Vec::new());
                slot.insert(topic.clone());
                Ok(topic)
            }
        }
    }

    pub fn get_topic(&self, name: &str) -> Result<Topic, TopicError> {
        self.topics
            .get(name)
            .map(|t| t.clone())
            .ok_or_else(|| TopicError::TopicNotFound(name.to_string()))
    }

    /// Topics ordered by name
    pub fn list_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.topics.iter().map(|t| t.value().clone()).collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        topics
    }

    /// Subscribing the same endpoint twice returns the existing subscription
    pub fn subscribe(
        &self,
        topic_name: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<Subscription, TopicError> {
        let topic = self.get_topic(topic_name)?;
        let protocol = protocol.parse::<Protocol>()?;
        if !endpoint.starts_with("arn:") {
            return Err(TopicError::InvalidParameter(format!(
                "Invalid {} endpoint: {endpoint}",
                protocol.as_str()
            )));
        }

        let mut subs = self
            .subscriptions
            .get_mut(topic_name)
            .ok_or_else(|| TopicError::TopicNotFound(topic_name.to_string()))?;

        if let Some(existing) = subs
            .iter()
            .find(|s| s.protocol == protocol && s.endpoint == endpoint)
        {
            return Ok(existing.clone());
        }

        let subscription = Subscription::new(&topic.arn, protocol, endpoint);
        subs.push(subscription.clone());

        info!(topic = %topic_name, protocol = %protocol.as_str(), endpoint = %endpoint,
            "Subscribed");
        Ok(subscription)
    }

    pub fn list_subscriptions(&self, topic_name: &str) -> Result<Vec<Subscription>, TopicError> {
        let _ = self.get_topic(topic_name)?;

        Ok(self
            .subscriptions
            .get(topic_name)
            .map(|s| s.clone())
            .unwrap_or_default())
    }
}
