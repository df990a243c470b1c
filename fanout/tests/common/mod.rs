//! Shared helpers for fanout integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fanout::{Broker, BrokerError, ErrorCode, QueueAttribute, ReceivedMessage};
use fanout_memory::MemoryBroker;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Route test logs through the test writer; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A memory broker that can be told to misbehave
#[derive(Debug, Default)]
pub struct FlakyBroker {
    pub inner: MemoryBroker,
    pub drop_message_ids: AtomicBool,
    pub fail_attribute_writes: AtomicBool,
    pub omit_queue_arns: AtomicBool,
    pub garble_policy_reads: AtomicBool,
}

/// Served in place of a queue's policy while `garble_policy_reads` is on
pub const GARBLED_POLICY: &str = "{\"Version\": \"2012-10-17\", \"Statement\": [";

impl FlakyBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drop_message_ids(&self, enabled: bool) {
        self.drop_message_ids.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_attribute_writes(&self, enabled: bool) {
        self.fail_attribute_writes.store(enabled, Ordering::SeqCst);
    }

    pub fn omit_queue_arns(&self, enabled: bool) {
        self.omit_queue_arns.store(enabled, Ordering::SeqCst);
    }

    pub fn garble_policy_reads(&self, enabled: bool) {
        self.garble_policy_reads.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl Broker for FlakyBroker {
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        self.inner.list_topics().await
    }

    async fn create_topic(&self, name: &str) -> Result<String, BrokerError> {
        self.inner.create_topic(name).await
    }

    async fn publish(
        &self,
        topic_arn: &str,
        message: &str,
    ) -> Result<Option<String>, BrokerError> {
        let message_id = self.inner.publish(topic_arn, message).await?;
        if self.drop_message_ids.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(message_id)
    }

    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<Option<String>, BrokerError> {
        self.inner.subscribe(topic_arn, protocol, endpoint).await
    }

    async fn list_queues(&self) -> Result<Vec<String>, BrokerError> {
        self.inner.list_queues().await
    }

    async fn create_queue(&self, name: &str) -> Result<String, BrokerError> {
        self.inner.create_queue(name).await
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &str,
        attributes: &[QueueAttribute],
    ) -> Result<HashMap<QueueAttribute, String>, BrokerError> {
        let mut returned = self.inner.get_queue_attributes(queue_url, attributes).await?;
        if self.omit_queue_arns.load(Ordering::SeqCst) {
            returned.remove(&QueueAttribute::QueueArn);
        }
        if self.garble_policy_reads.load(Ordering::SeqCst) {
            if let Some(policy) = returned.get_mut(&QueueAttribute::Policy) {
                *policy = GARBLED_POLICY.to_string();
            }
        }
        Ok(returned)
    }

    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        attributes: HashMap<QueueAttribute, String>,
    ) -> Result<(), BrokerError> {
        if self.fail_attribute_writes.load(Ordering::SeqCst) {
            return Err(BrokerError::new(ErrorCode::AccessDenied, "not allowed")
                .with_resource(queue_url));
        }
        self.inner.set_queue_attributes(queue_url, attributes).await
    }

    async fn send_message(&self, queue_url: &str, body: &str) -> Result<String, BrokerError> {
        self.inner.send_message(queue_url, body).await
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        self.inner
            .receive_message(queue_url, max_messages, wait)
            .await
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), BrokerError> {
        self.inner.delete_message(queue_url, receipt_handle).await
    }
}
