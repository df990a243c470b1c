//! Queue storage

use dashmap::{mapref::entry::Entry, DashMap};
use fanout_core::{BrokerError, ErrorCode, PolicyDocument, QueueAttribute, ReceivedMessage};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{ACCOUNT_ID, ENDPOINT, REGION};

/// Longest long-poll a single receive may ask for
pub const MAX_WAIT: Duration = Duration::from_secs(20);

const MAX_RECEIVE_BATCH: usize = 10;
const MAX_VISIBILITY_TIMEOUT: u64 = 43_200;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue does not exist: {0}")]
    QueueNotFound(String),
    #[error("Queue already exists: {0}")]
    QueueAlreadyExists(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Receipt handle is invalid: {0}")]
    ReceiptHandleInvalid(String),
}

impl From<QueueError> for BrokerError {
    fn from(e: QueueError) -> Self {
        let message = e.to_string();
        match e {
            QueueError::QueueNotFound(name) => {
                BrokerError::new(ErrorCode::QueueDoesNotExist, message).with_resource(name)
            }
            QueueError::QueueAlreadyExists(name) => {
                BrokerError::new(ErrorCode::QueueAlreadyExists, message).with_resource(name)
            }
            QueueError::InvalidParameter(_) => {
                BrokerError::new(ErrorCode::InvalidParameterValue, message)
            }
            QueueError::ReceiptHandleInvalid(handle) => {
                BrokerError::new(ErrorCode::ReceiptHandleIsInvalid, message).with_resource(handle)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Queue {
    pub name: String,
    pub url: String,
    pub arn: String,
    pub visibility_timeout: u64,
    pub policy: Option<String>,
}

impl Queue {
    pub fn new(name: String) -> Self {
        Self {
            url: format!("{ENDPOINT}/{ACCOUNT_ID}/{name}"),
            arn: format!("arn:aws:sqs:{REGION}:{ACCOUNT_ID}:{name}"),
            name,
            visibility_timeout: 30,
            policy: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: String,
    pub body: String,
}

impl Message {
    pub fn new(body: String) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            body,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    message: Message,
    receipt_handle: String,
    visible_at: Instant,
}

/// Visible messages in arrival order, plus received ones awaiting deletion
#[derive(Debug, Default)]
struct Buffer {
    visible: VecDeque<Message>,
    in_flight: Vec<InFlight>,
}

impl Buffer {
    fn restore_expired(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.in_flight.len() {
            if self.in_flight[i].visible_at <= now {
                let expired = self.in_flight.swap_remove(i);
                self.visible.push_back(expired.message);
            } else {
                i += 1;
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.in_flight.iter().map(|m| m.visible_at).min()
    }

    fn take(&mut self, max: usize, visibility: Duration, now: Instant) -> Vec<ReceivedMessage> {
        self.restore_expired(now);

        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(message) = self.visible.pop_front() else {
                break;
            };
            let receipt_handle = uuid::Uuid::new_v4().to_string();

            batch.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                receipt_handle: receipt_handle.clone(),
                body: message.body.clone(),
            });
            self.in_flight.push(InFlight {
                message,
                receipt_handle,
                visible_at: now + visibility,
            });
        }
        batch
    }
}

#[derive(Debug)]
struct QueueState {
    queue: Mutex<Queue>,
    buffer: Mutex<Buffer>,
    arrivals: Notify,
}

impl QueueState {
    fn new(queue: Queue) -> Self {
        Self {
            queue: Mutex::new(queue),
            buffer: Mutex::new(Buffer::default()),
            arrivals: Notify::new(),
        }
    }

    fn take(&self, max: usize, now: Instant) -> (Vec<ReceivedMessage>, Option<Instant>) {
        let visibility = Duration::from_secs(self.queue.lock().visibility_timeout);
        let mut buffer = self.buffer.lock();
        let batch = buffer.take(max, visibility, now);
        (batch, buffer.next_expiry())
    }
}

fn validate_queue_name(name: &str) -> Result<(), QueueError> {
    let valid = !name.is_empty()
        && name.len() <= 80
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(QueueError::InvalidParameter(format!(
            "Invalid queue name: {name}"
        )))
    }
}

fn parse_seconds(attribute: QueueAttribute, value: &str, max: u64) -> Result<u64, QueueError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs <= max)
        .ok_or_else(|| {
            QueueError::InvalidParameter(format!(
                "{attribute} must be between 0 and {max}, got {value}"
            ))
        })
}

#[derive(Debug, Default)]
pub struct QueueStorage {
    queues: DashMap<String, Arc<QueueState>>,
}

impl QueueStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, name: &str) -> Result<Arc<QueueState>, QueueError> {
        self.queues
            .get(name)
            .map(|q| Arc::clone(q.value()))
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    pub fn create_queue(&self, name: &str) -> Result<Queue, QueueError> {
        validate_queue_name(name)?;

        match self.queues.entry(name.to_string()) {
            Entry::Occupied(_) => Err(QueueError::QueueAlreadyExists(name.to_string())),
            Entry::Vacant(slot) => {
                let queue = Queue::new(name.to_string());
                info!(name = %name, url = %queue.url, "Creating queue");
                slot.insert(Arc::new(QueueState::new(queue.clone())));
                Ok(queue)
            }
        }
    }

    pub fn get_queue(&self, name: &str) -> Result<Queue, QueueError> {
        Ok(self.state(name)?.queue.lock().clone())
    }

    /// Queue URLs ordered by queue name
    pub fn list_queues(&self) -> Vec<String> {
        let mut queues: Vec<(String, String)> = self
            .queues
            .iter()
            .map(|q| (q.key().clone(), q.value().queue.lock().url.clone()))
            .collect();
        queues.sort();
        queues.into_iter().map(|(_, url)| url).collect()
    }

    pub fn find_by_arn(&self, arn: &str) -> Option<Queue> {
        self.queues.iter().find_map(|q| {
            let queue = q.value().queue.lock().clone();
            (queue.arn == arn).then_some(queue)
        })
    }

    pub fn get_attributes(
        &self,
        name: &str,
        attributes: &[QueueAttribute],
    ) -> Result<HashMap<QueueAttribute, String>, QueueError> {
        let state = self.state(name)?;
        let queue = state.queue.lock().clone();

        let mut result = HashMap::new();
        for attribute in attributes {
            let value = match attribute {
                QueueAttribute::QueueArn => Some(queue.arn.clone()),
                QueueAttribute::Policy => queue.policy.clone(),
                QueueAttribute::VisibilityTimeout => Some(queue.visibility_timeout.to_string()),
                QueueAttribute::ApproximateNumberOfMessages => {
                    let mut buffer = state.buffer.lock();
                    buffer.restore_expired(Instant::now());
                    Some(buffer.visible.len().to_string())
                }
            };
            if let Some(value) = value {
                result.insert(*attribute, value);
            }
        }
        Ok(result)
    }

    /// Validate every attribute before applying any of them
    pub fn set_attributes(
        &self,
        name: &str,
        attributes: HashMap<QueueAttribute, String>,
    ) -> Result<(), QueueError> {
        let state = self.state(name)?;

        for (attribute, value) in &attributes {
            match attribute {
                QueueAttribute::Policy => {
                    value.parse::<PolicyDocument>().map_err(|e| {
                        QueueError::InvalidParameter(format!("Invalid value for Policy: {e}"))
                    })?;
                }
                QueueAttribute::VisibilityTimeout => {
                    parse_seconds(*attribute, value, MAX_VISIBILITY_TIMEOUT)?;
                }
                QueueAttribute::QueueArn | QueueAttribute::ApproximateNumberOfMessages => {
                    return Err(QueueError::InvalidParameter(format!(
                        "{attribute} is read-only"
                    )));
                }
            }
        }

        let mut queue = state.queue.lock();
        for (attribute, value) in attributes {
            match attribute {
                QueueAttribute::Policy => queue.policy = Some(value),
                QueueAttribute::VisibilityTimeout => {
                    queue.visibility_timeout =
                        parse_seconds(attribute, &value, MAX_VISIBILITY_TIMEOUT)?;
                }
                QueueAttribute::QueueArn | QueueAttribute::ApproximateNumberOfMessages => {}
            }
            debug!(queue = %name, attribute = %attribute, "Set queue attribute");
        }
        Ok(())
    }

    pub fn send_message(&self, queue_name: &str, body: String) -> Result<Message, QueueError> {
        let state = self.state(queue_name)?;
        if body.is_empty() {
            return Err(QueueError::InvalidParameter(
                "The message body must not be empty".to_string(),
            ));
        }

        let message = Message::new(body);
        state.buffer.lock().visible.push_back(message.clone());
        state.arrivals.notify_waiters();

        info!(queue = %queue_name, message_id = %message.message_id, "Sent message");
        Ok(message)
    }

    /// Wait up to `wait` for messages. Returns as soon as at least one message
    /// is available, or empty once the wait has elapsed.
    pub async fn receive_message(
        &self,
        queue_name: &str,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        if wait > MAX_WAIT {
            return Err(QueueError::InvalidParameter(format!(
                "WaitTimeSeconds must be between 0 and {}, got {}",
                MAX_WAIT.as_secs(),
                wait.as_secs()
            )));
        }
        let max = usize::try_from(max_messages)
            .ok()
            .filter(|n| (1..=MAX_RECEIVE_BATCH).contains(n))
            .ok_or_else(|| {
                QueueError::InvalidParameter(format!(
                    "MaxNumberOfMessages must be between 1 and {}, got {}",
                    MAX_RECEIVE_BATCH, max_messages
                ))
            })?;

        let state = self.state(queue_name)?;
        let deadline = Instant::now() + wait;

        loop {
            // Register for wakeups before looking, so a send between the
            // check and the wait is not lost.
            let arrival = state.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            let now = Instant::now();
            let (batch, next_expiry) = state.take(max, now);
            if !batch.is_empty() || now >= deadline {
                info!(queue = %queue_name, count = batch.len(), "Received messages");
                return Ok(batch);
            }

            let wake_at = next_expiry.map_or(deadline, |at| at.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, arrival).await;
        }
    }

    pub fn delete_message(&self, queue_name: &str, receipt_handle: &str) -> Result<(), QueueError> {
        let state = self.state(queue_name)?;
        let mut buffer = state.buffer.lock();

        let position = buffer
            .in_flight
            .iter()
            .position(|m| m.receipt_handle == receipt_handle)
            .ok_or_else(|| QueueError::ReceiptHandleInvalid(receipt_handle.to_string()))?;
        buffer.in_flight.swap_remove(position);

        info!(queue = %queue_name, receipt = %receipt_handle, "Deleted message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with(name: &str) -> QueueStorage {
        let storage = QueueStorage::new();
        storage.create_queue(name).unwrap();
        storage
    }

    #[test]
    fn test_create_queue_urls() {
        let storage = QueueStorage::new();
        let queue = storage.create_queue("orders").unwrap();

        assert_eq!(queue.url, "http://localhost:4566/000000000000/orders");
        assert_eq!(queue.arn, "arn:aws:sqs:us-east-1:000000000000:orders");
        assert!(matches!(
            storage.create_queue("orders"),
            Err(QueueError::QueueAlreadyExists(_))
        ));
    }

    #[test]
    fn test_invalid_queue_name() {
        let storage = QueueStorage::new();
        assert!(matches!(
            storage.create_queue("has space"),
            Err(QueueError::InvalidParameter(_))
        ));
        assert!(matches!(
            storage.create_queue(""),
            Err(QueueError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_list_queues_sorted() {
        let storage = QueueStorage::new();
        for name in ["beta", "alpha", "alpha-2"] {
            storage.create_queue(name).unwrap();
        }

        let all = storage.list_queues();
        assert_eq!(all.len(), 3);
        assert!(all[0].ends_with("/alpha"));
        assert!(all[1].ends_with("/alpha-2"));
        assert!(all[2].ends_with("/beta"));
    }

    #[tokio::test]
    async fn test_receive_then_delete() {
        let storage = storage_with("orders");
        let sent = storage.send_message("orders", "hello".to_string()).unwrap();

        let received = storage
            .receive_message("orders", 1, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, "hello");
        assert_eq!(received[0].message_id, sent.message_id);

        storage
            .delete_message("orders", &received[0].receipt_handle)
            .unwrap();
        assert!(matches!(
            storage.delete_message("orders", &received[0].receipt_handle),
            Err(QueueError::ReceiptHandleInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_received_message_is_hidden() {
        let storage = storage_with("orders");
        storage.send_message("orders", "hello".to_string()).unwrap();

        let first = storage
            .receive_message("orders", 1, Duration::ZERO)
            .await
            .unwrap();
        let second = storage
            .receive_message("orders", 1, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_visibility_timeout_redelivers() {
        let storage = storage_with("orders");
        let mut attributes = HashMap::new();
        attributes.insert(QueueAttribute::VisibilityTimeout, "0".to_string());
        storage.set_attributes("orders", attributes).unwrap();
        storage.send_message("orders", "again".to_string()).unwrap();

        let first = storage
            .receive_message("orders", 1, Duration::ZERO)
            .await
            .unwrap();
        let second = storage
            .receive_message("orders", 1, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(first[0].message_id, second[0].message_id);
        assert_ne!(first[0].receipt_handle, second[0].receipt_handle);
    }

    #[tokio::test]
    async fn test_receive_batch_limit() {
        let storage = storage_with("orders");
        for i in 0..12 {
            storage.send_message("orders", format!("m{i}")).unwrap();
        }

        let batch = storage
            .receive_message("orders", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(batch.len(), 10);
        assert_eq!(batch[0].body, "m0");
        assert!(storage
            .receive_message("orders", 11, Duration::ZERO)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_long_poll_times_out_empty() {
        let storage = storage_with("orders");
        let started = std::time::Instant::now();

        let received = storage
            .receive_message("orders", 1, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(received.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_send() {
        let storage = Arc::new(storage_with("orders"));

        let receiver = {
            let storage = Arc::clone(&storage);
            tokio::spawn(async move {
                storage
                    .receive_message("orders", 1, Duration::from_secs(10))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        storage.send_message("orders", "late".to_string()).unwrap();

        let received = receiver.await.unwrap().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, "late");
    }

    #[tokio::test]
    async fn test_wait_above_limit_rejected() {
        let storage = storage_with("orders");
        assert!(matches!(
            storage
                .receive_message("orders", 1, Duration::from_secs(21))
                .await,
            Err(QueueError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_attributes() {
        let storage = storage_with("orders");
        storage.send_message("orders", "one".to_string()).unwrap();

        let attributes = storage
            .get_attributes(
                "orders",
                &[
                    QueueAttribute::QueueArn,
                    QueueAttribute::Policy,
                    QueueAttribute::ApproximateNumberOfMessages,
                ],
            )
            .unwrap();
        assert_eq!(
            attributes[&QueueAttribute::QueueArn],
            "arn:aws:sqs:us-east-1:000000000000:orders"
        );
        assert!(!attributes.contains_key(&QueueAttribute::Policy));
        assert_eq!(attributes[&QueueAttribute::ApproximateNumberOfMessages], "1");
    }

    #[test]
    fn test_set_attributes_validates() {
        let storage = storage_with("orders");

        let mut policy = HashMap::new();
        policy.insert(QueueAttribute::Policy, "not json".to_string());
        assert!(storage.set_attributes("orders", policy).is_err());

        let mut arn = HashMap::new();
        arn.insert(QueueAttribute::QueueArn, "arn:x".to_string());
        assert!(storage.set_attributes("orders", arn).is_err());

        let mut timeout = HashMap::new();
        timeout.insert(QueueAttribute::VisibilityTimeout, "50000".to_string());
        assert!(storage.set_attributes("orders", timeout).is_err());
        assert_eq!(storage.get_queue("orders").unwrap().visibility_timeout, 30);
    }

    #[test]
    fn test_find_by_arn() {
        let storage = storage_with("orders");
        let queue = storage
            .find_by_arn("arn:aws:sqs:us-east-1:000000000000:orders")
            .unwrap();
        assert_eq!(queue.name, "orders");
        assert!(storage.find_by_arn("arn:aws:sqs:us-east-1:000000000000:nope").is_none());
    }
}
