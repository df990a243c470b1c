//! In-process broker for fanout
//!
//! Provides in-memory topics and queues with support for:
//! - CreateTopic, ListTopics, Subscribe, Publish (delivered into subscribed queues)
//! - CreateQueue, ListQueues, queue attributes and access policies
//! - SendMessage, long-polling ReceiveMessage, DeleteMessage
//! - Visibility timeout for received but unacknowledged messages

mod broker;
mod queues;
mod topics;

pub use broker::MemoryBroker;
pub use queues::{Message, Queue, QueueError, QueueStorage, MAX_WAIT};
pub use topics::{Protocol, Subscription, Topic, TopicError, TopicStorage};

/// Account id used in generated ARNs and URLs
pub const ACCOUNT_ID: &str = "000000000000";

/// Region used in generated ARNs
pub const REGION: &str = "us-east-1";

/// Base of generated queue URLs
pub const ENDPOINT: &str = "http://localhost:4566";
