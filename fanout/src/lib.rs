//! Fan-out messaging over a topic/queue broker
//!
//! One publish to a topic reaches every queue bound to it; each queue is
//! drained independently, one message per receive.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fanout::{Fanout, FanoutConfig};
//! use fanout_memory::MemoryBroker;
//!
//! # async fn run() -> fanout::Result<()> {
//! let fanout = Fanout::new(Arc::new(MemoryBroker::new()), &FanoutConfig::default());
//!
//! fanout.binder.bind("consumer1", "topic").await?;
//! fanout.gateway.publish("topic", "hello").await?;
//! assert_eq!(fanout.gateway.receive("consumer1").await?.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

pub mod binder;
pub mod gateway;
pub mod queue;
pub mod topic;

use std::sync::Arc;

pub use binder::{Binding, SubscriptionBinder};
pub use fanout_core::{
    Broker, BrokerError, ErrorCode, FanoutConfig, FanoutError, MatchPolicy, Notification,
    PolicyDocument, PolicyMode, QueueAttribute, ReceivedMessage, Result,
};
pub use gateway::MessageGateway;
pub use queue::{Queue, QueueRegistry};
pub use topic::{Topic, TopicRegistry};

/// Shared handle to the broker client every component talks through
pub type SharedBroker = Arc<dyn Broker>;

/// All components wired to one broker
#[derive(Clone)]
pub struct Fanout {
    pub topics: TopicRegistry,
    pub queues: QueueRegistry,
    pub binder: SubscriptionBinder,
    pub gateway: MessageGateway,
}

impl Fanout {
    pub fn new(broker: SharedBroker, config: &FanoutConfig) -> Self {
        let topics = TopicRegistry::new(Arc::clone(&broker), config.matching);
        let queues = QueueRegistry::new(broker, config.matching);
        let binder = SubscriptionBinder::new(topics.clone(), queues.clone(), config.policy_mode);
        let gateway = MessageGateway::new(topics.clone(), queues.clone(), config.receive_wait());

        Self {
            topics,
            queues,
            binder,
            gateway,
        }
    }
}
