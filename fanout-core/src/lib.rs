//! Core types and traits for fanout
//!
//! This crate provides the broker abstraction and the wire formats shared by
//! the registries and the broker implementations.

pub mod broker;
pub mod config;
pub mod envelope;
pub mod error;
pub mod matching;
pub mod policy;

pub use broker::{Broker, QueueAttribute, ReceivedMessage, QUEUE_PROTOCOL};
pub use config::{BrokerConfig, FanoutConfig, PolicyMode};
pub use envelope::Notification;
pub use error::{BrokerError, ErrorCode, FanoutError, Result};
pub use matching::MatchPolicy;
pub use policy::{OneOrMany, PolicyDocument, Statement};
