//! Amazon SNS and SQS as a fanout broker
//!
//! Topics are SNS topics, queues are SQS queues. Point
//! [`BrokerConfig::endpoint_url`](fanout_core::BrokerConfig) at a local
//! emulator to run without an AWS account.

mod broker;

pub use broker::AwsBroker;
