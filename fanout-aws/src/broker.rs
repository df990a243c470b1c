//! `Broker` implementation over the AWS SDK clients

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::QueueAttributeName;
use aws_smithy_types::error::display::DisplayErrorContext;
use fanout_core::{Broker, BrokerConfig, BrokerError, ErrorCode, QueueAttribute, ReceivedMessage};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Attribute key under which the SDK records the service request id
const REQUEST_ID_KEY: &str = "aws_request_id";

/// SNS and SQS clients sharing one SDK configuration
#[derive(Debug, Clone)]
pub struct AwsBroker {
    sns: aws_sdk_sns::Client,
    sqs: aws_sdk_sqs::Client,
}

impl AwsBroker {
    pub fn new(sns: aws_sdk_sns::Client, sqs: aws_sdk_sqs::Client) -> Self {
        Self { sns, sqs }
    }

    pub fn from_sdk_config(config: &aws_config::SdkConfig) -> Self {
        Self::new(
            aws_sdk_sns::Client::new(config),
            aws_sdk_sqs::Client::new(config),
        )
    }

    /// Build clients from the default provider chain, overriding endpoint and
    /// region where configured
    pub async fn from_config(config: &BrokerConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(endpoint_url) = &config.endpoint_url {
            debug!(endpoint = %endpoint_url, "Using custom broker endpoint");
            loader = loader.endpoint_url(endpoint_url);
        }
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }

        Self::from_sdk_config(&loader.load().await)
    }
}

fn broker_error<E, R>(operation: &str, err: SdkError<E, R>) -> BrokerError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = match &err {
        SdkError::ServiceError(_) => err.code().map_or(ErrorCode::Unknown, ErrorCode::from_code),
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ErrorCode::Transport,
        SdkError::ResponseError(_) => ErrorCode::MalformedResponse,
        _ => ErrorCode::Unknown,
    };
    let detail = err
        .message()
        .map_or_else(|| DisplayErrorContext(&err).to_string(), str::to_owned);

    let error = BrokerError::new(code, format!("{operation}: {detail}"));
    match err.meta().extra(REQUEST_ID_KEY) {
        Some(request_id) => error.with_request_id(request_id),
        None => error,
    }
}

fn wait_seconds(wait: Duration) -> i32 {
    i32::try_from(wait.as_secs()).unwrap_or(i32::MAX)
}

#[async_trait]
impl Broker for AwsBroker {
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        let mut arns = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .sns
                .list_topics()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| broker_error("ListTopics", e))?;

            arns.extend(
                output
                    .topics()
                    .iter()
                    .filter_map(|t| t.topic_arn().map(str::to_owned)),
            );
            match output.next_token() {
                Some(token) => next_token = Some(token.to_owned()),
                None => break,
            }
        }
        Ok(arns)
    }

    async fn create_topic(&self, name: &str) -> Result<String, BrokerError> {
        let output = self
            .sns
            .create_topic()
            .name(name)
            .send()
            .await
            .map_err(|e| broker_error("CreateTopic", e))?;

        output
            .topic_arn()
            .map(str::to_owned)
            .ok_or_else(|| BrokerError::malformed_response("TopicArn"))
    }

    async fn publish(
        &self,
        topic_arn: &str,
        message: &str,
    ) -> Result<Option<String>, BrokerError> {
        let output = self
            .sns
            .publish()
            .topic_arn(topic_arn)
            .message(message)
            .send()
            .await
            .map_err(|e| broker_error("Publish", e))?;

        Ok(output.message_id().map(str::to_owned))
    }

    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<Option<String>, BrokerError> {
        let output = self
            .sns
            .subscribe()
            .topic_arn(topic_arn)
            .protocol(protocol)
            .endpoint(endpoint)
            .send()
            .await
            .map_err(|e| broker_error("Subscribe", e))?;

        Ok(output.subscription_arn().map(str::to_owned))
    }

    async fn list_queues(&self) -> Result<Vec<String>, BrokerError> {
        let mut urls = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            // NextToken is only returned when MaxResults is set
            let output = self
                .sqs
                .list_queues()
                .max_results(1000)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| broker_error("ListQueues", e))?;

            urls.extend(output.queue_urls().iter().cloned());
            match output.next_token() {
                Some(token) => next_token = Some(token.to_owned()),
                None => break,
            }
        }
        Ok(urls)
    }

    async fn create_queue(&self, name: &str) -> Result<String, BrokerError> {
        let output = self
            .sqs
            .create_queue()
            .queue_name(name)
            .send()
            .await
            .map_err(|e| broker_error("CreateQueue", e))?;

        output
            .queue_url()
            .map(str::to_owned)
            .ok_or_else(|| BrokerError::malformed_response("QueueUrl"))
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &str,
        attributes: &[QueueAttribute],
    ) -> Result<HashMap<QueueAttribute, String>, BrokerError> {
        let names = attributes
            .iter()
            .map(|a| QueueAttributeName::from(a.as_str()))
            .collect();

        let output = self
            .sqs
            .get_queue_attributes()
            .queue_url(queue_url)
            .set_attribute_names(Some(names))
            .send()
            .await
            .map_err(|e| broker_error("GetQueueAttributes", e))?;

        Ok(output
            .attributes()
            .map(|returned| {
                returned
                    .iter()
                    .filter_map(|(name, value)| {
                        name.as_str()
                            .parse::<QueueAttribute>()
                            .ok()
                            .map(|attribute| (attribute, value.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        attributes: HashMap<QueueAttribute, String>,
    ) -> Result<(), BrokerError> {
        let attributes = attributes
            .into_iter()
            .map(|(attribute, value)| (QueueAttributeName::from(attribute.as_str()), value))
            .collect();

        self.sqs
            .set_queue_attributes()
            .queue_url(queue_url)
            .set_attributes(Some(attributes))
            .send()
            .await
            .map_err(|e| broker_error("SetQueueAttributes", e))?;
        Ok(())
    }

    async fn send_message(&self, queue_url: &str, body: &str) -> Result<String, BrokerError> {
        let output = self
            .sqs
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| broker_error("SendMessage", e))?;

        output
            .message_id()
            .map(str::to_owned)
            .ok_or_else(|| BrokerError::malformed_response("MessageId"))
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let output = self
            .sqs
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_seconds(wait))
            .send()
            .await
            .map_err(|e| broker_error("ReceiveMessage", e))?;

        output
            .messages()
            .iter()
            .map(|message| -> Result<ReceivedMessage, BrokerError> {
                let receipt_handle = message
                    .receipt_handle()
                    .ok_or_else(|| BrokerError::malformed_response("ReceiptHandle"))?;
                Ok(ReceivedMessage {
                    message_id: message.message_id().unwrap_or_default().to_owned(),
                    receipt_handle: receipt_handle.to_owned(),
                    body: message.body().unwrap_or_default().to_owned(),
                })
            })
            .collect()
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), BrokerError> {
        self.sqs
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| broker_error("DeleteMessage", e))?;
        Ok(())
    }
}
