//! Broker error model and the fanout error taxonomy

use thiserror::Error;

use crate::broker::QueueAttribute;

/// Error codes reported by a broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Common
    AccessDenied,
    AuthorizationError,
    InvalidParameterValue,
    Throttling,
    ServiceUnavailable,
    InternalError,

    // Topics
    NotFound,

    // Queues
    QueueDoesNotExist,
    QueueAlreadyExists,
    ReceiptHandleIsInvalid,

    // Client side
    Transport,
    MalformedResponse,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::AuthorizationError => "AuthorizationError",
            Self::InvalidParameterValue => "InvalidParameterValue",
            Self::Throttling => "Throttling",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::InternalError => "InternalError",
            Self::NotFound => "NotFound",
            Self::QueueDoesNotExist => "AWS.SimpleQueueService.NonExistentQueue",
            Self::QueueAlreadyExists => "QueueAlreadyExists",
            Self::ReceiptHandleIsInvalid => "ReceiptHandleIsInvalid",
            Self::Transport => "Transport",
            Self::MalformedResponse => "MalformedResponse",
            Self::Unknown => "Unknown",
        }
    }

    /// Map a code string returned by a broker service onto a known code
    pub fn from_code(code: &str) -> Self {
        match code {
            "AccessDenied" | "AccessDeniedException" => Self::AccessDenied,
            "AuthorizationError" => Self::AuthorizationError,
            "InvalidParameter" | "InvalidParameterValue" | "InvalidAttributeValue"
            | "InvalidParameterValueException" => Self::InvalidParameterValue,
            "Throttling" | "ThrottlingException" | "RequestThrottled" => Self::Throttling,
            "ServiceUnavailable" => Self::ServiceUnavailable,
            "InternalError" | "InternalFailure" => Self::InternalError,
            "NotFound" => Self::NotFound,
            "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
                Self::QueueDoesNotExist
            }
            "QueueAlreadyExists" | "QueueNameExists" => Self::QueueAlreadyExists,
            "ReceiptHandleIsInvalid" => Self::ReceiptHandleIsInvalid,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a broker call
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct BrokerError {
    pub code: ErrorCode,
    pub message: String,
    pub resource: Option<String>,
    pub request_id: Option<String>,
}

impl BrokerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            resource: None,
            request_id: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// A successful response that lacks a field the call must return
    pub fn malformed_response(field: &str) -> Self {
        Self::new(
            ErrorCode::MalformedResponse,
            format!("response is missing {field}"),
        )
    }
}

/// Errors surfaced by the registries, the binder and the gateway
#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(#[from] BrokerError),

    #[error("publish to topic {topic} was not confirmed by the broker")]
    PublishFailed { topic: String },

    #[error("queue {queue} has no {attribute} attribute")]
    AttributeMissing {
        queue: String,
        attribute: QueueAttribute,
    },

    #[error("malformed notification envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    #[error("invalid queue policy: {0}")]
    InvalidPolicy(#[source] serde_json::Error),
}

pub type Result<T, E = FanoutError> = std::result::Result<T, E>;
