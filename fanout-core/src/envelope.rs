//! Notification envelope wrapped around messages delivered through a topic

use serde::{Deserialize, Serialize};

const NOTIFICATION_TYPE: &str = "Notification";

/// Envelope stored as the queue message body when a topic delivers into a
/// queue. Only `Message` is required when reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    #[serde(rename = "Type", default = "notification_type")]
    pub kind: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub topic_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
}

fn notification_type() -> String {
    NOTIFICATION_TYPE.to_string()
}

impl Notification {
    pub fn new(
        message_id: impl Into<String>,
        topic_arn: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: notification_type(),
            message_id: message_id.into(),
            topic_arn: topic_arn.into(),
            subject: None,
            message: message.into(),
            timestamp: chrono::Utc::now()
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string(),
        }
    }

    pub fn to_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_body(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_preserves_payload() {
        let payload = "line one\nline \"two\" \u{1F600} {\"nested\": true}";
        let body = Notification::new("id-1", "arn:aws:sns:us-east-1:000000000000:t", payload)
            .to_body()
            .unwrap();

        let decoded = Notification::from_body(&body).unwrap();
        assert_eq!(decoded.message, payload);
        assert_eq!(decoded.kind, "Notification");
        assert_eq!(decoded.message_id, "id-1");
    }

    #[test]
    fn test_minimal_envelope() {
        let decoded = Notification::from_body(r#"{"Message":"hello"}"#).unwrap();
        assert_eq!(decoded.message, "hello");
        assert!(decoded.topic_arn.is_empty());
    }

    #[test]
    fn test_rejects_body_without_message() {
        assert!(Notification::from_body("plain text").is_err());
        assert!(Notification::from_body(r#"{"Type":"Notification"}"#).is_err());
    }
}
