//! Queue wire format: an SNS-style envelope whose `Message` string holds the
//! event JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Outer notification wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "MessageId")]
    pub message_id: String,
    /// Serialized [`ChainEvent`].
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl NotificationEnvelope {
    /// Wrap `event` the way the publisher does.
    pub fn wrap(message_id: impl Into<String>, event: &ChainEvent) -> Result<Self, QueueError> {
        Ok(Self {
            kind: "Notification".into(),
            message_id: message_id.into(),
            message: serde_json::to_string(event)?,
            timestamp: Some(Utc::now()),
        })
    }
}

/// A published chain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEvent {
    pub id: String,
    pub chain_id: u64,
    pub emitter_address: String,
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Opaque payload, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// Two-level decode: envelope first, then the event inside it.
pub fn decode_message(body: &str) -> Result<ChainEvent, QueueError> {
    let envelope: NotificationEnvelope = serde_json::from_str(body)?;
    Ok(serde_json::from_str(&envelope.message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_nested_event() {
        let body = r#"{
            "Type": "Notification",
            "MessageId": "m-1",
            "Message": "{\"id\":\"2/0001/7\",\"chainId\":2,\"emitterAddress\":\"0001\",\"sequence\":7,\"txHash\":\"0xabc\",\"timestamp\":\"2024-05-01T10:00:00Z\"}",
            "Timestamp": "2024-05-01T10:00:01Z"
        }"#;
        let event = decode_message(body).unwrap();
        assert_eq!(event.id, "2/0001/7");
        assert_eq!(event.chain_id, 2);
        assert_eq!(event.sequence, 7);
        assert_eq!(event.tx_hash.as_deref(), Some("0xabc"));
        assert!(event.timestamp.is_some());
        assert!(event.payload.is_none());
    }

    #[test]
    fn rejects_bad_outer_and_inner_json() {
        assert!(matches!(decode_message("nope"), Err(QueueError::Decode(_))));
        let body = r#"{"Type":"Notification","MessageId":"m","Message":"{\"id\":1}"}"#;
        assert!(matches!(decode_message(body), Err(QueueError::Decode(_))));
    }
}
