use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::message::{Attachment, ConversationId, MessageId, Role};

pub mod client;

/// Body of `POST /messages/generate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub chat_id: ConversationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
    pub content: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Attachment>,
}

/// One `data:` payload of the generation event stream.
#[derive(Debug, Deserialize)]
pub struct StreamPayload {
    pub chunk: Option<String>,
    #[serde(default)]
    pub done: bool,
    pub error: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatCreateRequest<'a> {
    pub title: &'a str,
    pub selected_models: &'a [String],
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selected_models: Option<Vec<String>>,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Parse a backend timestamp. Naive timestamps are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn generate_request_omits_empty_optionals() {
        let request = GenerateRequest {
            chat_id: ConversationId::new("c1"),
            parent_id: None,
            content: "Hello".into(),
            role: Role::User,
            model: None,
            files: Vec::new(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"chat_id": "c1", "content": "Hello", "role": "user"})
        );
    }

    #[test]
    fn stream_payload_variants_deserialize() {
        let chunk: StreamPayload =
            serde_json::from_str(r#"{"chunk":"Hi","message_id":"m1"}"#).unwrap();
        assert_eq!(chunk.chunk.as_deref(), Some("Hi"));
        assert!(!chunk.done);

        let done: StreamPayload =
            serde_json::from_str(r#"{"done":true,"message_id":"m1"}"#).unwrap();
        assert!(done.done);

        let error: StreamPayload = serde_json::from_str(r#"{"error":"boom"}"#).unwrap();
        assert_eq!(error.error.as_deref(), Some("boom"));
        assert!(error.message_id.is_none());
    }

    #[test]
    fn parse_timestamp_accepts_offset_and_naive_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T12:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T14:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T12:30:00.000000"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
