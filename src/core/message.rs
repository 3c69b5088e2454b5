use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Allocate a fresh client-side identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(MessageId);
define_id!(ConversationId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// Lifecycle of a message body.
///
/// `Streaming` bodies only ever grow; `Completed` and `Error` are terminal
/// until a regenerate resets the node back to `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Streaming,
    #[default]
    Completed,
    Error,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Streaming => "streaming",
            MessageStatus::Completed => "completed",
            MessageStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::Error)
    }
}

/// Thumbs-up / thumbs-down feedback on an assistant reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Rating {
    Up,
    Down,
}

impl TryFrom<i8> for Rating {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Rating::Up),
            -1 => Ok(Rating::Down),
            _ => Err(format!("invalid rating: {value}")),
        }
    }
}

impl From<Rating> for i8 {
    fn from(value: Rating) -> Self {
        match value {
            Rating::Up => 1,
            Rating::Down => -1,
        }
    }
}

/// File descriptor attached to a user submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub size: u64,
    pub url: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, size: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            media_type: media_type.into(),
            size,
            url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub parent_id: Option<MessageId>,
    #[serde(default)]
    pub children_ids: Vec<MessageId>,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        conversation_id: ConversationId,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            parent_id: None,
            children_ids: Vec::new(),
            role,
            content: content.into(),
            status: MessageStatus::Completed,
            model: None,
            attachments: Vec::new(),
            rating: None,
            timestamp,
        }
    }

    /// A finished user submission.
    pub fn user(
        conversation_id: ConversationId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(conversation_id, Role::User, content, timestamp)
    }

    /// An empty assistant node awaiting its first chunk.
    pub fn assistant_placeholder(
        conversation_id: ConversationId,
        model: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut message = Self::new(conversation_id, Role::Assistant, String::new(), timestamp);
        message.status = MessageStatus::Streaming;
        message.model = model;
        message
    }

    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parent(mut self, parent_id: Option<MessageId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Merge a partial update into this record. Returns whether anything
    /// changed.
    pub fn apply_patch(&mut self, patch: MessagePatch) -> bool {
        let before = self.clone();
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(rating) = patch.rating {
            self.rating = rating;
        }
        if let Some(attachments) = patch.attachments {
            self.attachments = attachments;
        }
        if let Some(parent_id) = patch.parent_id {
            self.parent_id = parent_id;
        }
        if let Some(children_ids) = patch.children_ids {
            self.children_ids = children_ids;
        }
        *self != before
    }
}

/// Partial message update. `None` leaves a field untouched; nested options
/// let a caller clear optional fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub status: Option<MessageStatus>,
    pub model: Option<Option<String>>,
    pub rating: Option<Option<Rating>>,
    pub attachments: Option<Vec<Attachment>>,
    pub parent_id: Option<Option<MessageId>>,
    pub children_ids: Option<Vec<MessageId>>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn rating(rating: Option<Rating>) -> Self {
        Self {
            rating: Some(rating),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> ConversationId {
        ConversationId::new("c1")
    }

    #[test]
    fn invalid_role_strings_are_rejected() {
        assert!(Role::try_from("tool").is_err());
        assert_eq!(Role::try_from("system"), Ok(Role::System));
    }

    #[test]
    fn role_and_status_serialize_as_lowercase_strings() {
        let mut message = Message::user(conversation(), "hi", Utc::now()).with_id("m1");
        message.status = MessageStatus::Streaming;
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["role"], "user");
        assert_eq!(value["status"], "streaming");
        assert_eq!(value["id"], "m1");
        assert!(value.get("rating").is_none());
    }

    #[test]
    fn rating_uses_signed_wire_values() {
        assert_eq!(serde_json::to_string(&Rating::Down).unwrap(), "-1");
        let parsed: Rating = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, Rating::Up);
        assert!(serde_json::from_str::<Rating>("2").is_err());
    }

    #[test]
    fn attachment_media_type_maps_to_type_field() {
        let attachment = Attachment::new("notes.txt", "text/plain", 12);
        let value = serde_json::to_value(&attachment).unwrap();
        assert_eq!(value["type"], "text/plain");
        assert_eq!(value["size"], 12);
    }

    #[test]
    fn placeholder_starts_streaming_and_empty() {
        let placeholder =
            Message::assistant_placeholder(conversation(), Some("gpt-4".into()), Utc::now());
        assert_eq!(placeholder.status, MessageStatus::Streaming);
        assert!(placeholder.content.is_empty());
        assert_eq!(placeholder.model.as_deref(), Some("gpt-4"));
        assert!(placeholder.is_assistant());
    }

    #[test]
    fn apply_patch_reports_changes_only_when_fields_differ() {
        let mut message = Message::user(conversation(), "same", Utc::now());
        assert!(!message.apply_patch(MessagePatch::content("same")));
        assert!(message.apply_patch(MessagePatch::rating(Some(Rating::Up))));
        assert_eq!(message.rating, Some(Rating::Up));
        assert!(message.apply_patch(MessagePatch::rating(None)));
        assert_eq!(message.rating, None);
    }

    #[test]
    fn generated_ids_are_distinct_v4_uuids() {
        let first = MessageId::generate();
        let second = MessageId::generate();
        assert_ne!(first, second);
        let parsed = Uuid::parse_str(first.as_str()).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert!(Uuid::parse_str(ConversationId::generate().as_str()).is_ok());
    }

    #[test]
    fn terminal_statuses() {
        assert!(MessageStatus::Completed.is_terminal());
        assert!(MessageStatus::Error.is_terminal());
        assert!(!MessageStatus::Streaming.is_terminal());
        assert!(!MessageStatus::Pending.is_terminal());
    }
}
