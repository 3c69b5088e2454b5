//! Conversation persistence endpoint, as seen by the core.
//!
//! The core only needs the backend once: to obtain a server-assigned id when
//! a conversation is created. Everything else about persistence belongs to
//! whoever drives the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::error::ChatError;
use crate::core::message::ConversationId;

/// A conversation as acknowledged by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConversation {
    pub id: ConversationId,
    pub title: String,
    pub selected_models: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn create_conversation(
        &self,
        title: &str,
        selected_models: &[String],
    ) -> Result<RemoteConversation, ChatError>;
}

/// Backend that is never reachable; every conversation is created locally.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOnly;

#[async_trait]
impl ConversationApi for LocalOnly {
    async fn create_conversation(
        &self,
        _title: &str,
        _selected_models: &[String],
    ) -> Result<RemoteConversation, ChatError> {
        Err(ChatError::transport("no conversation backend configured"))
    }
}
