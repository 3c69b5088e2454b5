//! Error types for conversation and generation operations.

use std::fmt;

use super::message::MessageId;

/// Errors surfaced by the conversation core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The submission was rejected before touching any state.
    Validation(String),
    /// An operation referenced a conversation or message that does not exist.
    NotFound { kind: &'static str, id: String },
    /// Network failure or a non-success response from the backend.
    Transport(String),
    /// A stream event could not be decoded.
    StreamProtocol(String),
    /// A generation is already in flight.
    SessionConflict { active: MessageId },
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        ChatError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ChatError::Transport(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ChatError::NotFound { .. })
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Validation(msg) => write!(f, "Invalid submission: {msg}"),
            ChatError::NotFound { kind, id } => write!(f, "{kind} '{id}' not found"),
            ChatError::Transport(msg) => write!(f, "{msg}"),
            ChatError::StreamProtocol(msg) => write!(f, "Malformed stream event: {msg}"),
            ChatError::SessionConflict { active } => {
                write!(f, "A response is already being generated ({active})")
            }
        }
    }
}

impl std::error::Error for ChatError {}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}
