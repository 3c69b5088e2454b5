//! HTTP backend: the generation event stream and conversation creation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{RequestBuilder, Response};
use tracing::debug;

use super::{parse_timestamp, ChatCreateRequest, ChatResponse, GenerateRequest};
use crate::core::chat_stream::{EventStream, GenerationTransport};
use crate::core::error::ChatError;
use crate::core::message::ConversationId;
use crate::core::remote::{ConversationApi, RemoteConversation};
use crate::utils::sse::decode_stream;
use crate::utils::url::versioned_endpoint;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub api_version: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Clone)]
pub struct HttpApiClient {
    client: reqwest::Client,
    settings: ClientSettings,
}

impl HttpApiClient {
    pub fn new(settings: ClientSettings) -> Result<Self, ChatError> {
        // Only the connect phase is bounded here; streams are bounded by the
        // idle timeout between events instead.
        let client = reqwest::Client::builder()
            .connect_timeout(settings.request_timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn endpoint(&self, path: &str) -> String {
        versioned_endpoint(&self.settings.base_url, &self.settings.api_version, path)
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match self.settings.token.as_deref() {
            Some(token) if !token.trim().is_empty() => request.bearer_auth(token),
            _ => request,
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    Err(ChatError::Transport(format_api_error(status.as_u16(), &body)))
}

#[async_trait]
impl GenerationTransport for HttpApiClient {
    async fn open_stream(&self, request: GenerateRequest) -> Result<EventStream, ChatError> {
        let url = self.endpoint("messages/generate");
        debug!(%url, chat_id = %request.chat_id, "opening generation stream");

        let response = self
            .with_auth(self.client.post(url))
            .header("Accept", "text/event-stream")
            .json(&request)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(decode_stream(response.bytes_stream()))
    }
}

#[async_trait]
impl ConversationApi for HttpApiClient {
    async fn create_conversation(
        &self,
        title: &str,
        selected_models: &[String],
    ) -> Result<RemoteConversation, ChatError> {
        let url = self.endpoint("chats");
        let body = ChatCreateRequest {
            title,
            selected_models,
        };

        let response = self
            .with_auth(self.client.post(url))
            .timeout(self.settings.request_timeout)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let chat: ChatResponse = response.json().await?;
        Ok(remote_from_response(chat, selected_models))
    }
}

fn remote_from_response(chat: ChatResponse, requested_models: &[String]) -> RemoteConversation {
    RemoteConversation {
        id: ConversationId::from(chat.id),
        title: chat.title,
        selected_models: chat
            .selected_models
            .filter(|models| !models.is_empty())
            .unwrap_or_else(|| requested_models.to_vec()),
        created_at: parse_timestamp(&chat.created_at).unwrap_or_else(Utc::now),
        updated_at: chat.updated_at.as_deref().and_then(parse_timestamp),
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .or_else(|| value.get("error").and_then(|v| v.as_str()))
        .or_else(|| value.get("detail").and_then(|v| v.as_str()))
        .or_else(|| value.get("message").and_then(|v| v.as_str()))?;

    let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// One-line description of a failed response, suitable for the error marker
/// written into the assistant message.
fn format_api_error(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {status}");
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&value) {
            return format!("HTTP {status}: {summary}");
        }
        return format!("HTTP {status}: {value}");
    }

    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("HTTP {status}: {collapsed}")
}
