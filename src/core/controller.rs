//! The façade presentation code talks to.
//!
//! [`ConversationController`] owns the [`MessageStore`] and the
//! [`GenerationController`], so every operation sees one consistent state
//! and store mutations stay on the caller's task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::chat_stream::GenerationTransport;
use super::conversation::{derive_title, Conversation, ConversationPatch, TITLE_MAX_CHARS};
use super::error::ChatError;
use super::generation::{GenerationController, SendReceipt, SessionState};
use super::message::{Attachment, ConversationId, Message, MessageId, MessagePatch, Rating};
use super::remote::ConversationApi;
use super::store::{ConversationDefaults, MessageStore, StoreEvent};
use super::tree;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub defaults: ConversationDefaults,
    pub title_max_chars: usize,
    pub idle_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            defaults: ConversationDefaults::default(),
            title_max_chars: TITLE_MAX_CHARS,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ConversationController {
    store: MessageStore,
    generation: GenerationController,
    remote: Arc<dyn ConversationApi>,
    title_max_chars: usize,
}

impl ConversationController {
    pub fn new(
        transport: Arc<dyn GenerationTransport>,
        remote: Arc<dyn ConversationApi>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            store: MessageStore::with_defaults(settings.defaults),
            generation: GenerationController::new(transport, settings.idle_timeout),
            remote,
            title_max_chars: settings.title_max_chars,
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn is_generating(&self) -> bool {
        self.generation.is_generating()
    }

    pub fn generation_state(&self) -> SessionState {
        self.generation.state()
    }

    /// Current key of the message being generated, if any.
    pub fn active_message(&self) -> Option<&MessageId> {
        self.generation.active_message()
    }

    // ---- conversations ----

    /// Create a conversation through the backend, or locally when the backend
    /// cannot be reached. The new conversation becomes current.
    pub async fn create_conversation(&mut self, title: Option<String>) -> ConversationId {
        let defaults = self.store.defaults().clone();
        let title = title.unwrap_or(defaults.title);

        match self.remote.create_conversation(&title, &defaults.models).await {
            Ok(remote) => {
                debug!(conversation = %remote.id, "conversation created remotely");
                let mut conversation =
                    Conversation::new(remote.id, remote.title, remote.selected_models, remote.created_at);
                if let Some(updated_at) = remote.updated_at {
                    conversation.updated_at = updated_at;
                }
                self.store.insert_conversation(conversation)
            }
            Err(err) => {
                warn!(error = %err, "remote conversation create failed; using a local id");
                self.store.create_conversation(Some(title))
            }
        }
    }

    pub fn current_conversation(&self) -> Option<&ConversationId> {
        self.store.current_conversation()
    }

    pub fn select_conversation(&mut self, id: &ConversationId) -> Result<(), ChatError> {
        if self.store.set_current_conversation(Some(id.clone())) {
            Ok(())
        } else {
            Err(ChatError::not_found("conversation", id))
        }
    }

    pub fn update_conversation(
        &mut self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<(), ChatError> {
        if self.store.update_conversation(id, patch) {
            Ok(())
        } else {
            Err(ChatError::not_found("conversation", id))
        }
    }

    /// Toggle a model in the current conversation's selection. The last
    /// selected model cannot be removed.
    pub fn toggle_model(&mut self, model: &str) -> bool {
        match self.store.current_conversation().cloned() {
            Some(id) => self.store.toggle_model(&id, model),
            None => false,
        }
    }

    /// Delete a conversation with all its messages, stopping its generation
    /// first.
    pub fn delete_conversation(&mut self, id: &ConversationId) -> bool {
        if self.generation.active_conversation() == Some(id) {
            self.generation.cancel(&mut self.store);
        }
        self.store.delete_conversation(id)
    }

    pub fn clear_history(&mut self) {
        self.generation.cancel(&mut self.store);
        self.store.clear_history();
    }

    // ---- messages ----

    /// Send a user message in the current conversation, creating one first
    /// if none is selected.
    pub async fn send_message(
        &mut self,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<SendReceipt, ChatError> {
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(ChatError::validation("message is empty"));
        }
        if let Some(active) = self.generation.active_message() {
            return Err(ChatError::SessionConflict {
                active: active.clone(),
            });
        }

        let conversation_id = match self.store.current_conversation() {
            Some(id) => id.clone(),
            None => self.create_conversation(None).await,
        };
        let first_user_message = !self
            .store
            .list_messages(&conversation_id)
            .iter()
            .any(|m| m.is_user());

        let receipt =
            self.generation
                .start_send(&mut self.store, &conversation_id, content, attachments)?;

        if first_user_message && !content.trim().is_empty() {
            self.derive_title(&conversation_id, content);
        }
        Ok(receipt)
    }

    fn derive_title(&mut self, conversation_id: &ConversationId, content: &str) {
        let default_title = self.store.defaults().title.clone();
        let keeps_default = self
            .store
            .conversation(conversation_id)
            .is_some_and(|c| c.has_default_title(&default_title));
        if keeps_default {
            let title = derive_title(content, self.title_max_chars);
            self.store
                .update_conversation(conversation_id, ConversationPatch::title(title));
        }
    }

    /// Regenerate an assistant message. `Ok(None)` means there was nothing
    /// to regenerate.
    pub fn regenerate(&mut self, assistant_id: &MessageId) -> Result<Option<MessageId>, ChatError> {
        self.generation.start_regenerate(&mut self.store, assistant_id)
    }

    /// Edit a message; editing a user message that has a response also
    /// regenerates that response.
    pub fn edit(&mut self, message_id: &MessageId, content: &str) -> Result<Option<MessageId>, ChatError> {
        self.generation.start_edit(&mut self.store, message_id, content)
    }

    /// Apply `rating` to an assistant message, or clear it when the message
    /// already carries that rating. Returns the resulting rating.
    pub fn rate_message(
        &mut self,
        message_id: &MessageId,
        rating: Rating,
    ) -> Result<Option<Rating>, ChatError> {
        let id = self.resolve(message_id)?;
        let Some(message) = self.store.message(&id) else {
            return Err(ChatError::not_found("message", message_id));
        };
        if !message.is_assistant() {
            return Err(ChatError::validation("only assistant messages can be rated"));
        }

        let next = (message.rating != Some(rating)).then_some(rating);
        self.store.update_message(&id, MessagePatch::rating(next));
        Ok(next)
    }

    /// Delete a message, handing its children to its parent.
    pub fn delete_message(&mut self, message_id: &MessageId) -> Result<(), ChatError> {
        let id = self.resolve(message_id)?;
        if self.generation.active_message() == Some(&id) {
            return Err(ChatError::SessionConflict { active: id });
        }
        let Some(conversation_id) = self.store.message(&id).map(|m| m.conversation_id.clone())
        else {
            return Err(ChatError::not_found("message", message_id));
        };

        let next = tree::delete_node(&self.store.history(&conversation_id), &id);
        self.store.apply_history(&conversation_id, next);
        Ok(())
    }

    pub fn cancel_generation(&mut self) -> bool {
        self.generation.cancel(&mut self.store)
    }

    fn resolve(&self, message_id: &MessageId) -> Result<MessageId, ChatError> {
        self.store
            .resolve_id(message_id)
            .ok_or_else(|| ChatError::not_found("message", message_id))
    }

    pub fn message(&self, message_id: &MessageId) -> Option<&Message> {
        self.store
            .resolve_id(message_id)
            .and_then(|id| self.store.message(&id))
    }

    /// Messages in display order.
    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<&Message> {
        self.store.list_messages(conversation_id)
    }

    /// The conversation linearized along the first branch at every fork.
    pub fn default_path(&self, conversation_id: &ConversationId) -> Vec<Message> {
        tree::traverse_default_path(&self.store.history(conversation_id), None)
    }

    // ---- stream plumbing ----

    /// Wait for and apply the next stream update. Returns `false` when idle.
    pub async fn pump(&mut self) -> bool {
        self.generation.pump(&mut self.store).await
    }

    pub fn drain(&mut self) {
        self.generation.drain(&mut self.store);
    }

    pub async fn wait_for_idle(&mut self) -> SessionState {
        self.generation.wait_for_idle(&mut self.store).await
    }
}
