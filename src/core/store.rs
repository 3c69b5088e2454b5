//! Authoritative conversation and message state.
//!
//! Every read and write of message data goes through [`MessageStore`]. Each
//! mutation bumps a revision counter and pushes a [`StoreEvent`] to every
//! subscriber, so presentation code can re-render from a consistent snapshot
//! without holding duplicates. Unknown ids are absorbed as no-ops; mutators
//! report whether anything changed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::conversation::{Conversation, ConversationPatch, DEFAULT_MODEL, DEFAULT_TITLE};
use super::message::{ConversationId, Message, MessageId, MessagePatch};
use super::tree::{self, History};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ConversationCreated(ConversationId),
    ConversationUpdated(ConversationId),
    ConversationDeleted(ConversationId),
    CurrentConversationChanged(Option<ConversationId>),
    MessageAdded(MessageId),
    MessageUpdated(MessageId),
    MessageRemoved(MessageId),
    /// A placeholder key was retired in favour of a server-assigned one.
    MessageRebound { from: MessageId, to: MessageId },
    Cleared,
}

/// Values given to conversations created without explicit settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationDefaults {
    pub title: String,
    pub models: Vec<String>,
}

impl Default for ConversationDefaults {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            models: vec![DEFAULT_MODEL.to_string()],
        }
    }
}

#[derive(Default)]
pub struct MessageStore {
    defaults: ConversationDefaults,
    conversations: HashMap<ConversationId, Conversation>,
    messages: History,
    // insertion order, used to break timestamp ties in display ordering
    sequence: HashMap<MessageId, u64>,
    next_sequence: u64,
    retired: HashMap<MessageId, MessageId>,
    current: Option<ConversationId>,
    revision: u64,
    subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: ConversationDefaults) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    pub fn defaults(&self) -> &ConversationDefaults {
        &self.defaults
    }

    /// Receive a [`StoreEvent`] for every subsequent mutation. Dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Monotonic counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn notify(&mut self, event: StoreEvent) {
        self.revision += 1;
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ---- conversations ----

    /// Allocate a local conversation and make it current.
    pub fn create_conversation(&mut self, title: Option<String>) -> ConversationId {
        let conversation = Conversation::new(
            ConversationId::generate(),
            title.unwrap_or_else(|| self.defaults.title.clone()),
            self.defaults.models.clone(),
            Utc::now(),
        );
        self.insert_conversation(conversation)
    }

    /// Register an already-built conversation (e.g. one acknowledged by the
    /// backend) and make it current.
    pub fn insert_conversation(&mut self, conversation: Conversation) -> ConversationId {
        let id = conversation.id.clone();
        self.conversations.insert(id.clone(), conversation);
        self.notify(StoreEvent::ConversationCreated(id.clone()));
        self.set_current_conversation(Some(id.clone()));
        id
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// All conversations, most recently updated first.
    pub fn conversations(&self) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self.conversations.values().collect();
        list.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    pub fn current_conversation(&self) -> Option<&ConversationId> {
        self.current.as_ref()
    }

    /// Select the current conversation. Unknown ids are refused.
    pub fn set_current_conversation(&mut self, id: Option<ConversationId>) -> bool {
        if let Some(id) = &id {
            if !self.conversations.contains_key(id) {
                debug!(conversation = %id, "set_current_conversation: unknown id");
                return false;
            }
        }
        if self.current == id {
            return true;
        }
        self.current = id.clone();
        self.notify(StoreEvent::CurrentConversationChanged(id));
        true
    }

    pub fn update_conversation(&mut self, id: &ConversationId, patch: ConversationPatch) -> bool {
        let Some(conversation) = self.conversations.get_mut(id) else {
            debug!(conversation = %id, "update_conversation: unknown id");
            return false;
        };
        conversation.apply_patch(patch, Utc::now());
        self.notify(StoreEvent::ConversationUpdated(id.clone()));
        true
    }

    pub fn toggle_model(&mut self, id: &ConversationId, model: &str) -> bool {
        let Some(conversation) = self.conversations.get_mut(id) else {
            return false;
        };
        if !conversation.toggle_model(model) {
            return false;
        }
        conversation.updated_at = Utc::now();
        self.notify(StoreEvent::ConversationUpdated(id.clone()));
        true
    }

    /// Remove a conversation and every message it owns.
    pub fn delete_conversation(&mut self, id: &ConversationId) -> bool {
        if self.conversations.remove(id).is_none() {
            debug!(conversation = %id, "delete_conversation: unknown id");
            return false;
        }

        let doomed: Vec<MessageId> = self
            .messages
            .values()
            .filter(|m| &m.conversation_id == id)
            .map(|m| m.id.clone())
            .collect();
        for message_id in &doomed {
            self.messages.remove(message_id);
            self.sequence.remove(message_id);
        }
        let messages = &self.messages;
        self.retired.retain(|_, to| messages.contains_key(to));

        self.notify(StoreEvent::ConversationDeleted(id.clone()));
        if self.current.as_ref() == Some(id) {
            self.current = None;
            self.notify(StoreEvent::CurrentConversationChanged(None));
        }
        true
    }

    /// Drop every conversation and message.
    pub fn clear_history(&mut self) {
        self.conversations.clear();
        self.messages.clear();
        self.sequence.clear();
        self.retired.clear();
        self.current = None;
        self.notify(StoreEvent::Cleared);
    }

    // ---- messages ----

    /// Insert `message` under its id, replacing any existing record
    /// (last write wins).
    pub fn add_message(&mut self, message: Message) {
        let id = message.id.clone();
        let replaced = self.messages.insert(id.clone(), message).is_some();
        if replaced {
            self.notify(StoreEvent::MessageUpdated(id));
        } else {
            self.sequence.insert(id.clone(), self.next_sequence);
            self.next_sequence += 1;
            self.notify(StoreEvent::MessageAdded(id));
        }
    }

    pub fn update_message(&mut self, id: &MessageId, patch: MessagePatch) -> bool {
        let Some(message) = self.messages.get_mut(id) else {
            debug!(message = %id, "update_message: unknown id");
            return false;
        };
        if message.apply_patch(patch) {
            self.notify(StoreEvent::MessageUpdated(id.clone()));
        }
        true
    }

    /// Append streamed text to a message body.
    pub fn append_content(&mut self, id: &MessageId, chunk: &str) -> bool {
        let Some(message) = self.messages.get_mut(id) else {
            return false;
        };
        if chunk.is_empty() {
            return true;
        }
        message.content.push_str(chunk);
        self.notify(StoreEvent::MessageUpdated(id.clone()));
        true
    }

    /// Remove the record only. Callers repair the tree through
    /// [`MessageStore::apply_history`] with [`tree::delete_node`].
    pub fn delete_message(&mut self, id: &MessageId) -> bool {
        if self.messages.remove(id).is_none() {
            return false;
        }
        self.sequence.remove(id);
        self.notify(StoreEvent::MessageRemoved(id.clone()));
        true
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Follow retired placeholder ids to the key the record lives under now.
    pub fn resolve_id(&self, id: &MessageId) -> Option<MessageId> {
        let mut current = id;
        for _ in 0..=self.retired.len() {
            if self.messages.contains_key(current) {
                return Some(current.clone());
            }
            current = self.retired.get(current)?;
        }
        None
    }

    /// Messages of a conversation in display order: timestamp, then
    /// insertion order.
    pub fn list_messages(&self, conversation_id: &ConversationId) -> Vec<&Message> {
        let mut list: Vec<&Message> = self
            .messages
            .values()
            .filter(|m| &m.conversation_id == conversation_id)
            .collect();
        list.sort_by_key(|m| (m.timestamp, self.sequence.get(&m.id).copied().unwrap_or(u64::MAX)));
        list
    }

    pub fn latest_message(&self, conversation_id: &ConversationId) -> Option<&Message> {
        self.list_messages(conversation_id).last().copied()
    }

    /// A timestamp no earlier than the newest message of the conversation.
    pub fn next_timestamp(&self, conversation_id: &ConversationId) -> DateTime<Utc> {
        let now = Utc::now();
        self.messages
            .values()
            .filter(|m| &m.conversation_id == conversation_id)
            .map(|m| m.timestamp)
            .max()
            .map_or(now, |latest| latest.max(now))
    }

    /// Copy of one conversation's messages for the tree operations.
    pub fn history(&self, conversation_id: &ConversationId) -> History {
        self.messages
            .iter()
            .filter(|(_, m)| &m.conversation_id == conversation_id)
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect()
    }

    /// Replace one conversation's messages with `next`, emitting an event
    /// for every record that was added, changed or removed.
    pub fn apply_history(&mut self, conversation_id: &ConversationId, next: History) {
        let previous = self.history(conversation_id);

        for id in previous.keys() {
            if !next.contains_key(id) {
                self.delete_message(id);
            }
        }

        // Parents before children, so records sharing a timestamp keep their
        // tree order in `list_messages`.
        let mut incoming: Vec<(usize, MessageId, Message)> = next
            .iter()
            .map(|(id, m)| (tree::find_ancestors(&next, id).len(), id.clone(), m.clone()))
            .collect();
        incoming.sort_by(|a, b| {
            (a.2.timestamp, a.0, &a.1).cmp(&(b.2.timestamp, b.0, &b.1))
        });

        for (_, id, message) in incoming {
            if &message.conversation_id != conversation_id || message.id != id {
                warn!(message = %id, "apply_history: skipping foreign or mis-keyed record");
                continue;
            }
            match previous.get(&id) {
                Some(old) if *old == message => {}
                _ => self.add_message(message),
            }
        }
    }

    /// Move the record at `from` to key `to`.
    ///
    /// The parent's child entry and the children's parent links follow the
    /// record, and `from` is remembered as retired so [`Self::resolve_id`]
    /// can forward stale references. A different record already living at
    /// `to` is collapsed out of the tree first.
    pub fn rebind_message(&mut self, from: &MessageId, to: MessageId) -> bool {
        if from == &to || !self.messages.contains_key(from) {
            return false;
        }

        if self.messages.contains_key(&to) {
            warn!(from = %from, to = %to, "rebind target already exists; replacing it");
            self.messages = tree::delete_node(&self.messages, &to);
            self.sequence.remove(&to);
        }

        let Some(mut record) = self.messages.remove(from) else {
            return false;
        };
        record.id = to.clone();

        if let Some(parent) = record
            .parent_id
            .as_ref()
            .and_then(|pid| self.messages.get_mut(pid))
        {
            for child in parent.children_ids.iter_mut() {
                if child == from {
                    *child = to.clone();
                }
            }
        }
        for child_id in &record.children_ids {
            if let Some(child) = self.messages.get_mut(child_id) {
                child.parent_id = Some(to.clone());
            }
        }

        if let Some(seq) = self.sequence.remove(from) {
            self.sequence.insert(to.clone(), seq);
        }
        for target in self.retired.values_mut() {
            if target == from {
                *target = to.clone();
            }
        }
        self.retired.insert(from.clone(), to.clone());
        self.messages.insert(to.clone(), record);

        self.notify(StoreEvent::MessageRebound {
            from: from.clone(),
            to,
        });
        true
    }
}
