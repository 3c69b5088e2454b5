//! One in-flight generation at a time.
//!
//! [`GenerationController`] owns the stream service and the bookkeeping of
//! the active session. Entry points create or reset the target assistant
//! node synchronously and spawn the transport read loop; the caller then
//! feeds every `(StreamMessage, stream_id)` back through
//! [`GenerationController::handle_stream_message`] (or lets
//! [`GenerationController::pump`] do it), which is the only place stream
//! output touches the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::chat_stream::{ChatStreamService, GenerationTransport, StreamMessage, StreamParams};
use super::error::ChatError;
use super::message::{
    Attachment, ConversationId, Message, MessageId, MessagePatch, MessageStatus, Role,
};
use super::store::MessageStore;
use super::tree;
use crate::api::GenerateRequest;

pub const ERROR_MARKER_PREFIX: &str = "Error: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingFirstChunk,
    Streaming,
    Completed,
    Errored,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::AwaitingFirstChunk | SessionState::Streaming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Send,
    Regenerate,
    Edit,
}

/// Ids created by a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub user_id: MessageId,
    pub assistant_id: MessageId,
}

struct ActiveSession {
    stream_id: u64,
    conversation_id: ConversationId,
    // latest key of the target node; changes when the server assigns an id
    current_id: MessageId,
    mode: SessionMode,
    state: SessionState,
    cancel_token: CancellationToken,
}

pub struct GenerationController {
    transport: Arc<dyn GenerationTransport>,
    service: ChatStreamService,
    rx: mpsc::UnboundedReceiver<(StreamMessage, u64)>,
    session: Option<ActiveSession>,
    last_state: SessionState,
    last_stream_id: u64,
    idle_timeout: Duration,
}

impl GenerationController {
    pub fn new(transport: Arc<dyn GenerationTransport>, idle_timeout: Duration) -> Self {
        let (service, rx) = ChatStreamService::new();
        Self {
            transport,
            service,
            rx,
            session: None,
            last_state: SessionState::Idle,
            last_stream_id: 0,
            idle_timeout,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.session.is_some()
    }

    /// State of the active session, or the terminal state of the last one.
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(self.last_state, |session| session.state)
    }

    pub fn mode(&self) -> Option<SessionMode> {
        self.session.as_ref().map(|session| session.mode)
    }

    /// Current key of the message being generated.
    pub fn active_message(&self) -> Option<&MessageId> {
        self.session.as_ref().map(|session| &session.current_id)
    }

    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.session.as_ref().map(|session| &session.conversation_id)
    }

    fn ensure_idle(&self) -> Result<(), ChatError> {
        match &self.session {
            Some(session) => {
                debug!(active = %session.current_id, "rejecting new session while generating");
                Err(ChatError::SessionConflict {
                    active: session.current_id.clone(),
                })
            }
            None => Ok(()),
        }
    }

    /// Append a user message after the conversation's latest message, add an
    /// empty assistant placeholder under it and start streaming into it.
    pub fn start_send(
        &mut self,
        store: &mut MessageStore,
        conversation_id: &ConversationId,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<SendReceipt, ChatError> {
        self.ensure_idle()?;
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(ChatError::validation("message is empty"));
        }
        let model = store
            .conversation(conversation_id)
            .ok_or_else(|| ChatError::not_found("conversation", conversation_id))?
            .primary_model()
            .to_string();

        let parent_id = store.latest_message(conversation_id).map(|m| m.id.clone());
        let timestamp = store.next_timestamp(conversation_id);
        let user = Message::user(conversation_id.clone(), content, timestamp)
            .with_attachments(attachments.clone());
        let placeholder =
            Message::assistant_placeholder(conversation_id.clone(), Some(model.clone()), timestamp);
        let receipt = SendReceipt {
            user_id: user.id.clone(),
            assistant_id: placeholder.id.clone(),
        };

        let history = tree::insert_node(&store.history(conversation_id), user, parent_id.as_ref());
        let history = tree::insert_node(&history, placeholder, Some(&receipt.user_id));
        store.apply_history(conversation_id, history);

        let request = GenerateRequest {
            chat_id: conversation_id.clone(),
            parent_id,
            content: content.to_string(),
            role: Role::User,
            model: Some(model),
            files: attachments,
        };
        self.begin(
            conversation_id.clone(),
            receipt.assistant_id.clone(),
            SessionMode::Send,
            request,
        );
        Ok(receipt)
    }

    /// Reset an assistant message and regenerate it from its prompting user
    /// message. Returns `Ok(None)` without touching anything when the
    /// message is unknown, not an assistant message, or has no user parent.
    pub fn start_regenerate(
        &mut self,
        store: &mut MessageStore,
        assistant_id: &MessageId,
    ) -> Result<Option<MessageId>, ChatError> {
        self.ensure_idle()?;
        Ok(self.reset_and_resubmit(store, assistant_id, SessionMode::Regenerate))
    }

    /// Replace a message's content, empty content included. A user message
    /// with a responding assistant child also regenerates that child from
    /// the new content; its current id is returned.
    pub fn start_edit(
        &mut self,
        store: &mut MessageStore,
        message_id: &MessageId,
        content: &str,
    ) -> Result<Option<MessageId>, ChatError> {
        let id = store
            .resolve_id(message_id)
            .ok_or_else(|| ChatError::not_found("message", message_id))?;
        let Some(message) = store.message(&id) else {
            return Err(ChatError::not_found("message", message_id));
        };
        if self.active_message() == Some(&id) {
            return Err(ChatError::SessionConflict { active: id });
        }

        let responder = message
            .is_user()
            .then(|| message.children_ids.first())
            .flatten()
            .filter(|child| store.message(child).is_some_and(Message::is_assistant))
            .cloned();
        if responder.is_some() {
            self.ensure_idle()?;
        }

        store.update_message(&id, MessagePatch::content(content));
        Ok(responder.and_then(|child| self.reset_and_resubmit(store, &child, SessionMode::Edit)))
    }

    fn reset_and_resubmit(
        &mut self,
        store: &mut MessageStore,
        assistant_id: &MessageId,
        mode: SessionMode,
    ) -> Option<MessageId> {
        let id = store.resolve_id(assistant_id)?;
        let assistant = store.message(&id).filter(|m| m.is_assistant())?;
        let prompt = assistant
            .parent_id
            .as_ref()
            .and_then(|pid| store.message(pid))
            .filter(|parent| parent.is_user())?;

        let conversation_id = assistant.conversation_id.clone();
        let model = store
            .conversation(&conversation_id)
            .map(|c| c.primary_model().to_string())
            .or_else(|| assistant.model.clone());
        let request = GenerateRequest {
            chat_id: conversation_id.clone(),
            parent_id: prompt.parent_id.clone(),
            content: prompt.content.clone(),
            role: Role::User,
            model: model.clone(),
            files: prompt.attachments.clone(),
        };

        store.update_message(
            &id,
            MessagePatch {
                content: Some(String::new()),
                status: Some(MessageStatus::Streaming),
                model: Some(model),
                rating: Some(None),
                ..MessagePatch::default()
            },
        );
        self.begin(conversation_id, id.clone(), mode, request);
        Some(id)
    }

    fn begin(
        &mut self,
        conversation_id: ConversationId,
        target: MessageId,
        mode: SessionMode,
        request: GenerateRequest,
    ) {
        self.last_stream_id += 1;
        let stream_id = self.last_stream_id;
        let cancel_token = CancellationToken::new();

        debug!(stream_id, message = %target, ?mode, "starting generation");
        self.session = Some(ActiveSession {
            stream_id,
            conversation_id,
            current_id: target,
            mode,
            state: SessionState::AwaitingFirstChunk,
            cancel_token: cancel_token.clone(),
        });

        self.service.spawn_stream(StreamParams {
            transport: Arc::clone(&self.transport),
            request,
            cancel_token,
            stream_id,
            idle_timeout: self.idle_timeout,
        });
    }

    fn is_current_stream(&self, stream_id: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.stream_id == stream_id)
    }

    /// Apply one message from the stream service. Messages of any stream
    /// other than the active one are dropped.
    pub fn handle_stream_message(
        &mut self,
        store: &mut MessageStore,
        message: StreamMessage,
        stream_id: u64,
    ) {
        if !self.is_current_stream(stream_id) {
            debug!(stream_id, "dropping message from stale stream");
            return;
        }

        match message {
            StreamMessage::Chunk {
                content,
                message_id,
            } => {
                self.follow_server_id(store, message_id);
                if let Some(session) = self.session.as_mut() {
                    session.state = SessionState::Streaming;
                    store.append_content(&session.current_id, &content);
                }
            }
            StreamMessage::Done { message_id } => {
                self.follow_server_id(store, message_id);
                self.finish(store, MessageStatus::Completed, None);
            }
            StreamMessage::Error(error) => {
                self.finish(store, MessageStatus::Error, Some(error));
            }
            StreamMessage::End => {
                self.finish(
                    store,
                    MessageStatus::Error,
                    Some("Connection closed before the response completed".to_string()),
                );
            }
        }
    }

    fn follow_server_id(&mut self, store: &mut MessageStore, message_id: Option<MessageId>) {
        let (Some(session), Some(server_id)) = (self.session.as_mut(), message_id) else {
            return;
        };
        if session.current_id == server_id {
            return;
        }
        if store.rebind_message(&session.current_id, server_id.clone()) {
            debug!(from = %session.current_id, to = %server_id, "rebound placeholder to server id");
            session.current_id = server_id;
        }
    }

    fn finish(&mut self, store: &mut MessageStore, status: MessageStatus, error: Option<String>) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.cancel_token.cancel();

        let patch = match error {
            Some(error) => {
                warn!(message = %session.current_id, %error, "generation failed");
                MessagePatch::content(format!("{ERROR_MARKER_PREFIX}{error}")).with_status(status)
            }
            None => MessagePatch::status(status),
        };
        store.update_message(&session.current_id, patch);

        self.last_state = if status == MessageStatus::Error {
            SessionState::Errored
        } else {
            SessionState::Completed
        };
        debug!(stream_id = session.stream_id, state = ?self.last_state, "generation finished");
    }

    /// Stop the active generation. The target keeps the content received so
    /// far and stays `Streaming`, since no terminal signal arrived for it.
    /// Later messages from the aborted stream are dropped.
    pub fn cancel(&mut self, store: &mut MessageStore) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        session.cancel_token.cancel();
        self.last_state = SessionState::Idle;
        debug!(
            stream_id = session.stream_id,
            message = %session.current_id,
            partial = store.message(&session.current_id).map_or(0, |m| m.content.len()),
            "generation cancelled"
        );
        true
    }

    /// Wait for the next stream message and apply it. Returns `false` when
    /// nothing is generating.
    pub async fn pump(&mut self, store: &mut MessageStore) -> bool {
        if self.session.is_none() {
            return false;
        }
        match self.rx.recv().await {
            Some((message, stream_id)) => {
                self.handle_stream_message(store, message, stream_id);
                true
            }
            None => false,
        }
    }

    /// Apply every stream message that has already arrived.
    pub fn drain(&mut self, store: &mut MessageStore) {
        while let Ok((message, stream_id)) = self.rx.try_recv() {
            self.handle_stream_message(store, message, stream_id);
        }
    }

    pub async fn wait_for_idle(&mut self, store: &mut MessageStore) -> SessionState {
        while self.pump(store).await {}
        self.state()
    }

    #[cfg(test)]
    fn inject(&self, message: StreamMessage, stream_id: u64) {
        self.service.send_for_test(message, stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Rating;
    use crate::utils::test_utils::{chunk, done, ScriptedTransport};
    use crate::core::chat_stream::StreamEvent;

    fn setup(transport: ScriptedTransport) -> (GenerationController, MessageStore, ConversationId, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let controller = GenerationController::new(transport.clone(), Duration::from_secs(30));
        let mut store = MessageStore::new();
        let conv = store.create_conversation(None);
        (controller, store, conv, transport)
    }

    /// A completed user -> assistant turn, without going through a stream.
    fn seed_turn(store: &mut MessageStore, conv: &ConversationId, prompt: &str, reply: &str) -> (MessageId, MessageId) {
        let ts = store.next_timestamp(conv);
        let parent = store.latest_message(conv).map(|m| m.id.clone());
        let user = Message::user(conv.clone(), prompt, ts);
        let mut assistant = Message::assistant_placeholder(conv.clone(), Some("gpt-4".into()), ts);
        assistant.content = reply.into();
        assistant.status = MessageStatus::Completed;
        let ids = (user.id.clone(), assistant.id.clone());
        let history = tree::insert_node(&store.history(conv), user, parent.as_ref());
        let history = tree::insert_node(&history, assistant, Some(&ids.0));
        store.apply_history(conv, history);
        ids
    }

    #[tokio::test]
    async fn send_creates_user_and_placeholder_then_streams() {
        let (mut engine, mut store, conv, transport) = setup(ScriptedTransport::new(vec![
            Ok(chunk("Hi", "srv-a")),
            Ok(chunk(" there", "srv-a")),
            Ok(done("srv-a")),
        ]));

        let receipt = engine.start_send(&mut store, &conv, "Hello", Vec::new()).unwrap();
        assert_eq!(engine.state(), SessionState::AwaitingFirstChunk);

        let user = store.message(&receipt.user_id).unwrap();
        assert_eq!(user.content, "Hello");
        assert_eq!(user.parent_id, None);
        let placeholder = store.message(&receipt.assistant_id).unwrap();
        assert_eq!(placeholder.parent_id.as_ref(), Some(&receipt.user_id));
        assert_eq!(placeholder.status, MessageStatus::Streaming);
        assert_eq!(placeholder.content, "");

        assert_eq!(engine.wait_for_idle(&mut store).await, SessionState::Completed);
        assert!(!engine.is_generating());

        let server_id = MessageId::new("srv-a");
        let reply = store.message(&server_id).unwrap();
        assert_eq!(reply.content, "Hi there");
        assert_eq!(reply.status, MessageStatus::Completed);
        assert!(store.message(&receipt.assistant_id).is_none());
        assert_eq!(store.resolve_id(&receipt.assistant_id), Some(server_id.clone()));
        assert_eq!(
            store.message(&receipt.user_id).unwrap().children_ids,
            vec![server_id]
        );

        let request = &transport.requests()[0];
        assert_eq!(request.content, "Hello");
        assert_eq!(request.parent_id, None);
        assert_eq!(request.model.as_deref(), Some("gpt-4"));
        assert!(tree::is_consistent(&store.history(&conv)));
    }

    #[tokio::test]
    async fn second_send_links_after_latest_message() {
        let (mut engine, mut store, conv, transport) =
            setup(ScriptedTransport::new(vec![Ok(done("srv-2"))]));
        let (_, first_reply) = seed_turn(&mut store, &conv, "one", "uno");

        let receipt = engine.start_send(&mut store, &conv, "two", Vec::new()).unwrap();
        assert_eq!(
            store.message(&receipt.user_id).unwrap().parent_id,
            Some(first_reply.clone())
        );
        engine.wait_for_idle(&mut store).await;
        assert_eq!(transport.requests()[0].parent_id, Some(first_reply));

        let order: Vec<Role> = store.list_messages(&conv).iter().map(|m| m.role).collect();
        assert_eq!(order, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn empty_send_is_rejected_without_mutation() {
        let (mut engine, mut store, conv, _) = setup(ScriptedTransport::default());
        let revision = store.revision();
        let err = engine.start_send(&mut store, &conv, "   ", Vec::new()).unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert_eq!(store.revision(), revision);
        assert!(!engine.is_generating());
    }

    #[tokio::test]
    async fn attachment_only_send_is_allowed() {
        let (mut engine, mut store, conv, transport) =
            setup(ScriptedTransport::new(vec![Ok(done("srv"))]));
        let file = Attachment::new("notes.txt", "text/plain", 12);
        engine.start_send(&mut store, &conv, "", vec![file.clone()]).unwrap();
        engine.wait_for_idle(&mut store).await;
        assert_eq!(transport.requests()[0].files, vec![file]);
    }

    #[tokio::test]
    async fn send_to_unknown_conversation_is_not_found() {
        let (mut engine, mut store, _, _) = setup(ScriptedTransport::default());
        let err = engine
            .start_send(&mut store, &ConversationId::new("missing"), "hi", Vec::new())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn regenerate_resets_and_resubmits_parent_prompt() {
        let (mut engine, mut store, conv, transport) =
            setup(ScriptedTransport::new(vec![Ok(chunk("4", "a-new")), Ok(done("a-new"))]));
        let (user_id, assistant_id) = seed_turn(&mut store, &conv, "2+2?", "four");
        store.update_message(&assistant_id, MessagePatch::rating(Some(Rating::Down)));

        let target = engine.start_regenerate(&mut store, &assistant_id).unwrap();
        assert_eq!(target.as_ref(), Some(&assistant_id));
        let reset = store.message(&assistant_id).unwrap();
        assert_eq!(reset.content, "");
        assert_eq!(reset.status, MessageStatus::Streaming);
        assert_eq!(reset.rating, None);

        engine.wait_for_idle(&mut store).await;
        let request = &transport.requests()[0];
        assert_eq!(request.content, "2+2?");
        assert_eq!(request.parent_id, None);
        let reply = store.message(&MessageId::new("a-new")).unwrap();
        assert_eq!(reply.content, "4");
        assert_eq!(reply.parent_id, Some(user_id));
    }

    #[tokio::test]
    async fn regenerate_is_a_silent_noop_for_unusable_targets() {
        let (mut engine, mut store, conv, transport) = setup(ScriptedTransport::default());
        let (user_id, _) = seed_turn(&mut store, &conv, "q", "a");
        let orphan = Message::assistant_placeholder(conv.clone(), None, store.next_timestamp(&conv));
        let orphan_id = orphan.id.clone();
        store.add_message(orphan);

        assert_eq!(engine.start_regenerate(&mut store, &MessageId::new("ghost")).unwrap(), None);
        assert_eq!(engine.start_regenerate(&mut store, &user_id).unwrap(), None);
        assert_eq!(engine.start_regenerate(&mut store, &orphan_id).unwrap(), None);
        assert!(!engine.is_generating());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn edit_user_message_regenerates_first_child() {
        let (mut engine, mut store, conv, transport) =
            setup(ScriptedTransport::new(vec![Ok(chunk("6", "x")), Ok(done("x"))]));
        let (user_id, assistant_id) = seed_turn(&mut store, &conv, "2+2?", "4");

        let regenerating = engine.start_edit(&mut store, &user_id, "3+3?").unwrap();
        assert_eq!(regenerating, Some(assistant_id.clone()));
        assert_eq!(store.message(&user_id).unwrap().content, "3+3?");
        assert_eq!(store.message(&assistant_id).unwrap().status, MessageStatus::Streaming);

        engine.wait_for_idle(&mut store).await;
        assert_eq!(transport.requests()[0].content, "3+3?");
        assert_eq!(store.message(&MessageId::new("x")).unwrap().content, "6");
    }

    #[tokio::test]
    async fn edit_without_responder_only_changes_content() {
        let (mut engine, mut store, conv, transport) = setup(ScriptedTransport::default());
        let (user_id, assistant_id) = seed_turn(&mut store, &conv, "q", "a");
        let lone = Message::user(conv.clone(), "draft", store.next_timestamp(&conv));
        let lone_id = lone.id.clone();
        store.add_message(lone);

        assert_eq!(engine.start_edit(&mut store, &assistant_id, "better answer").unwrap(), None);
        assert_eq!(engine.start_edit(&mut store, &lone_id, "final").unwrap(), None);
        assert_eq!(store.message(&assistant_id).unwrap().content, "better answer");
        assert_eq!(store.message(&lone_id).unwrap().content, "final");
        assert_eq!(store.message(&user_id).unwrap().content, "q");
        assert!(transport.requests().is_empty());

        assert_eq!(engine.start_edit(&mut store, &lone_id, "").unwrap(), None);
        assert_eq!(store.message(&lone_id).unwrap().content, "");
    }

    #[tokio::test]
    async fn error_after_two_chunks_replaces_content_and_ignores_the_rest() {
        let (transport, tx) = ScriptedTransport::channel();
        let (mut engine, mut store, conv, _) = setup(transport);
        let receipt = engine.start_send(&mut store, &conv, "Hello", Vec::new()).unwrap();

        tx.send(Ok(StreamEvent::Chunk { content: "Hel".into(), message_id: None })).unwrap();
        tx.send(Ok(StreamEvent::Chunk { content: "lo".into(), message_id: None })).unwrap();
        assert!(engine.pump(&mut store).await);
        assert!(engine.pump(&mut store).await);
        assert_eq!(engine.state(), SessionState::Streaming);
        assert_eq!(store.message(&receipt.assistant_id).unwrap().content, "Hello");

        tx.send(Ok(StreamEvent::Error("model overloaded".into()))).unwrap();
        assert_eq!(engine.wait_for_idle(&mut store).await, SessionState::Errored);

        engine.inject(StreamMessage::Chunk { content: "late".into(), message_id: None }, 1);
        engine.drain(&mut store);

        let message = store.message(&receipt.assistant_id).unwrap();
        assert_eq!(message.content, "Error: model overloaded");
        assert_eq!(message.status, MessageStatus::Error);
    }

    #[tokio::test]
    async fn transport_failure_marks_message_errored() {
        let (mut engine, mut store, conv, _) = setup(ScriptedTransport::failing("HTTP 500: boom"));
        let receipt = engine.start_send(&mut store, &conv, "Hello", Vec::new()).unwrap();
        assert_eq!(engine.wait_for_idle(&mut store).await, SessionState::Errored);
        let message = store.message(&receipt.assistant_id).unwrap();
        assert_eq!(message.content, "Error: HTTP 500: boom");
        assert_eq!(message.status, MessageStatus::Error);
    }

    #[tokio::test]
    async fn stream_closing_without_done_is_an_error() {
        let (mut engine, mut store, conv, _) =
            setup(ScriptedTransport::new(vec![Ok(chunk("partial", "s"))]));
        engine.start_send(&mut store, &conv, "Hello", Vec::new()).unwrap();
        assert_eq!(engine.wait_for_idle(&mut store).await, SessionState::Errored);
        let message = store.message(&MessageId::new("s")).unwrap();
        assert!(message.content.starts_with(ERROR_MARKER_PREFIX));
    }

    #[tokio::test]
    async fn starting_while_streaming_is_rejected_and_leaves_session_alone() {
        let (mut engine, mut store, conv, transport) = setup(ScriptedTransport::pending());
        let (_, old_reply) = seed_turn(&mut store, &conv, "q", "a");
        let receipt = engine.start_send(&mut store, &conv, "Hello", Vec::new()).unwrap();
        let revision = store.revision();

        let err = engine.start_send(&mut store, &conv, "again", Vec::new()).unwrap_err();
        assert_eq!(err, ChatError::SessionConflict { active: receipt.assistant_id.clone() });
        assert!(matches!(
            engine.start_regenerate(&mut store, &old_reply),
            Err(ChatError::SessionConflict { .. })
        ));
        assert_eq!(store.revision(), revision);
        assert_eq!(engine.state(), SessionState::AwaitingFirstChunk);
        assert_eq!(engine.active_message(), Some(&receipt.assistant_id));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn edit_that_would_regenerate_conflicts_with_active_session() {
        let (mut engine, mut store, conv, _) = setup(ScriptedTransport::pending());
        let (user_id, _) = seed_turn(&mut store, &conv, "q", "a");
        let receipt = engine.start_send(&mut store, &conv, "Hello", Vec::new()).unwrap();

        assert!(matches!(
            engine.start_edit(&mut store, &user_id, "changed"),
            Err(ChatError::SessionConflict { .. })
        ));
        assert_eq!(store.message(&user_id).unwrap().content, "q");
        assert!(matches!(
            engine.start_edit(&mut store, &receipt.assistant_id, "x"),
            Err(ChatError::SessionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_keeps_partial_content_and_drops_late_events() {
        let (transport, tx) = ScriptedTransport::channel();
        let (mut engine, mut store, conv, _) = setup(transport);
        let receipt = engine.start_send(&mut store, &conv, "Hello", Vec::new()).unwrap();

        tx.send(Ok(StreamEvent::Chunk { content: "Hi".into(), message_id: None })).unwrap();
        engine.pump(&mut store).await;
        assert!(engine.cancel(&mut store));
        assert!(!engine.cancel(&mut store));

        let _ = tx.send(Ok(chunk(" more", "srv")));
        engine.inject(StreamMessage::End, 1);
        engine.drain(&mut store);

        let message = store.message(&receipt.assistant_id).unwrap();
        assert_eq!(message.content, "Hi");
        assert_eq!(message.status, MessageStatus::Streaming);
        assert_eq!(engine.state(), SessionState::Idle);
        assert!(engine.active_message().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_errors_and_frees_the_session() {
        let (mut engine, mut store, conv, _) = setup(ScriptedTransport::unanswered());
        let receipt = engine.start_send(&mut store, &conv, "Hello", Vec::new()).unwrap();
        assert_eq!(engine.state(), SessionState::AwaitingFirstChunk);

        assert_eq!(engine.wait_for_idle(&mut store).await, SessionState::Errored);
        let message = store.message(&receipt.assistant_id).unwrap();
        assert_eq!(message.status, MessageStatus::Error);
        assert_eq!(message.content, "Error: No response from the server for 30 seconds");
        assert!(!engine.is_generating());
    }

    #[tokio::test]
    async fn cancel_before_first_chunk_leaves_empty_placeholder() {
        let (mut engine, mut store, conv, _) = setup(ScriptedTransport::pending());
        let receipt = engine.start_send(&mut store, &conv, "Hello", Vec::new()).unwrap();

        assert!(engine.cancel(&mut store));
        let message = store.message(&receipt.assistant_id).unwrap();
        assert_eq!(message.content, "");
        assert_eq!(message.status, MessageStatus::Streaming);
        assert_eq!(engine.state(), SessionState::Idle);

        // the cancelled node can be regenerated right away
        assert_eq!(
            engine.start_regenerate(&mut store, &receipt.assistant_id).unwrap(),
            Some(receipt.assistant_id.clone())
        );
    }
}
