use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::api::GenerateRequest;
use crate::core::chat_stream::{EventStream, GenerationTransport, StreamEvent};
use crate::core::error::ChatError;
use crate::core::message::{ConversationId, MessageId, Role};
use crate::core::remote::{ConversationApi, RemoteConversation};

pub fn chunk(content: &str, message_id: &str) -> StreamEvent {
    StreamEvent::Chunk {
        content: content.to_string(),
        message_id: Some(MessageId::new(message_id)),
    }
}

pub fn done(message_id: &str) -> StreamEvent {
    StreamEvent::Done {
        message_id: Some(MessageId::new(message_id)),
    }
}

pub fn sample_request() -> GenerateRequest {
    GenerateRequest {
        chat_id: ConversationId::new("chat-1"),
        parent_id: None,
        content: "Hello".to_string(),
        role: Role::User,
        model: Some("gpt-4".to_string()),
        files: Vec::new(),
    }
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .unwrap()
}

enum Script {
    Events(Vec<Result<StreamEvent, ChatError>>),
    Fail(String),
    Pending,
    Unanswered,
    Channel(mpsc::UnboundedReceiver<Result<StreamEvent, ChatError>>),
}

/// Transport that replays one queued script per opened stream and records
/// every request it receives.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedTransport {
    pub fn new(events: Vec<Result<StreamEvent, ChatError>>) -> Self {
        Self::default().then(events)
    }

    pub fn failing(message: &str) -> Self {
        Self::default().push(Script::Fail(message.to_string()))
    }

    /// A stream that opens and then never yields.
    pub fn pending() -> Self {
        Self::default().push(Script::Pending)
    }

    /// A request whose response never arrives.
    pub fn unanswered() -> Self {
        Self::default().push(Script::Unanswered)
    }

    /// A stream fed by the returned sender; it ends when the sender drops.
    pub fn channel() -> (Self, mpsc::UnboundedSender<Result<StreamEvent, ChatError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::default().push(Script::Channel(rx)), tx)
    }

    pub fn then(self, events: Vec<Result<StreamEvent, ChatError>>) -> Self {
        self.push(Script::Events(events))
    }

    pub fn then_pending(self) -> Self {
        self.push(Script::Pending)
    }

    fn push(self, script: Script) -> Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationTransport for ScriptedTransport {
    async fn open_stream(&self, request: GenerateRequest) -> Result<EventStream, ChatError> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Events(events)) => Ok(stream::iter(events).boxed()),
            Some(Script::Fail(message)) => Err(ChatError::Transport(message)),
            Some(Script::Pending) => Ok(stream::pending().boxed()),
            Some(Script::Unanswered) => futures_util::future::pending().await,
            Some(Script::Channel(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed()),
            None => Err(ChatError::transport("no scripted response left")),
        }
    }
}

/// Conversation backend that either assigns ids from a counter or refuses.
pub struct FakeConversationApi {
    fail: bool,
    created: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeConversationApi {
    pub fn assigning() -> Self {
        Self {
            fail: false,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail: true,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> Vec<(String, Vec<String>)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationApi for FakeConversationApi {
    async fn create_conversation(
        &self,
        title: &str,
        selected_models: &[String],
    ) -> Result<RemoteConversation, ChatError> {
        if self.fail {
            return Err(ChatError::transport("connection refused"));
        }
        let mut created = self.created.lock().unwrap();
        created.push((title.to_string(), selected_models.to_vec()));
        Ok(RemoteConversation {
            id: ConversationId::new(format!("srv-chat-{}", created.len())),
            title: title.to_string(),
            selected_models: selected_models.to_vec(),
            created_at: at(0),
            updated_at: None,
        })
    }
}
