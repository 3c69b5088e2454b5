use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::GenerateRequest;
use crate::core::error::ChatError;
use crate::core::message::MessageId;

/// One decoded event from the generation endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk {
        content: String,
        message_id: Option<MessageId>,
    },
    Done {
        message_id: Option<MessageId>,
    },
    Error(String),
}

/// Ordered events of one generation. `Err(ChatError::StreamProtocol)` items
/// are skipped by the consumer; any other error ends the stream.
pub type EventStream = BoxStream<'static, Result<StreamEvent, ChatError>>;

/// Remote endpoint that turns a prompt into a stream of events.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    async fn open_stream(&self, request: GenerateRequest) -> Result<EventStream, ChatError>;
}

/// What the stream service hands back to the controller, tagged with the
/// stream id it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    Chunk {
        content: String,
        message_id: Option<MessageId>,
    },
    Done {
        message_id: Option<MessageId>,
    },
    Error(String),
    /// The transport side of the stream is closed.
    End,
}

impl From<StreamEvent> for StreamMessage {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Chunk {
                content,
                message_id,
            } => StreamMessage::Chunk {
                content,
                message_id,
            },
            StreamEvent::Done { message_id } => StreamMessage::Done { message_id },
            StreamEvent::Error(message) => StreamMessage::Error(message),
        }
    }
}

pub struct StreamParams {
    pub transport: Arc<dyn GenerationTransport>,
    pub request: GenerateRequest,
    pub cancel_token: tokio_util::sync::CancellationToken,
    pub stream_id: u64,
    pub idle_timeout: Duration,
}

#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Run the transport read loop on its own task. Every stream ends with
    /// exactly one [`StreamMessage::End`] unless it is cancelled.
    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                transport,
                request,
                cancel_token,
                stream_id,
                idle_timeout,
            } = params;

            tokio::select! {
                _ = forward_events(transport, request, idle_timeout, &tx, stream_id) => {}
                _ = cancel_token.cancelled() => {
                    debug!(stream_id, "generation stream cancelled");
                }
            }
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: u64) {
        let _ = self.tx.send((message, stream_id));
    }
}

async fn forward_events(
    transport: Arc<dyn GenerationTransport>,
    request: GenerateRequest,
    idle_timeout: Duration,
    tx: &mpsc::UnboundedSender<(StreamMessage, u64)>,
    stream_id: u64,
) {
    let fail = |message: String| {
        let _ = tx.send((StreamMessage::Error(message), stream_id));
        let _ = tx.send((StreamMessage::End, stream_id));
    };
    let silence = || {
        format!(
            "No response from the server for {} seconds",
            idle_timeout.as_secs()
        )
    };

    // the response headers fall under the same idle limit as the body
    let mut events = match tokio::time::timeout(idle_timeout, transport.open_stream(request)).await
    {
        Ok(Ok(events)) => events,
        Ok(Err(err)) => {
            fail(err.to_string());
            return;
        }
        Err(_) => {
            fail(silence());
            return;
        }
    };

    loop {
        let next = match tokio::time::timeout(idle_timeout, events.next()).await {
            Ok(next) => next,
            Err(_) => {
                fail(silence());
                return;
            }
        };

        match next {
            Some(Ok(event)) => {
                let terminal = !matches!(event, StreamEvent::Chunk { .. });
                let _ = tx.send((event.into(), stream_id));
                if terminal {
                    let _ = tx.send((StreamMessage::End, stream_id));
                    return;
                }
            }
            Some(Err(ChatError::StreamProtocol(detail))) => {
                warn!(stream_id, %detail, "skipping malformed stream event");
            }
            Some(Err(err)) => {
                fail(err.to_string());
                return;
            }
            None => {
                let _ = tx.send((StreamMessage::End, stream_id));
                return;
            }
        }
    }
}
