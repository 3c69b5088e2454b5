//! Incremental decoder for the generation endpoint's `text/event-stream`
//! body.
//!
//! Bytes arrive in arbitrary slices; the decoder buffers until a newline,
//! then turns each `data:` line into a [`StreamEvent`]. Comment lines, other
//! SSE fields and blank separators are ignored.

use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use memchr::memchr;

use crate::api::StreamPayload;
use crate::core::chat_stream::{EventStream, StreamEvent};
use crate::core::error::ChatError;
use crate::core::message::MessageId;

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every complete event they finish.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent, ChatError>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            match std::str::from_utf8(&line) {
                Ok(text) => {
                    if let Some(event) = decode_line(text.trim()) {
                        out.push(event);
                    }
                }
                Err(err) => out.push(Err(ChatError::StreamProtocol(format!(
                    "invalid UTF-8 in stream: {err}"
                )))),
            }
        }

        out
    }

    /// Decode whatever is left once the body has ended without a trailing
    /// newline.
    pub fn finish(&mut self) -> Option<Result<StreamEvent, ChatError>> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest);
        decode_line(text.trim())
    }
}

/// Turn a raw response body into decoded events. A body error is yielded
/// once and ends the stream.
pub fn decode_stream<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    let state = (Box::pin(body), SseDecoder::new(), false);
    stream::unfold(state, |(mut body, mut decoder, finished)| async move {
        if finished {
            return None;
        }
        let next = body.next().await;
        let batch = match next {
            Some(Ok(bytes)) => {
                let events = decoder.feed(bytes.as_ref());
                return Some((events, (body, decoder, false)));
            }
            Some(Err(err)) => vec![Err(err.into())],
            None => decoder.finish().into_iter().collect(),
        };
        Some((batch, (body, decoder, true)))
    })
    .flat_map(stream::iter)
    .boxed()
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn decode_line(line: &str) -> Option<Result<StreamEvent, ChatError>> {
    let payload = extract_data_payload(line)?;
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(Ok(StreamEvent::Done { message_id: None }));
    }
    Some(decode_payload(payload))
}

fn decode_payload(payload: &str) -> Result<StreamEvent, ChatError> {
    let parsed: StreamPayload = serde_json::from_str(payload)
        .map_err(|err| ChatError::StreamProtocol(format!("{err}: {payload}")))?;
    let message_id = parsed.message_id.map(MessageId::from);

    if let Some(error) = parsed.error {
        return Ok(StreamEvent::Error(error));
    }
    if parsed.done {
        return Ok(StreamEvent::Done { message_id });
    }
    match parsed.chunk {
        Some(content) => Ok(StreamEvent::Chunk {
            content,
            message_id,
        }),
        None => Err(ChatError::StreamProtocol(format!(
            "event carries no chunk, done or error: {payload}"
        ))),
    }
}
