//! Plain-text rendering of store state for the terminal commands.

use crate::core::controller::ConversationController;
use crate::core::message::{Message, MessageId, MessageStatus, Rating};

pub const SHORT_ID_LEN: usize = 8;

pub fn short_id(id: &MessageId) -> &str {
    let raw = id.as_str();
    raw.char_indices()
        .nth(SHORT_ID_LEN)
        .map_or(raw, |(end, _)| &raw[..end])
}

/// One line of `/tree` output for a message on the default path.
pub fn describe(message: &Message) -> String {
    let mut line = format!(
        "[{}] {}: {}",
        short_id(&message.id),
        message.role.as_str(),
        first_line(&message.content)
    );
    if message.children_ids.len() > 1 {
        line.push_str(&format!("  ({} branches)", message.children_ids.len()));
    }
    match message.rating {
        Some(Rating::Up) => line.push_str("  +1"),
        Some(Rating::Down) => line.push_str("  -1"),
        None => {}
    }
    if message.status == MessageStatus::Streaming {
        line.push_str("  ...");
    }
    line
}

fn first_line(content: &str) -> String {
    let mut lines = content.lines();
    let first = lines.next().unwrap_or_default();
    if lines.next().is_some() {
        format!("{first} [...]")
    } else {
        first.to_string()
    }
}

/// Prints the growing content of one target message incrementally.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    target: Option<MessageId>,
    printed: usize,
}

impl StreamPrinter {
    pub fn follow(&mut self, target: MessageId) {
        self.target = Some(target);
        self.printed = 0;
    }

    pub fn target(&self) -> Option<&MessageId> {
        self.target.as_ref()
    }

    /// Text appended to the target since the last call. Stale placeholder
    /// ids are followed to the rebound record.
    pub fn take_delta(&mut self, controller: &ConversationController) -> Option<String> {
        let message = controller.message(self.target.as_ref()?)?;
        if message.status == MessageStatus::Error {
            return None;
        }
        let delta = message.content.get(self.printed..)?;
        if delta.is_empty() {
            return None;
        }
        self.printed = message.content.len();
        Some(delta.to_string())
    }

    /// Stop following; returns the final record when it is terminal.
    pub fn finish<'a>(&mut self, controller: &'a ConversationController) -> Option<&'a Message> {
        let target = self.target.take()?;
        self.printed = 0;
        controller
            .message(&target)
            .filter(|message| message.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::ConversationId;
    use crate::utils::test_utils::at;

    #[test]
    fn short_id_truncates_on_char_boundary() {
        assert_eq!(short_id(&MessageId::new("0123456789abcdef")), "01234567");
        assert_eq!(short_id(&MessageId::new("abc")), "abc");
        assert_eq!(short_id(&MessageId::new("ééééééééé")), "éééééééé");
    }

    #[test]
    fn describe_marks_branches_ratings_and_streaming() {
        let mut message = Message::assistant_placeholder(ConversationId::new("c"), None, at(0))
            .with_id("abcdef0123");
        message.content = "line one\nline two".into();
        message.children_ids = vec![MessageId::new("x"), MessageId::new("y")];
        message.rating = Some(Rating::Up);
        assert_eq!(
            describe(&message),
            "[abcdef01] assistant: line one [...]  (2 branches)  +1  ..."
        );
    }
}
