use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use crate::core::message::{Message, MessageStatus};

/// Install the global `tracing` subscriber. `RUST_LOG` wins when set;
/// otherwise the crate logs warnings, or everything with `verbose`.
pub fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "branchat=debug" } else { "branchat=warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Plain-text transcript of completed turns, appended to a file.
pub struct TranscriptLog {
    file_path: Option<PathBuf>,
    is_active: bool,
}

impl TranscriptLog {
    pub fn new(log_file: Option<PathBuf>) -> Self {
        let is_active = log_file.is_some();
        TranscriptLog {
            file_path: log_file,
            is_active,
        }
    }

    pub fn set_log_file(&mut self, path: PathBuf) -> std::io::Result<String> {
        // Fail early if the file cannot be created.
        OpenOptions::new().create(true).append(true).open(&path)?;
        let message = format!("Logging enabled to: {}", path.display());
        self.file_path = Some(path);
        self.is_active = true;
        Ok(message)
    }

    pub fn toggle(&mut self) -> Result<String, String> {
        let Some(path) = &self.file_path else {
            return Err("No log file specified. Start with --log <file> to enable logging.".into());
        };
        let message = if self.is_active {
            format!("Logging paused (file: {})", path.display())
        } else {
            format!("Logging resumed to: {}", path.display())
        };
        self.is_active = !self.is_active;
        Ok(message)
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn status(&self) -> String {
        let name = |path: &Path| {
            path.file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned()
        };
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!("active ({})", name(path)),
            (Some(path), false) => format!("paused ({})", name(path)),
        }
    }

    /// Append one finished message. Placeholders still streaming are skipped.
    pub fn log_message(&self, message: &Message) -> std::io::Result<()> {
        if message.status == MessageStatus::Streaming || message.status == MessageStatus::Pending {
            return Ok(());
        }
        let text = if message.is_user() {
            format!("You: {}", message.content)
        } else {
            message.content.clone()
        };
        self.write_block(&text)
    }

    fn write_block(&self, content: &str) -> std::io::Result<()> {
        let Some(path) = self.file_path.as_ref().filter(|_| self.is_active) else {
            return Ok(());
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        for line in content.lines() {
            writeln!(writer, "{line}")?;
        }
        writeln!(writer)?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::{ConversationId, MessageId, MessagePatch};
    use crate::utils::test_utils::at;
    use tempfile::tempdir;

    fn user(content: &str) -> Message {
        Message::user(ConversationId::new("c"), content, at(0)).with_id(MessageId::new("u"))
    }

    #[test]
    fn writes_turns_and_respects_pause() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat.log");
        let mut log = TranscriptLog::new(Some(path.clone()));
        assert_eq!(log.status(), "active (chat.log)");

        log.log_message(&user("Hello\nthere")).unwrap();
        let mut reply = Message::assistant_placeholder(ConversationId::new("c"), None, at(1));
        log.log_message(&reply).unwrap();
        reply.apply_patch(
            MessagePatch::content("Hi!").with_status(MessageStatus::Completed),
        );
        log.log_message(&reply).unwrap();

        log.toggle().unwrap();
        assert!(!log.is_active());
        log.log_message(&user("not logged")).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "You: Hello\nthere\n\nHi!\n\n");
    }

    #[test]
    fn toggle_without_file_is_an_error() {
        let mut log = TranscriptLog::new(None);
        assert_eq!(log.status(), "disabled");
        assert!(log.toggle().is_err());
    }
}
