//! One-shot "say" command: send a prompt, stream the reply to stdout.

use std::error::Error;
use std::io::{self, Write};

use crate::cli::render::StreamPrinter;
use crate::core::controller::ConversationController;
use crate::core::message::MessageStatus;
use crate::utils::logging::TranscriptLog;

pub async fn run_say(
    mut controller: ConversationController,
    prompt: String,
    log: TranscriptLog,
) -> Result<(), Box<dyn Error>> {
    if prompt.trim().is_empty() {
        eprintln!("Usage: branchat say <prompt>");
        std::process::exit(1);
    }

    let receipt = controller.send_message(&prompt, Vec::new()).await?;
    if let Some(user) = controller.message(&receipt.user_id) {
        log_turn(&log, user);
    }

    let mut printer = StreamPrinter::default();
    printer.follow(receipt.assistant_id);
    let mut stdout = io::stdout();

    while controller.pump().await {
        if let Some(delta) = printer.take_delta(&controller) {
            write!(stdout, "{delta}")?;
            stdout.flush()?;
        }
    }
    writeln!(stdout)?;

    match printer.finish(&controller) {
        Some(reply) if reply.status == MessageStatus::Error => {
            eprintln!("❌ {}", reply.content);
            std::process::exit(1);
        }
        Some(reply) => log_turn(&log, reply),
        None => {}
    }
    Ok(())
}

pub(crate) fn log_turn(log: &TranscriptLog, message: &crate::core::message::Message) {
    if let Err(err) = log.log_message(message) {
        tracing::warn!(error = %err, "failed to write transcript log");
    }
}
