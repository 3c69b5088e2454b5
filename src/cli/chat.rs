//! Line-oriented interactive chat.
//!
//! Input lines and stream updates are multiplexed on one task, so a reply
//! keeps printing while the next command is typed and `/cancel` can stop it.

use std::error::Error;
use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::render::{describe, StreamPrinter};
use crate::cli::say::log_turn;
use crate::core::controller::ConversationController;
use crate::core::error::ChatError;
use crate::core::message::{ConversationId, MessageId, MessageStatus, Rating};
use crate::utils::logging::TranscriptLog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Send(String),
    New(Option<String>),
    Regenerate(Option<String>),
    Edit { id: String, content: String },
    Rate { id: String, rating: Rating },
    Delete(String),
    Tree,
    Cancel,
    Log,
    Quit,
}

pub fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Ok(ReplCommand::Send(trimmed.to_string()));
    };

    let (name, args) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(name, args)| (name, args.trim()));
    let arg = (!args.is_empty()).then(|| args.to_string());

    match name {
        "new" => Ok(ReplCommand::New(arg)),
        "regen" | "regenerate" => Ok(ReplCommand::Regenerate(arg)),
        "edit" => {
            let (id, content) = args
                .split_once(char::is_whitespace)
                .ok_or("Usage: /edit <id> <text>")?;
            Ok(ReplCommand::Edit {
                id: id.to_string(),
                content: content.trim().to_string(),
            })
        }
        "rate" => {
            let mut parts = args.split_whitespace();
            let (Some(id), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err("Usage: /rate <id> up|down".into());
            };
            let rating = match value {
                "up" | "+1" => Rating::Up,
                "down" | "-1" => Rating::Down,
                _ => return Err("Usage: /rate <id> up|down".into()),
            };
            Ok(ReplCommand::Rate {
                id: id.to_string(),
                rating,
            })
        }
        "delete" => arg
            .map(ReplCommand::Delete)
            .ok_or_else(|| "Usage: /delete <id>".into()),
        "tree" => Ok(ReplCommand::Tree),
        "cancel" => Ok(ReplCommand::Cancel),
        "log" => Ok(ReplCommand::Log),
        "quit" | "exit" => Ok(ReplCommand::Quit),
        other => Err(format!("Unknown command: /{other}")),
    }
}

/// Find the message of `conversation_id` whose id starts with `prefix`.
pub fn find_message(
    controller: &ConversationController,
    conversation_id: &ConversationId,
    prefix: &str,
) -> Result<MessageId, String> {
    let exact = MessageId::new(prefix);
    if let Some(message) = controller.message(&exact) {
        return Ok(message.id.clone());
    }
    let matches: Vec<&MessageId> = controller
        .messages(conversation_id)
        .into_iter()
        .map(|m| &m.id)
        .filter(|id| id.as_str().starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok((*id).clone()),
        [] => Err(format!("No message matches '{prefix}'")),
        _ => Err(format!("'{prefix}' matches {} messages", matches.len())),
    }
}

struct Session {
    controller: ConversationController,
    printer: StreamPrinter,
    log: TranscriptLog,
}

pub async fn run_chat(
    controller: ConversationController,
    log: TranscriptLog,
) -> Result<(), Box<dyn Error>> {
    let mut session = Session {
        controller,
        printer: StreamPrinter::default(),
        log,
    };
    let conversation = session.controller.create_conversation(None).await;
    println!("Conversation {conversation}. Type /quit to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !session.handle_line(&line).await? {
                    break;
                }
            }
            progressed = session.controller.pump(), if session.controller.is_generating() => {
                if progressed {
                    session.print_progress()?;
                }
            }
        }
    }

    session.controller.cancel_generation();
    Ok(())
}

impl Session {
    async fn handle_line(&mut self, line: &str) -> Result<bool, Box<dyn Error>> {
        if line.trim().is_empty() {
            return Ok(true);
        }
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(usage) => {
                eprintln!("{usage}");
                return Ok(true);
            }
        };

        let result = match command {
            ReplCommand::Quit => return Ok(false),
            ReplCommand::Send(content) => self.send(&content).await,
            ReplCommand::New(title) => {
                let id = self.controller.create_conversation(title).await;
                println!("Conversation {id}.");
                Ok(())
            }
            ReplCommand::Regenerate(target) => self.regenerate(target.as_deref()),
            ReplCommand::Edit { id, content } => self.edit(&id, &content),
            ReplCommand::Rate { id, rating } => self.rate(&id, rating),
            ReplCommand::Delete(id) => self.delete(&id),
            ReplCommand::Tree => {
                self.print_tree();
                Ok(())
            }
            ReplCommand::Cancel => {
                if self.controller.cancel_generation() {
                    self.finish_reply()?;
                    println!("(cancelled)");
                }
                Ok(())
            }
            ReplCommand::Log => {
                match self.log.toggle() {
                    Ok(message) => println!("{message}"),
                    Err(message) => eprintln!("{message}"),
                }
                Ok(())
            }
        };

        if let Err(message) = result {
            eprintln!("❌ {message}");
        }
        Ok(true)
    }

    fn conversation(&self) -> Result<ConversationId, String> {
        self.controller
            .current_conversation()
            .cloned()
            .ok_or_else(|| "No conversation selected; use /new".to_string())
    }

    fn resolve(&self, prefix: &str) -> Result<MessageId, String> {
        find_message(&self.controller, &self.conversation()?, prefix)
    }

    async fn send(&mut self, content: &str) -> Result<(), String> {
        let receipt = self
            .controller
            .send_message(content, Vec::new())
            .await
            .map_err(|err| err.to_string())?;
        if let Some(user) = self.controller.message(&receipt.user_id) {
            log_turn(&self.log, user);
        }
        self.printer.follow(receipt.assistant_id);
        Ok(())
    }

    fn regenerate(&mut self, target: Option<&str>) -> Result<(), String> {
        let id = match target {
            Some(prefix) => self.resolve(prefix)?,
            None => {
                let conversation = self.conversation()?;
                self.controller
                    .default_path(&conversation)
                    .into_iter()
                    .rev()
                    .find(|m| m.is_assistant())
                    .map(|m| m.id)
                    .ok_or("Nothing to regenerate")?
            }
        };
        match self.controller.regenerate(&id).map_err(|err| err.to_string())? {
            Some(target) => {
                self.printer.follow(target);
                Ok(())
            }
            None => Err("Only replies with a prompt can be regenerated".into()),
        }
    }

    fn edit(&mut self, prefix: &str, content: &str) -> Result<(), String> {
        let id = self.resolve(prefix)?;
        match self.controller.edit(&id, content) {
            Ok(Some(target)) => self.printer.follow(target),
            Ok(None) => println!("Edited."),
            Err(err) => return Err(err.to_string()),
        }
        Ok(())
    }

    fn rate(&mut self, prefix: &str, rating: Rating) -> Result<(), String> {
        let id = self.resolve(prefix)?;
        match self.controller.rate_message(&id, rating) {
            Ok(Some(_)) => println!("Rated."),
            Ok(None) => println!("Rating cleared."),
            Err(err) => return Err(err.to_string()),
        }
        Ok(())
    }

    fn delete(&mut self, prefix: &str) -> Result<(), String> {
        let id = self.resolve(prefix)?;
        self.controller
            .delete_message(&id)
            .map_err(|err: ChatError| err.to_string())?;
        println!("Deleted.");
        Ok(())
    }

    fn print_tree(&self) {
        let Ok(conversation) = self.conversation() else {
            println!("(no conversation)");
            return;
        };
        if let Some(meta) = self.controller.store().conversation(&conversation) {
            println!("{} [{}]", meta.title, meta.selected_models().join(", "));
        }
        for message in self.controller.default_path(&conversation) {
            println!("  {}", describe(&message));
        }
    }

    fn print_progress(&mut self) -> io::Result<()> {
        let mut stdout = io::stdout();
        if let Some(delta) = self.printer.take_delta(&self.controller) {
            write!(stdout, "{delta}")?;
            stdout.flush()?;
        }
        if !self.controller.is_generating() {
            self.finish_reply()?;
        }
        Ok(())
    }

    fn finish_reply(&mut self) -> io::Result<()> {
        if let Some(delta) = self.printer.take_delta(&self.controller) {
            print!("{delta}");
        }
        println!();
        match self.printer.finish(&self.controller) {
            Some(reply) if reply.status == MessageStatus::Error => {
                eprintln!("❌ {}", reply.content);
            }
            Some(reply) => log_turn(&self.log, reply),
            None => {}
        }
        io::stdout().flush()
    }
}
