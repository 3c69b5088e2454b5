//! Command-line interface parsing and handling
//!
//! A thin presentation layer over [`ConversationController`]: it renders
//! store state as plain text and forwards user input to the façade.

pub mod chat;
pub mod render;
pub mod say;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::api::client::HttpApiClient;
use crate::cli::chat::run_chat;
use crate::cli::say::run_say;
use crate::core::config::data::path_display;
use crate::core::config::Config;
use crate::core::controller::ConversationController;
use crate::utils::logging::{init_tracing, TranscriptLog};

#[derive(Parser)]
#[command(name = "branchat")]
#[command(about = "Branching chat client with streamed responses")]
#[command(
    long_about = "branchat talks to a chat backend that streams generated replies. \
Conversations are trees: any reply can be regenerated and any prompt \
edited, and the default view follows the first branch at every fork.\n\n\
Environment Variables:\n\
  BRANCHAT_BASE_URL   Backend root URL (defaults to http://localhost:8000)\n\
  BRANCHAT_TOKEN      Bearer token sent with every request\n\
  RUST_LOG            Diagnostic log filter (defaults to branchat=warn)\n\n\
Chat commands:\n\
  /new [title]        Start a new conversation\n\
  /regen [id]         Regenerate a reply (defaults to the latest one)\n\
  /edit <id> <text>   Replace a message; editing a prompt regenerates its reply\n\
  /rate <id> up|down  Toggle a rating on a reply\n\
  /delete <id>        Delete a message, keeping its replies\n\
  /tree               Show the conversation with message ids\n\
  /cancel             Stop the reply being generated\n\
  /log                Pause or resume the transcript log\n\
  /quit               Leave"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Append completed turns to this file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Backend root URL, overriding the config file and environment
    #[arg(short = 'u', long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Model to select in new conversations
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Log debug diagnostics to stderr
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Send one prompt and stream the reply to stdout
    Say {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Print the effective configuration
    Config,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = Config::load()?;
    if let Some(base_url) = args.base_url.clone() {
        config.base_url = Some(base_url);
    }
    if let Some(model) = args.model.clone() {
        config.default_models = vec![model];
    }

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Config => {
            if let Some(path) = Config::config_path() {
                println!("Config file: {}", path_display(path));
            }
            config.print_all();
            Ok(())
        }
        Commands::Say { prompt } => {
            let controller = build_controller(&config)?;
            run_say(controller, prompt.join(" "), TranscriptLog::new(args.log)).await
        }
        Commands::Chat => {
            let controller = build_controller(&config)?;
            run_chat(controller, TranscriptLog::new(args.log)).await
        }
    }
}

fn build_controller(config: &Config) -> Result<ConversationController, Box<dyn Error>> {
    let client = Arc::new(HttpApiClient::new(config.client_settings())?);
    Ok(ConversationController::new(
        client.clone(),
        client,
        config.controller_settings(),
    ))
}
