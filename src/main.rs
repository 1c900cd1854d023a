mod cmd;
mod common;
mod config;
mod logging;
mod rules;
mod util;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cmd::chat::ChatArgs;
use cmd::configure::ConfigCmd;

#[derive(Parser)]
#[command(name = "terminaut", version, about = "LLM agent loop for the terminal", long_about = None, disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Options for the default `chat` command
    #[command(flatten)]
    chat: ChatArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the model; it may run bash commands and apply patches after approval
    Chat(ChatArgs),
    /// Show or change the stored configuration
    Config(ConfigCmd),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Chat(args)) => cmd::chat::handle_chat(args),
        Some(Commands::Config(cmd)) => cmd::configure::handle_config(cmd),
        None => cmd::chat::handle_chat(cli.chat),
    }
}
