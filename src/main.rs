use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod api;
mod commands;
mod config;
mod events;
mod session;
mod slash;
mod sse;
mod transcript;

use config::Config;

#[derive(Parser)]
#[command(name = "flowchat")]
#[command(version)]
#[command(about = "Terminal client for chatflow chatbot platforms", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat interactively with a chat flow
    Chat {
        /// Chat flow id; falls back to `default_flow` from the config
        flow_id: Option<String>,
    },
    /// List stored conversations for a chat flow
    Chats {
        flow_id: Option<String>,
    },
    /// Manage evaluation cases for a chat flow
    Tests {
        #[command(subcommand)]
        command: TestsCommands,
    },
    /// Store the platform access token in the config
    Token { token: String },
}

#[derive(Subcommand)]
enum TestsCommands {
    /// List evaluation cases
    List { flow_id: Option<String> },
    /// Add an evaluation case
    Add {
        flow_id: Option<String>,
        /// The question to ask the flow
        #[arg(short, long)]
        question: String,
        /// The expected answer
        #[arg(short = 'a', long = "answer")]
        ground_truth: String,
    },
}

fn resolve_flow(config: &Config, arg: Option<String>) -> Result<String> {
    arg.or_else(|| config.default_flow.clone()).context(
        "No chat flow given. Pass a flow id or set default_flow in ~/.flowchat/config.toml",
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Chat { flow_id } => {
            let flow_id = resolve_flow(&config, flow_id)?;
            commands::run_chat(config, flow_id).await
        }
        Commands::Chats { flow_id } => {
            let flow_id = resolve_flow(&config, flow_id)?;
            commands::list_conversations(config, flow_id).await
        }
        Commands::Token { token } => {
            let mut config = config;
            config.set_access_token(token);
            config.save()?;
            println!("🔑 Access token saved.");
            Ok(())
        }
        Commands::Tests { command } => match command {
            TestsCommands::List { flow_id } => {
                let flow_id = resolve_flow(&config, flow_id)?;
                commands::list_test_cases(config, flow_id).await
            }
            TestsCommands::Add {
                flow_id,
                question,
                ground_truth,
            } => {
                let flow_id = resolve_flow(&config, flow_id)?;
                commands::add_test_case(config, flow_id, question, ground_truth).await
            }
        },
    }
}
