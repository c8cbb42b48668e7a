use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::AsyncBufReadExt;

use crate::api::{ApiClient, TestCase};
use crate::config::Config;
use crate::events::{FeedEvent, Message, NodeKind, Sender, StreamEvent};
use crate::session::{ChatBackend, ChatSession};
use crate::slash::{ParsedCommand, SlashCommand, get_help_text, parse_slash_command};

/// What the interactive loop should do after a slash command
enum ChatAction {
    None,
    Exit,
}

/// Interactive chat session against one chat flow
pub async fn run_chat(config: Config, flow_id: String) -> Result<()> {
    if !config.has_access_token() {
        println!("⚠️ No access token configured — run 'flowchat token <TOKEN>' first.");
    }

    let api = ApiClient::new(&config)?;
    let mut session = ChatSession::new(api, flow_id);

    println!("💬 flowchat — {}", session.title());
    println!("Type a message and press Enter. /help lists commands.");
    println!();

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };

                if let Some(parsed) = parse_slash_command(line.trim()) {
                    match handle_slash_command(&mut session, parsed).await {
                        Ok(ChatAction::Exit) => break,
                        Ok(ChatAction::None) => {}
                        Err(e) => println!("❌ {:#}", e),
                    }
                } else if let Err(e) = session.send_message(&line).await {
                    println!("❌ {:#}", e);
                }
            }
            event = session.next_feed_event() => {
                match event {
                    Some(event) => render_feed_event(&mut session, event).await,
                    // Feed task ended; the session will reconnect on the next send
                    None => {}
                }
            }
        }
    }

    println!("👋 Bye!");
    Ok(())
}

/// Apply a feed event and echo anything the user should see
async fn render_feed_event<B: ChatBackend>(session: &mut ChatSession<B>, event: FeedEvent) {
    let display = match &event {
        FeedEvent::Open => Some("🔗 Connected".to_string()),
        FeedEvent::Closed(reason) => {
            // How long the feed has been silent helps tell a dead server
            // from a dropped connection
            let stale = session
                .last_heartbeat()
                .map(|at| format!(" (last heartbeat {}s ago)", (Utc::now() - at).num_seconds()))
                .unwrap_or_default();
            Some(format!("⚠️ Disconnected: {}{}, reconnecting...", reason, stale))
        }
        FeedEvent::Event(StreamEvent::TitleUpdate { title }) => {
            Some(format!("📝 Title: {}", title))
        }
        FeedEvent::Event(StreamEvent::NodeOutput {
            kind: NodeKind::Answer,
            message,
        }) => Some(format!("🤖 {}", message)),
        FeedEvent::Event(_) => None,
    };

    if let Err(e) = session.apply_feed_event(event).await {
        println!("❌ {:#}", e);
        return;
    }

    if let Some(line) = display {
        println!("{}", line);
    }
}

async fn handle_slash_command<B: ChatBackend>(
    session: &mut ChatSession<B>,
    command: ParsedCommand,
) -> Result<ChatAction> {
    match command.command {
        SlashCommand::New => {
            session.start_new_conversation().await?;
            match session.chat_id() {
                Some(id) => println!("✨ New conversation (#{})", id),
                None => println!("✨ New conversation"),
            }
            Ok(ChatAction::None)
        }
        SlashCommand::Open => {
            let Some(chat_id) = command.chat_target() else {
                println!("Usage: /open <id>");
                return Ok(ChatAction::None);
            };

            session.select_conversation(chat_id).await?;
            println!("📂 {} (#{})", session.title(), chat_id);
            for message in session.messages() {
                print_message(message);
            }
            Ok(ChatAction::None)
        }
        SlashCommand::Chats => {
            let chats = session.refresh_chats().await?;
            if chats.is_empty() {
                println!("📭 No conversations yet.");
            } else {
                for chat in chats {
                    print_chat_line(chat.id, chat.title.as_deref());
                }
            }
            Ok(ChatAction::None)
        }
        SlashCommand::Help => {
            println!("{}", get_help_text());
            Ok(ChatAction::None)
        }
        SlashCommand::Bye => Ok(ChatAction::Exit),
    }
}

fn print_message(message: &Message) {
    match message.sender {
        Sender::User => println!("👤 {}", message.text),
        Sender::Server => println!("🤖 {}", message.text),
    }
}

fn print_chat_line(id: i64, title: Option<&str>) {
    println!("  #{} {}", id, title.unwrap_or("(untitled)"));
}

/// List stored conversations for a chat flow
pub async fn list_conversations(config: Config, flow_id: String) -> Result<()> {
    let api = ApiClient::new(&config)?;
    let chats = api.list_chats(&flow_id).await?;

    if chats.is_empty() {
        println!("📭 No conversations for chat flow {}.", flow_id);
        return Ok(());
    }

    println!("📋 Conversations for chat flow {}:", flow_id);
    for chat in chats {
        match chat.updated_at {
            Some(updated_at) => println!(
                "  #{} {} ({})",
                chat.id,
                chat.title.as_deref().unwrap_or("(untitled)"),
                updated_at.format("%Y-%m-%d %H:%M")
            ),
            None => print_chat_line(chat.id, chat.title.as_deref()),
        }
    }

    Ok(())
}

/// List evaluation cases for a chat flow
pub async fn list_test_cases(config: Config, flow_id: String) -> Result<()> {
    let api = ApiClient::new(&config)?;
    let cases = api.list_tests(&flow_id).await?;

    if cases.is_empty() {
        println!("📭 No evaluation cases for chat flow {}.", flow_id);
        return Ok(());
    }

    println!("🧪 Evaluation cases for chat flow {}:", flow_id);
    for case in cases {
        if let Some(id) = case.id {
            println!("  #{}", id);
        }
        println!("  ❓ {}", case.test_question);
        println!("  ✅ {}", case.ground_truth);
        println!();
    }

    Ok(())
}

/// Add one evaluation case to a chat flow
pub async fn add_test_case(
    config: Config,
    flow_id: String,
    question: String,
    ground_truth: String,
) -> Result<()> {
    let api = ApiClient::new(&config)?;
    let case = TestCase {
        id: None,
        test_question: question,
        ground_truth,
    };

    api.create_tests(&flow_id, std::slice::from_ref(&case)).await?;
    println!("🧪 Evaluation case added to chat flow {}.", flow_id);

    Ok(())
}
