//! Conversation history commands

use std::error::Error;

use chrono::Local;

use crate::cli::say::{DIM, RESET};
use crate::core::config::Config;
use crate::core::message::Message;
use crate::core::persistence::{ChatStore, ConversationId, ConversationSummary, JsonlChatStore};

fn history_store() -> Result<JsonlChatStore, Box<dyn Error>> {
    let config = Config::load()?;
    Ok(JsonlChatStore::new(config.history_dir()))
}

pub async fn list_history() -> Result<(), Box<dyn Error>> {
    let conversations = history_store()?.list_conversations().await?;
    print!("{}", render_conversation_list(&conversations));
    Ok(())
}

pub async fn print_conversation(id: i64) -> Result<(), Box<dyn Error>> {
    let messages = history_store()?.load_messages(ConversationId(id)).await?;
    print!("{}", render_transcript(&messages));
    Ok(())
}

pub async fn rename_conversation(id: i64, title: &str) -> Result<(), Box<dyn Error>> {
    let title = title.trim();
    if title.is_empty() {
        eprintln!("❌ Title cannot be empty");
        std::process::exit(1);
    }
    history_store()?
        .rename_conversation(ConversationId(id), title)
        .await?;
    println!("✅ Renamed conversation {id} to: {title}");
    Ok(())
}

pub async fn search_history(text: &str) -> Result<(), Box<dyn Error>> {
    let found = history_store()?.search_conversations(text).await?;
    if found.is_empty() {
        println!("No conversations match \"{}\".", text.trim());
    } else {
        print!("{}", render_conversation_list(&found));
    }
    Ok(())
}

pub async fn delete_conversation(id: i64) -> Result<(), Box<dyn Error>> {
    history_store()?
        .delete_conversation(ConversationId(id))
        .await?;
    println!("🗑️  Deleted conversation {id}");
    Ok(())
}

pub(crate) fn render_conversation_list(conversations: &[ConversationSummary]) -> String {
    if conversations.is_empty() {
        return "No conversations yet.\n".to_string();
    }

    let mut out = String::new();
    for summary in conversations.iter().rev() {
        let created = summary.created_at.with_timezone(&Local);
        out.push_str(&format!(
            "{:>4}  {}  {}\n",
            summary.id.0,
            created.format("%Y-%m-%d %H:%M"),
            summary.title
        ));
    }
    out
}

pub(crate) fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let label = if message.is_user() { "You" } else { "Assistant" };
        out.push_str(&format!("{label}: "));
        if let Some(reasoning) = message.reasoning_content.as_deref() {
            if !reasoning.is_empty() {
                out.push_str(&format!("{DIM}{reasoning}{RESET}\n"));
            }
        }
        out.push_str(&format!("{}\n\n", message.content));
    }
    out
}
