//! TUI-less "say" command

use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cli::{build_client, default_resolver, open_store};
use crate::core::config::Config;
use crate::core::message::Message;
use crate::core::persistence::ConversationId;
use crate::core::turn::{ChatSession, TurnOutcome};

pub(crate) const DIM: &str = "\x1b[2m";
pub(crate) const RESET: &str = "\x1b[0m";

pub async fn run_say(
    prompt: Vec<String>,
    model: Option<String>,
    conversation: Option<i64>,
    no_history: bool,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: saylo say <prompt>");
        std::process::exit(1);
    }

    let config = Config::load()?;
    let model_id = model.unwrap_or_else(|| config.selected_model_id().to_string());
    let client = build_client(&config)?;
    let credentials = Arc::new(default_resolver());
    let store = open_store(&config, no_history);

    let mut session = match conversation {
        Some(id) => ChatSession::resume(client, credentials, store, ConversationId(id)).await?,
        None => ChatSession::new(client, credentials, store),
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut printer = ReplyPrinter::new(io::stdout(), io::stderr());
    let result = session
        .send(&prompt, &model_id, cancel, |message| {
            // Broken pipes on stdout should not abort the turn.
            let _ = printer.update(message);
        })
        .await;
    ctrl_c.abort();
    printer.finish()?;

    match result {
        Ok(TurnOutcome::Completed { .. }) => {
            if let (false, Some(id)) = (no_history, session.conversation_id()) {
                eprintln!("💾 Saved to conversation {id} (continue with -c {id})");
            }
            Ok(())
        }
        Ok(TurnOutcome::Cancelled) => {
            eprintln!("⏹️  Cancelled");
            Ok(())
        }
        Err(err) => {
            eprintln!("❌ {}", err.user_message());
            std::process::exit(1);
        }
    }
}

/// Writes the unseen tail of a growing assistant message.
///
/// Content goes to `out`; reasoning goes dimmed to `err`.
pub struct ReplyPrinter<O: Write, E: Write> {
    out: O,
    err: E,
    content_written: usize,
    reasoning_written: usize,
}

impl<O: Write, E: Write> ReplyPrinter<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            content_written: 0,
            reasoning_written: 0,
        }
    }

    /// Counters advance before anything is written, so text from a failed
    /// write is dropped rather than repeated on the next update.
    pub fn update(&mut self, message: &Message) -> io::Result<()> {
        let reasoning_tail = match &message.reasoning_content {
            Some(reasoning) => {
                let tail = reasoning.get(self.reasoning_written..).unwrap_or("");
                self.reasoning_written = reasoning.len();
                tail
            }
            None => "",
        };
        let content_tail = message.content.get(self.content_written..).unwrap_or("");
        let first_content = self.content_written == 0 && !content_tail.is_empty();
        self.content_written = message.content.len();

        if !reasoning_tail.is_empty() {
            write!(self.err, "{DIM}{reasoning_tail}{RESET}")?;
            self.err.flush()?;
        }
        if first_content && self.reasoning_written > 0 {
            writeln!(self.err)?;
        }
        if !content_tail.is_empty() {
            self.out.write_all(content_tail.as_bytes())?;
            self.out.flush()?;
        }
        Ok(())
    }

    pub fn finish(&mut self) -> io::Result<()> {
        if self.content_written > 0 {
            writeln!(self.out)?;
        }
        self.out.flush()
    }

    #[cfg(test)]
    fn into_parts(self) -> (O, E) {
        (self.out, self.err)
    }
}
