//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod history;
pub mod keys;
pub mod model_list;
pub mod provider_list;
pub mod say;
pub mod set_model;


use std::error::Error;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::cli::history::{
    delete_conversation, list_history, print_conversation, rename_conversation, search_history,
};
use crate::cli::keys::{remove_keys, store_key};
use crate::cli::model_list::list_models;
use crate::cli::provider_list::list_providers;
use crate::cli::say::run_say;
use crate::cli::set_model::set_selected_model;
use crate::core::config::Config;
use crate::core::credentials::{CredentialResolver, EnvCredentialStore};
use crate::core::keyring::KeyringCredentialStore;
use crate::core::persistence::{ChatStore, JsonlChatStore, MemoryChatStore};

#[derive(Parser, Debug)]
#[command(name = "saylo")]
#[command(about = "A streaming terminal chat client for Groq, OpenRouter and Cerebras")]
#[command(
    long_about = "Saylo sends a prompt to an OpenAI-compatible chat-completion endpoint and \
streams the reply to stdout as it arrives. Reasoning output from reasoning models is \
written to stderr.\n\n\
Authentication:\n\
  Use 'saylo auth <provider>' to store an API key in your system keyring.\n\n\
Environment Variables (used when the keyring is unavailable):\n\
  GROQ_API_KEY, OPENROUTER_API_KEY, CEREBRAS_API_KEY\n\
  SAYLO_CONFIG      Override the config file location\n\
  SAYLO_LOG         Log filter (e.g. 'saylo=debug'), written to stderr\n\n\
Controls:\n\
  Ctrl+C            Cancel the reply that is streaming"
)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Prompt to send when no subcommand is given
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub prompt: Vec<String>,

    /// Model to use for this turn instead of the selected one
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Continue a stored conversation
    #[arg(short = 'c', long, global = true, value_name = "ID")]
    pub conversation: Option<i64>,

    /// Do not write this turn to the conversation history
    #[arg(long, global = true)]
    pub no_history: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Send a prompt and stream the reply (default)
    Say {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// List the supported models by provider
    Models,
    /// Show which providers have an API key configured
    Keys,
    /// Store an API key for a provider (read from stdin)
    Auth {
        /// Provider id: groq, openrouter or cerebras
        provider: String,
    },
    /// Remove all stored API keys
    Deauth,
    /// Select the model used for new turns
    SetModel {
        /// Model id, as listed by 'saylo models'
        model: String,
    },
    /// List stored conversations, or print one
    History {
        /// Conversation id to print
        id: Option<i64>,
        /// Give the conversation a new title instead of printing it
        #[arg(long, requires = "id", value_name = "TITLE")]
        rename: Option<String>,
        /// Delete the conversation and its messages
        #[arg(long, requires = "id", conflicts_with = "rename")]
        delete: bool,
        /// Only list conversations whose title contains TEXT
        #[arg(long, conflicts_with = "id", value_name = "TEXT")]
        search: Option<String>,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    match args.command {
        Some(Commands::Say { prompt }) => {
            run_say(prompt, args.model, args.conversation, args.no_history).await
        }
        None => run_say(args.prompt, args.model, args.conversation, args.no_history).await,
        Some(Commands::Models) => list_models(),
        Some(Commands::Keys) => list_providers(),
        Some(Commands::Auth { provider }) => store_key(&provider),
        Some(Commands::Deauth) => remove_keys(),
        Some(Commands::SetModel { model }) => set_selected_model(&model),
        Some(Commands::History {
            id: Some(id),
            delete: true,
            ..
        }) => delete_conversation(id).await,
        Some(Commands::History {
            id: Some(id),
            rename: Some(title),
            ..
        }) => rename_conversation(id, &title).await,
        Some(Commands::History { id: Some(id), .. }) => print_conversation(id).await,
        Some(Commands::History {
            search: Some(text), ..
        }) => search_history(&text).await,
        Some(Commands::History { id: None, .. }) => list_history().await,
    }
}

/// Keyring first, environment variables while the keyring is unavailable.
pub(crate) fn default_resolver() -> CredentialResolver {
    CredentialResolver::new(KeyringCredentialStore::new()).with_fallback(EnvCredentialStore)
}

pub(crate) fn build_client(config: &Config) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = config.request_timeout() {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

pub(crate) fn open_store(config: &Config, no_history: bool) -> Arc<dyn ChatStore> {
    if no_history {
        Arc::new(MemoryChatStore::new())
    } else {
        Arc::new(JsonlChatStore::new(config.history_dir()))
    }
}
