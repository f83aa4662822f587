//! Saylo is a terminal chat client for OpenAI-compatible streaming providers
//! (Groq, OpenRouter and Cerebras).
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the model registry, credential resolution, request
//!   construction, stream decoding, the transcript and conversation storage,
//!   and [`core::turn`] which drives a single send end to end.
//! - [`api`] defines the chat-completion wire payloads.
//! - [`cli`] parses arguments and dispatches subcommands.
//!
//! The binary (`src/main.rs`) installs logging and routes through
//! [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
