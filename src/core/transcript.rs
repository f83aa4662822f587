//! Live conversation transcript
//!
//! A [`Transcript`] owns the ordered message list for one conversation and
//! tracks whether an assistant reply is currently being streamed into it.
//! Only the trailing assistant message of an open turn is ever mutated.

use std::error::Error;
use std::fmt;

use crate::core::message::{Message, Role, StreamFragment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptError {
    /// `begin_turn` was called while an assistant reply is still open.
    TurnInFlight,
    /// A fragment or completion arrived with no open turn.
    NoTurnInFlight,
}

impl fmt::Display for TranscriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptError::TurnInFlight => {
                f.write_str("a reply is already streaming for this conversation")
            }
            TranscriptError::NoTurnInFlight => f.write_str("no reply is streaming"),
        }
    }
}

impl Error for TranscriptError {}

#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
    state: TurnState,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            state: TurnState::Idle,
        }
    }

    /// Restore a transcript from stored history. All messages are settled.
    pub fn from_history(messages: Vec<Message>) -> Self {
        Self {
            messages,
            state: TurnState::Idle,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_in_flight(&self) -> bool {
        self.state == TurnState::InFlight
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// The assistant message currently receiving fragments, if any.
    pub fn in_flight(&self) -> Option<&Message> {
        match self.state {
            TurnState::InFlight => self.messages.last(),
            TurnState::Idle => None,
        }
    }

    /// Append the user's message followed by an empty assistant message.
    pub fn begin_turn(&mut self, user_text: impl Into<String>) -> Result<(), TranscriptError> {
        if self.state == TurnState::InFlight {
            return Err(TranscriptError::TurnInFlight);
        }
        self.messages.reserve(2);
        self.messages.push(Message::user(user_text));
        self.messages.push(Message::new(Role::Assistant, String::new()));
        self.state = TurnState::InFlight;
        Ok(())
    }

    pub fn apply_fragment(&mut self, fragment: &StreamFragment) -> Result<(), TranscriptError> {
        let message = self.in_flight_mut()?;
        if !fragment.content_delta.is_empty() {
            message.content.push_str(&fragment.content_delta);
        }
        if let Some(reasoning) = &fragment.reasoning_delta {
            message
                .reasoning_content
                .get_or_insert_with(String::new)
                .push_str(reasoning);
        }
        Ok(())
    }

    /// Settle the open assistant message and return a copy for persistence.
    pub fn complete_turn(&mut self) -> Result<Message, TranscriptError> {
        let finished = self.in_flight_mut()?.clone();
        self.state = TurnState::Idle;
        Ok(finished)
    }

    /// Close the open turn without completing it. Partial content stays.
    pub fn abort_turn(&mut self) -> Result<(), TranscriptError> {
        self.in_flight_mut()?;
        self.state = TurnState::Idle;
        Ok(())
    }

    fn in_flight_mut(&mut self) -> Result<&mut Message, TranscriptError> {
        if self.state != TurnState::InFlight {
            return Err(TranscriptError::NoTurnInFlight);
        }
        match self.messages.last_mut() {
            Some(message) if message.is_assistant() => Ok(message),
            _ => Err(TranscriptError::NoTurnInFlight),
        }
    }
}
