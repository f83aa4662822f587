//! One user send, from validation through the persisted reply.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::chat_stream::{open_stream, StreamError};
use crate::core::credentials::{
    Credential, CredentialResolver, CredentialStoreError, ResolveError,
};
use crate::core::message::Message;
use crate::core::models::{self, ModelDescriptor, Provider};
use crate::core::persistence::{ChatStore, ConversationId, PersistenceError, RecordId};
use crate::core::request;
use crate::core::transcript::{Transcript, TranscriptError};

#[derive(Debug)]
pub enum ChatError {
    /// No API key is stored for the model's provider.
    Configuration { provider: Provider },
    /// The model id is not in the registry.
    UnsupportedModel { model_id: String },
    /// The request failed or the stream broke off.
    Transport(StreamError),
    /// The credential store itself failed.
    Credential(CredentialStoreError),
    Transcript(TranscriptError),
    Persistence(PersistenceError),
}

impl ChatError {
    /// The single line shown to the user after an aborted turn.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Transport(err) => format!("Failed to get response: {err}"),
            other => other.to_string(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ChatError::Configuration { .. })
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Configuration { provider } => {
                write!(f, "{}", ResolveError::Unconfigured(*provider))
            }
            ChatError::UnsupportedModel { model_id } => write!(f, "Unsupported model: {model_id}"),
            ChatError::Transport(err) => write!(f, "{err}"),
            ChatError::Credential(err) => write!(f, "{err}"),
            ChatError::Transcript(err) => write!(f, "{err}"),
            ChatError::Persistence(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ChatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChatError::Transport(err) => Some(err),
            ChatError::Credential(err) => Some(err),
            ChatError::Transcript(err) => Some(err),
            ChatError::Persistence(err) => Some(err),
            ChatError::Configuration { .. } | ChatError::UnsupportedModel { .. } => None,
        }
    }
}

impl From<StreamError> for ChatError {
    fn from(err: StreamError) -> Self {
        ChatError::Transport(err)
    }
}

impl From<TranscriptError> for ChatError {
    fn from(err: TranscriptError) -> Self {
        ChatError::Transcript(err)
    }
}

impl From<PersistenceError> for ChatError {
    fn from(err: PersistenceError) -> Self {
        ChatError::Persistence(err)
    }
}

impl From<ResolveError> for ChatError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Unconfigured(provider) => ChatError::Configuration { provider },
            ResolveError::Store(err) => ChatError::Credential(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { message: Message, record_id: RecordId },
    Cancelled,
}

/// Conversation state for one chat surface.
///
/// Sends take `&mut self`, so one conversation never has two turns running.
pub struct ChatSession {
    client: reqwest::Client,
    credentials: Arc<CredentialResolver>,
    store: Arc<dyn ChatStore>,
    conversation: Option<ConversationId>,
    transcript: Transcript,
}

impl ChatSession {
    pub fn new(
        client: reqwest::Client,
        credentials: Arc<CredentialResolver>,
        store: Arc<dyn ChatStore>,
    ) -> Self {
        Self {
            client,
            credentials,
            store,
            conversation: None,
            transcript: Transcript::new(),
        }
    }

    /// Continue a stored conversation.
    pub async fn resume(
        client: reqwest::Client,
        credentials: Arc<CredentialResolver>,
        store: Arc<dyn ChatStore>,
        conversation: ConversationId,
    ) -> Result<Self, ChatError> {
        let history = store.load_messages(conversation).await?;
        debug!(
            conversation = conversation.0,
            messages = history.len(),
            "resumed conversation"
        );
        Ok(Self {
            client,
            credentials,
            store,
            conversation: Some(conversation),
            transcript: Transcript::from_history(history),
        })
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation
    }

    pub async fn send<F>(
        &mut self,
        text: &str,
        model_id: &str,
        cancel: CancellationToken,
        on_update: F,
    ) -> Result<TurnOutcome, ChatError>
    where
        F: FnMut(&Message),
    {
        let model = models::lookup(model_id).map_err(|_| ChatError::UnsupportedModel {
            model_id: model_id.to_string(),
        })?;
        self.send_with_model(text, model, cancel, on_update).await
    }

    pub async fn send_with_model<F>(
        &mut self,
        text: &str,
        model: &ModelDescriptor,
        cancel: CancellationToken,
        mut on_update: F,
    ) -> Result<TurnOutcome, ChatError>
    where
        F: FnMut(&Message),
    {
        if self.transcript.is_in_flight() {
            return Err(TranscriptError::TurnInFlight.into());
        }
        let credential = self.resolve_credential(model.provider).await?;
        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }

        let conversation = match self.conversation {
            Some(id) => id,
            None => {
                let id = self.store.append_new_conversation(text).await?;
                self.conversation = Some(id);
                id
            }
        };
        self.store
            .append_message(conversation, &Message::user(text))
            .await?;

        self.transcript.begin_turn(text)?;
        if let Some(message) = self.transcript.in_flight() {
            on_update(message);
        }

        debug!(
            model = model.id,
            provider = model.provider.id(),
            conversation = conversation.0,
            "starting turn"
        );
        let prepared = request::build(self.transcript.messages(), model, credential);
        let mut fragments = match open_stream(
            &self.client,
            prepared,
            model.supports_reasoning,
            cancel.clone(),
        )
        .await
        {
            Ok(fragments) => fragments,
            Err(StreamError::Cancelled) => return self.cancelled(),
            Err(err) => return self.failed(err),
        };

        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    self.transcript.apply_fragment(&fragment)?;
                    if let Some(message) = self.transcript.in_flight() {
                        on_update(message);
                    }
                }
                Err(err) => return self.failed(err),
            }
        }

        if cancel.is_cancelled() {
            return self.cancelled();
        }

        let message = self.transcript.complete_turn()?;
        let record_id = self.store.append_message(conversation, &message).await?;
        debug!(
            conversation = conversation.0,
            record = record_id.0,
            chars = message.content.len(),
            "turn completed"
        );
        Ok(TurnOutcome::Completed { message, record_id })
    }

    async fn resolve_credential(&self, provider: Provider) -> Result<Credential, ChatError> {
        let resolver = Arc::clone(&self.credentials);
        let resolved = tokio::task::spawn_blocking(move || resolver.resolve(provider))
            .await
            .map_err(|err| ChatError::Credential(CredentialStoreError::Backend(Box::new(err))))?;
        Ok(resolved?)
    }

    fn cancelled(&mut self) -> Result<TurnOutcome, ChatError> {
        self.transcript.abort_turn()?;
        debug!("turn cancelled");
        Ok(TurnOutcome::Cancelled)
    }

    fn failed(&mut self, err: StreamError) -> Result<TurnOutcome, ChatError> {
        self.transcript.abort_turn()?;
        warn!(status = ?err.status(), "turn failed: {err}");
        Err(ChatError::Transport(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credentials::MemoryCredentialStore;
    use crate::core::message::Role;
    use crate::core::persistence::MemoryChatStore;
    use crate::utils::test_utils::{spawn_mock_server, MockResponse};

    fn frame(delta: serde_json::Value) -> String {
        format!("data: {}\n\n", serde_json::json!({"choices": [{"delta": delta}]}))
    }

    fn model_at(url: &str, supports_reasoning: bool) -> ModelDescriptor {
        ModelDescriptor {
            id: "mock-model",
            display_name: "Mock",
            provider: Provider::Groq,
            endpoint_url: Box::leak(url.to_string().into_boxed_str()),
            supports_reasoning,
        }
    }

    fn session(store: Arc<MemoryChatStore>) -> ChatSession {
        let credentials = Arc::new(CredentialResolver::new(
            MemoryCredentialStore::new().with_key(Provider::Groq, "gsk-test"),
        ));
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client should build");
        ChatSession::new(client, credentials, store)
    }

    #[tokio::test]
    async fn completed_turn_streams_and_persists_reply() {
        let server = spawn_mock_server(MockResponse::stream(vec![
            frame(serde_json::json!({"content": "Hel"})),
            frame(serde_json::json!({"content": "lo"})),
            "data: [DONE]\n\n".to_string(),
        ]))
        .await;
        let store = Arc::new(MemoryChatStore::new());
        let mut session = session(Arc::clone(&store));
        let model = model_at(&server.url, false);

        let mut updates = Vec::new();
        let outcome = session
            .send_with_model("Greet me", &model, CancellationToken::new(), |message| {
                updates.push(message.content.clone())
            })
            .await
            .expect("turn should succeed");

        let TurnOutcome::Completed { message, .. } = outcome else {
            panic!("turn should complete");
        };
        assert_eq!(message.content, "Hello");
        assert_eq!(updates, ["", "Hel", "Hello"]);

        let conversation = session.conversation_id().expect("conversation created");
        assert_eq!(
            store.load_messages(conversation).await.unwrap(),
            vec![Message::user("Greet me"), Message::assistant("Hello")]
        );
        assert!(!session.transcript().is_in_flight());

        let captured = server.captured().await;
        assert_eq!(captured[0].request_line, "POST /v1/chat/completions HTTP/1.1");
        assert_eq!(captured[0].body["model"], "mock-model");
        assert_eq!(
            captured[0].body["messages"],
            serde_json::json!([
                {"role": "user", "content": "Greet me"},
                {"role": "assistant", "content": ""}
            ])
        );
    }

    #[tokio::test]
    async fn follow_up_turn_reuses_conversation_and_history() {
        let server = spawn_mock_server(MockResponse::stream(vec![frame(
            serde_json::json!({"content": "ok"}),
        )]))
        .await;
        let store = Arc::new(MemoryChatStore::new());
        let mut session = session(Arc::clone(&store));
        let model = model_at(&server.url, false);

        for text in ["one", "two"] {
            session
                .send_with_model(text, &model, CancellationToken::new(), |_| {})
                .await
                .expect("turn should succeed");
        }

        assert_eq!(store.list_conversations().await.unwrap().len(), 1);
        assert_eq!(store.message_count().await, 4);
        let captured = server.captured().await;
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[1].body["messages"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn reasoning_fragments_accumulate_for_reasoning_models() {
        let server = spawn_mock_server(MockResponse::stream(vec![
            frame(serde_json::json!({"reasoning_content": "think"})),
            frame(serde_json::json!({"content": "Answer"})),
        ]))
        .await;
        let store = Arc::new(MemoryChatStore::new());
        let mut session = session(store);
        let model = model_at(&server.url, true);

        let outcome = session
            .send_with_model("Why?", &model, CancellationToken::new(), |_| {})
            .await
            .expect("turn should succeed");

        let TurnOutcome::Completed { message, .. } = outcome else {
            panic!("turn should complete");
        };
        assert_eq!(message.reasoning_content.as_deref(), Some("think"));
        assert_eq!(message.content, "Answer");

        let captured = server.captured().await;
        assert_eq!(captured[0].body["messages"][1]["prefix"], true);
        assert!(captured[0].body["messages"][0].get("prefix").is_none());
    }

    #[tokio::test]
    async fn unauthorized_response_aborts_without_persisting_reply() {
        let server = spawn_mock_server(MockResponse::status(
            401,
            r#"{"error":{"message":"Invalid API Key"}}"#,
        ))
        .await;
        let store = Arc::new(MemoryChatStore::new());
        let mut session = session(Arc::clone(&store));
        let model = model_at(&server.url, false);

        let mut fragments_seen = 0;
        let err = session
            .send_with_model("hi", &model, CancellationToken::new(), |message| {
                if !message.content.is_empty() {
                    fragments_seen += 1;
                }
            })
            .await
            .expect_err("401 should fail the turn");

        match &err {
            ChatError::Transport(stream_err) => assert_eq!(stream_err.status(), Some(401)),
            other => panic!("expected transport error, got {other:?}"),
        }
        assert_eq!(
            err.user_message(),
            "Failed to get response: API request failed with status 401: Invalid API Key"
        );
        assert_eq!(fragments_seen, 0);
        assert_eq!(store.message_count().await, 1);
        assert!(!session.transcript().is_in_flight());
        assert_eq!(session.transcript().messages()[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn missing_credential_fails_before_any_side_effect() {
        let server = spawn_mock_server(MockResponse::stream(Vec::new())).await;
        let store = Arc::new(MemoryChatStore::new());
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let mut session = ChatSession::new(
            client,
            Arc::new(CredentialResolver::new(MemoryCredentialStore::new())),
            Arc::clone(&store) as Arc<dyn ChatStore>,
        );
        let model = model_at(&server.url, false);

        let err = session
            .send_with_model("hi", &model, CancellationToken::new(), |_| {})
            .await
            .expect_err("missing key should fail");

        assert!(err.is_configuration());
        assert_eq!(
            err.user_message(),
            "No API key configured for Groq models. Please add your API key in settings."
        );
        assert!(session.transcript().is_empty());
        assert!(store.list_conversations().await.unwrap().is_empty());
        assert!(server.captured().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_model_fails_before_any_request() {
        let store = Arc::new(MemoryChatStore::new());
        let mut session = session(Arc::clone(&store));

        let err = session
            .send("hi", "no-such-model", CancellationToken::new(), |_| {})
            .await
            .expect_err("unknown model should fail");

        assert!(matches!(
            err,
            ChatError::UnsupportedModel { ref model_id } if model_id == "no-such-model"
        ));
        assert!(session.transcript().is_empty());
        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test]
    async fn cancellation_mid_stream_stops_updates_and_writes() {
        let server = spawn_mock_server(MockResponse::stream(vec![
            frame(serde_json::json!({"content": "first"})),
            frame(serde_json::json!({"content": "second"})),
            frame(serde_json::json!({"content": "third"})),
        ]))
        .await;
        let store = Arc::new(MemoryChatStore::new());
        let mut session = session(Arc::clone(&store));
        let model = model_at(&server.url, false);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let mut last_seen = String::new();
        let outcome = session
            .send_with_model("go", &model, cancel, |message| {
                last_seen = message.content.clone();
                if !message.content.is_empty() {
                    trigger.cancel();
                }
            })
            .await
            .expect("cancellation is not an error");

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(last_seen, "first");
        assert_eq!(store.message_count().await, 1);
        assert!(!session.transcript().is_in_flight());
    }

    #[tokio::test]
    async fn resume_restores_stored_history() {
        let store = Arc::new(MemoryChatStore::new());
        let id = store.append_new_conversation("a").await.unwrap();
        store.append_message(id, &Message::user("a")).await.unwrap();
        store
            .append_message(id, &Message::assistant("b"))
            .await
            .unwrap();

        let session = ChatSession::resume(
            reqwest::Client::new(),
            Arc::new(CredentialResolver::new(MemoryCredentialStore::new())),
            store,
            id,
        )
        .await
        .expect("resume should succeed");

        assert_eq!(session.conversation_id(), Some(id));
        assert_eq!(session.transcript().len(), 2);
        assert!(!session.transcript().is_in_flight());
    }
}
