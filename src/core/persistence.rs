//! Conversation history storage
//!
//! The chat pipeline only ever appends: once for each user message and once
//! for each finished assistant reply. Reads are used for history listing and
//! resuming a conversation, never while a reply is streaming.

use std::error::Error;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::message::Message;

const TITLE_MAX_CHARS: usize = 50;
const INDEX_FILE: &str = "index.json";
const CONVERSATIONS_DIR: &str = "conversations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMessage {
    id: RecordId,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    message: Message,
}

#[derive(Debug)]
pub enum PersistenceError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize(serde_json::Error),
    Corrupt {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
    UnknownConversation(ConversationId),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Io { path, source } => {
                write!(f, "history I/O failed at {}: {}", path.display(), source)
            }
            PersistenceError::Serialize(err) => write!(f, "failed to encode history: {err}"),
            PersistenceError::Corrupt { path, line, source } => write!(
                f,
                "corrupt history file {} at line {}: {}",
                path.display(),
                line,
                source
            ),
            PersistenceError::UnknownConversation(id) => write!(f, "no conversation with id {id}"),
        }
    }
}

impl Error for PersistenceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PersistenceError::Io { source, .. } => Some(source),
            PersistenceError::Serialize(err) => Some(err),
            PersistenceError::Corrupt { source, .. } => Some(source),
            PersistenceError::UnknownConversation(_) => None,
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Title shown for a new conversation: its first user message, shortened.
pub fn conversation_title(first_user_text: &str) -> String {
    let trimmed = first_user_text.trim();
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn append_new_conversation(
        &self,
        first_user_text: &str,
    ) -> Result<ConversationId, PersistenceError>;

    async fn append_message(
        &self,
        conversation: ConversationId,
        message: &Message,
    ) -> Result<RecordId, PersistenceError>;

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, PersistenceError>;

    async fn load_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, PersistenceError>;

    async fn rename_conversation(
        &self,
        conversation: ConversationId,
        title: &str,
    ) -> Result<(), PersistenceError>;

    /// Remove a conversation and every message in it.
    async fn delete_conversation(
        &self,
        conversation: ConversationId,
    ) -> Result<(), PersistenceError>;

    /// Conversations whose title contains `query`, ignoring case. A blank
    /// query matches everything.
    async fn search_conversations(
        &self,
        query: &str,
    ) -> Result<Vec<ConversationSummary>, PersistenceError> {
        let needle = query.trim().to_lowercase();
        let mut conversations = self.list_conversations().await?;
        if !needle.is_empty() {
            conversations.retain(|c| c.title.to_lowercase().contains(&needle));
        }
        Ok(conversations)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    conversations: Vec<ConversationSummary>,
    messages: Vec<(ConversationId, RecordId, Message)>,
    next_conversation_id: i64,
    next_record_id: i64,
}

/// Volatile store, used for tests and `--no-history` sessions.
#[derive(Debug, Default)]
pub struct MemoryChatStore {
    state: Mutex<MemoryState>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages appended so far, across all conversations.
    pub async fn message_count(&self) -> usize {
        self.state.lock().await.messages.len()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn append_new_conversation(
        &self,
        first_user_text: &str,
    ) -> Result<ConversationId, PersistenceError> {
        let mut state = self.state.lock().await;
        state.next_conversation_id += 1;
        let id = ConversationId(state.next_conversation_id);
        state.conversations.push(ConversationSummary {
            id,
            title: conversation_title(first_user_text),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn append_message(
        &self,
        conversation: ConversationId,
        message: &Message,
    ) -> Result<RecordId, PersistenceError> {
        let mut state = self.state.lock().await;
        if !state.conversations.iter().any(|c| c.id == conversation) {
            return Err(PersistenceError::UnknownConversation(conversation));
        }
        state.next_record_id += 1;
        let id = RecordId(state.next_record_id);
        state.messages.push((conversation, id, message.clone()));
        Ok(id)
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, PersistenceError> {
        Ok(self.state.lock().await.conversations.clone())
    }

    async fn load_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, PersistenceError> {
        let state = self.state.lock().await;
        if !state.conversations.iter().any(|c| c.id == conversation) {
            return Err(PersistenceError::UnknownConversation(conversation));
        }
        Ok(state
            .messages
            .iter()
            .filter(|(owner, _, _)| *owner == conversation)
            .map(|(_, _, message)| message.clone())
            .collect())
    }

    async fn rename_conversation(
        &self,
        conversation: ConversationId,
        title: &str,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        let summary = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation)
            .ok_or(PersistenceError::UnknownConversation(conversation))?;
        summary.title = title.to_string();
        Ok(())
    }

    async fn delete_conversation(
        &self,
        conversation: ConversationId,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        let before = state.conversations.len();
        state.conversations.retain(|c| c.id != conversation);
        if state.conversations.len() == before {
            return Err(PersistenceError::UnknownConversation(conversation));
        }
        state.messages.retain(|(owner, _, _)| *owner != conversation);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreIndex {
    #[serde(default)]
    next_conversation_id: i64,
    #[serde(default)]
    next_record_id: i64,
    #[serde(default)]
    conversations: Vec<ConversationSummary>,
}

/// File-backed store: an index plus one JSON-lines file per conversation.
#[derive(Debug)]
pub struct JsonlChatStore {
    root: PathBuf,
    index: Mutex<Option<StoreIndex>>,
}

impl JsonlChatStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn conversation_path(&self, conversation: ConversationId) -> PathBuf {
        self.root
            .join(CONVERSATIONS_DIR)
            .join(format!("{}.jsonl", conversation.0))
    }

    async fn read_index(&self) -> Result<StoreIndex, PersistenceError> {
        let path = self.index_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| {
                PersistenceError::Corrupt {
                    path: path.clone(),
                    line: source.line(),
                    source,
                }
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(StoreIndex::default()),
            Err(err) => Err(io_error(&path)(err)),
        }
    }

    async fn write_index(&self, index: &StoreIndex) -> Result<(), PersistenceError> {
        let contents = serde_json::to_vec_pretty(index).map_err(PersistenceError::Serialize)?;
        let root = self.root.clone();
        let path = self.index_path();
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&root)?;
            let mut temp_file = NamedTempFile::new_in(&root)?;
            temp_file.write_all(&contents)?;
            temp_file.as_file_mut().sync_all()?;
            temp_file.persist(&path).map_err(|err| err.error)?;
            Ok(())
        })
        .await
        .map_err(|err| io_error(&self.root)(std::io::Error::other(err)))?;
        result.map_err(io_error(&self.index_path()))
    }

    /// Run `f` against a copy of the index and keep the copy only once it
    /// is on disk.
    async fn update_index<T>(
        &self,
        f: impl FnOnce(&mut StoreIndex) -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let mut guard = self.index.lock().await;
        let mut next = match guard.as_ref() {
            Some(index) => index.clone(),
            None => self.read_index().await?,
        };
        let value = f(&mut next)?;
        self.write_index(&next).await?;
        *guard = Some(next);
        Ok(value)
    }
}

#[async_trait]
impl ChatStore for JsonlChatStore {
    async fn append_new_conversation(
        &self,
        first_user_text: &str,
    ) -> Result<ConversationId, PersistenceError> {
        let title = conversation_title(first_user_text);
        let id = self
            .update_index(|index| {
                index.next_conversation_id += 1;
                let id = ConversationId(index.next_conversation_id);
                index.conversations.push(ConversationSummary {
                    id,
                    title,
                    created_at: Utc::now(),
                });
                Ok(id)
            })
            .await?;
        debug!(conversation = id.0, "created conversation");
        Ok(id)
    }

    async fn append_message(
        &self,
        conversation: ConversationId,
        message: &Message,
    ) -> Result<RecordId, PersistenceError> {
        let id = self
            .update_index(|index| {
                if !index.conversations.iter().any(|c| c.id == conversation) {
                    return Err(PersistenceError::UnknownConversation(conversation));
                }
                index.next_record_id += 1;
                Ok(RecordId(index.next_record_id))
            })
            .await?;

        let record = StoredMessage {
            id,
            created_at: Utc::now(),
            message: message.clone(),
        };
        let mut line = serde_json::to_vec(&record).map_err(PersistenceError::Serialize)?;
        line.push(b'\n');

        let path = self.conversation_path(conversation);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error(&path))?;
        file.write_all(&line).await.map_err(io_error(&path))?;
        file.flush().await.map_err(io_error(&path))?;

        debug!(
            conversation = conversation.0,
            record = id.0,
            role = message.role.as_str(),
            "appended message"
        );
        Ok(id)
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, PersistenceError> {
        let guard = self.index.lock().await;
        match guard.as_ref() {
            Some(index) => Ok(index.conversations.clone()),
            None => Ok(self.read_index().await?.conversations),
        }
    }

    async fn load_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, PersistenceError> {
        let known = self
            .list_conversations()
            .await?
            .iter()
            .any(|c| c.id == conversation);
        if !known {
            return Err(PersistenceError::UnknownConversation(conversation));
        }

        let path = self.conversation_path(conversation);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&path)(err)),
        };

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str::<StoredMessage>(line)
                    .map(|stored| stored.message)
                    .map_err(|source| PersistenceError::Corrupt {
                        path: path.clone(),
                        line: number + 1,
                        source,
                    })
            })
            .collect()
    }

    async fn rename_conversation(
        &self,
        conversation: ConversationId,
        title: &str,
    ) -> Result<(), PersistenceError> {
        self.update_index(|index| {
            let summary = index
                .conversations
                .iter_mut()
                .find(|c| c.id == conversation)
                .ok_or(PersistenceError::UnknownConversation(conversation))?;
            summary.title = title.to_string();
            Ok(())
        })
        .await
    }

    async fn delete_conversation(
        &self,
        conversation: ConversationId,
    ) -> Result<(), PersistenceError> {
        self.update_index(|index| {
            let before = index.conversations.len();
            index.conversations.retain(|c| c.id != conversation);
            if index.conversations.len() == before {
                return Err(PersistenceError::UnknownConversation(conversation));
            }
            Ok(())
        })
        .await?;

        let path = self.conversation_path(conversation);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_error(&path)(err)),
        }
        debug!(conversation = conversation.0, "deleted conversation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn titles_are_trimmed_and_shortened() {
        assert_eq!(conversation_title("  Hello there  "), "Hello there");
        let long = "x".repeat(80);
        let title = conversation_title(&long);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
    }

    #[tokio::test]
    async fn memory_store_appends_in_order() {
        let store = MemoryChatStore::new();
        let id = store.append_new_conversation("hi").await.unwrap();
        let first = store.append_message(id, &Message::user("hi")).await.unwrap();
        let second = store
            .append_message(id, &Message::assistant("hello"))
            .await
            .unwrap();

        assert!(second > first);
        assert_eq!(
            store.load_messages(id).await.unwrap(),
            vec![Message::user("hi"), Message::assistant("hello")]
        );
        assert_eq!(store.message_count().await, 2);
    }

    #[tokio::test]
    async fn memory_store_rejects_unknown_conversation() {
        let store = MemoryChatStore::new();
        let err = store
            .append_message(ConversationId(7), &Message::user("x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::UnknownConversation(ConversationId(7))
        ));
    }

    #[tokio::test]
    async fn jsonl_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let mut reply = Message::assistant("Hello");
        reply.reasoning_content = Some("think".to_string());

        let id = {
            let store = JsonlChatStore::new(dir.path());
            let id = store.append_new_conversation("Say hi").await.unwrap();
            store.append_message(id, &Message::user("Say hi")).await.unwrap();
            store.append_message(id, &reply).await.unwrap();
            id
        };

        let reopened = JsonlChatStore::new(dir.path());
        let conversations = reopened.list_conversations().await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id, id);
        assert_eq!(conversations[0].title, "Say hi");
        assert_eq!(
            reopened.load_messages(id).await.unwrap(),
            vec![Message::user("Say hi"), reply]
        );

        let next = reopened.append_new_conversation("again").await.unwrap();
        assert!(next > id);
        let record = reopened
            .append_message(next, &Message::user("again"))
            .await
            .unwrap();
        assert_eq!(record, RecordId(3));
    }

    #[tokio::test]
    async fn jsonl_store_renames_conversations() {
        let dir = TempDir::new().unwrap();
        let store = JsonlChatStore::new(dir.path());
        let id = store.append_new_conversation("first").await.unwrap();
        store.rename_conversation(id, "Renamed").await.unwrap();

        let reopened = JsonlChatStore::new(dir.path());
        assert_eq!(reopened.list_conversations().await.unwrap()[0].title, "Renamed");
        assert!(matches!(
            reopened.rename_conversation(ConversationId(99), "x").await,
            Err(PersistenceError::UnknownConversation(_))
        ));
    }

    #[tokio::test]
    async fn jsonl_store_reports_corrupt_lines() {
        let dir = TempDir::new().unwrap();
        let store = JsonlChatStore::new(dir.path());
        let id = store.append_new_conversation("x").await.unwrap();
        store.append_message(id, &Message::user("x")).await.unwrap();

        let path = store.conversation_path(id);
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{not json\n");
        std::fs::write(&path, contents).unwrap();

        match store.load_messages(id).await {
            Err(PersistenceError::Corrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corrupt error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_index_write_leaves_cache_untouched() {
        let dir = TempDir::new().unwrap();
        let store = JsonlChatStore::new(dir.path());
        store.append_new_conversation("real").await.unwrap();

        let index_path = dir.path().join(INDEX_FILE);
        std::fs::remove_file(&index_path).unwrap();
        std::fs::create_dir(&index_path).unwrap();
        assert!(store.append_new_conversation("lost").await.is_err());
        assert_eq!(store.list_conversations().await.unwrap().len(), 1);

        std::fs::remove_dir(&index_path).unwrap();
        let later = store.append_new_conversation("later").await.unwrap();
        assert_eq!(later, ConversationId(2));

        let titles: Vec<String> = JsonlChatStore::new(dir.path())
            .list_conversations()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["real", "later"]);
    }

    #[tokio::test]
    async fn memory_store_deletes_conversation_and_messages() {
        let store = MemoryChatStore::new();
        let keep = store.append_new_conversation("keep").await.unwrap();
        let gone = store.append_new_conversation("drop").await.unwrap();
        store.append_message(keep, &Message::user("keep")).await.unwrap();
        store.append_message(gone, &Message::user("drop")).await.unwrap();

        store.delete_conversation(gone).await.unwrap();

        assert_eq!(store.message_count().await, 1);
        assert!(matches!(
            store.load_messages(gone).await,
            Err(PersistenceError::UnknownConversation(_))
        ));
        assert!(matches!(
            store.delete_conversation(gone).await,
            Err(PersistenceError::UnknownConversation(_))
        ));
        let next = store.append_new_conversation("next").await.unwrap();
        assert_eq!(next, ConversationId(3));
    }

    #[tokio::test]
    async fn jsonl_store_deletes_index_entry_and_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonlChatStore::new(dir.path());
        let keep = store.append_new_conversation("keep").await.unwrap();
        let gone = store.append_new_conversation("drop").await.unwrap();
        store.append_message(gone, &Message::user("drop")).await.unwrap();
        let path = store.conversation_path(gone);
        assert!(path.exists());

        store.delete_conversation(gone).await.unwrap();

        assert!(!path.exists());
        let reopened = JsonlChatStore::new(dir.path());
        let ids: Vec<ConversationId> = reopened
            .list_conversations()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![keep]);
        assert!(matches!(
            reopened.delete_conversation(gone).await,
            Err(PersistenceError::UnknownConversation(_))
        ));
        assert!(reopened.append_new_conversation("new").await.unwrap() > gone);
    }

    #[tokio::test]
    async fn jsonl_store_deletes_conversation_without_messages() {
        let dir = TempDir::new().unwrap();
        let store = JsonlChatStore::new(dir.path());
        let id = store.append_new_conversation("empty").await.unwrap();
        store.delete_conversation(id).await.unwrap();
        assert!(store.list_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_matches_titles_ignoring_case() {
        let store = MemoryChatStore::new();
        store.append_new_conversation("Rust lifetimes").await.unwrap();
        store.append_new_conversation("Dinner ideas").await.unwrap();
        store.append_new_conversation("trust issues").await.unwrap();

        let titles = |found: Vec<ConversationSummary>| -> Vec<String> {
            found.into_iter().map(|c| c.title).collect()
        };
        assert_eq!(
            titles(store.search_conversations("RUST").await.unwrap()),
            vec!["Rust lifetimes", "trust issues"]
        );
        assert!(store.search_conversations("pasta").await.unwrap().is_empty());
        assert_eq!(store.search_conversations("  ").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn empty_directory_has_no_history() {
        let dir = TempDir::new().unwrap();
        let store = JsonlChatStore::new(dir.path().join("missing"));
        assert!(store.list_conversations().await.unwrap().is_empty());
    }
}
