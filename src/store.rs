use crate::message::Message;
use crate::storage::Storage;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Storage keys shared with the original clients.
pub const TRANSCRIPT_KEY: &str = "chatMessages";
pub const CONVERSATION_ID_KEY: &str = "conversation_id";

/// Durable, ordered conversation transcript plus the conversation
/// identifier.
///
/// Every mutation persists the transcript as one complete JSON snapshot
/// under a single key, so a reader never observes a partial write.
/// Persistence failures are logged and swallowed: the in-memory transcript
/// keeps working and nothing reaches the user as an error.
pub struct ConversationStore {
    storage: Arc<dyn Storage>,
    // Held across the persist await so snapshots hit storage in append order.
    messages: Mutex<Vec<Message>>,
}

impl ConversationStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Restores the persisted transcript. Missing or unparsable data falls
    /// back to an empty transcript; the failure is logged only.
    pub async fn load(&self) {
        let mut messages = self.messages.lock().await;

        match self.storage.get(TRANSCRIPT_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Message>>(&raw) {
                Ok(saved) => {
                    debug!(count = saved.len(), "restored transcript");
                    *messages = saved;
                }
                Err(error) => {
                    warn!(%error, "failed to parse saved transcript, starting empty");
                    *messages = Vec::new();
                }
            },
            Ok(None) => {
                *messages = Vec::new();
            }
            Err(error) => {
                warn!(%error, "failed to load transcript, starting empty");
                *messages = Vec::new();
            }
        }
    }

    /// Appends one message and persists the full transcript snapshot.
    pub async fn append(&self, message: Message) {
        let mut messages = self.messages.lock().await;
        messages.push(message);

        match serde_json::to_string(&*messages) {
            Ok(snapshot) => {
                if let Err(error) = self.storage.set(TRANSCRIPT_KEY, &snapshot).await {
                    warn!(%error, "failed to persist transcript");
                }
            }
            Err(error) => warn!(%error, "failed to serialize transcript"),
        }
    }

    /// Erases the persisted transcript and resets the in-memory one.
    pub async fn clear(&self) {
        let mut messages = self.messages.lock().await;
        messages.clear();

        if let Err(error) = self.storage.remove(TRANSCRIPT_KEY).await {
            warn!(%error, "failed to clear persisted transcript");
        }
    }

    /// Snapshot of the current transcript, oldest first.
    pub async fn messages(&self) -> Vec<Message> {
        self.messages.lock().await.clone()
    }

    /// Returns the persisted conversation identifier, generating and
    /// persisting a fresh one if none exists. Idempotent.
    pub async fn ensure_conversation_id(&self) -> String {
        match self.storage.get(CONVERSATION_ID_KEY).await {
            Ok(Some(id)) if !id.is_empty() => id,
            Ok(_) => self.persist_new_conversation_id().await,
            Err(error) => {
                // The send cycle still needs an identifier even when the
                // storage layer is unavailable.
                warn!(%error, "failed to read conversation id");
                Uuid::new_v4().to_string()
            }
        }
    }

    /// Generates and persists a new identifier, discarding the old one.
    pub async fn rotate_conversation_id(&self) -> String {
        self.persist_new_conversation_id().await
    }

    /// Persists a server-confirmed identifier verbatim.
    pub async fn set_conversation_id(&self, id: &str) {
        if let Err(error) = self.storage.set(CONVERSATION_ID_KEY, id).await {
            warn!(%error, "failed to persist conversation id");
        }
    }

    async fn persist_new_conversation_id(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.set_conversation_id(&id).await;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn store() -> (Arc<MemoryStorage>, ConversationStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = ConversationStore::new(storage.clone());
        (storage, store)
    }

    #[tokio::test]
    async fn append_keeps_order_and_persists_snapshot() {
        let (storage, store) = store();

        store.append(Message::user("첫번째")).await;
        store.append(Message::assistant_text("답변")).await;
        store.append(Message::user("두번째")).await;

        let messages = store.messages().await;
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["첫번째", "답변", "두번째"]);

        // The persisted snapshot matches the in-memory transcript, under
        // the key the original clients read.
        let raw = storage.get("chatMessages").await.unwrap().unwrap();
        let saved: Vec<Message> = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved, messages);
    }

    #[tokio::test]
    async fn load_restores_persisted_transcript() {
        let storage = Arc::new(MemoryStorage::new());

        {
            let store = ConversationStore::new(storage.clone());
            store.append(Message::user("안녕")).await;
        }

        let store = ConversationStore::new(storage);
        store.load().await;
        let messages = store.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "안녕");
    }

    #[tokio::test]
    async fn load_falls_back_to_empty_on_garbage() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(TRANSCRIPT_KEY, "not json at all").await.unwrap();

        let store = ConversationStore::new(storage);
        store.load().await;
        assert!(store.messages().await.is_empty());
    }

    #[tokio::test]
    async fn clear_erases_memory_and_storage() {
        let (storage, store) = store();
        store.append(Message::user("안녕")).await;

        store.clear().await;

        assert!(store.messages().await.is_empty());
        assert_eq!(storage.get(TRANSCRIPT_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ensure_conversation_id_is_idempotent() {
        let (_storage, store) = store();

        let first = store.ensure_conversation_id().await;
        let second = store.ensure_conversation_id().await;
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[tokio::test]
    async fn rotate_conversation_id_generates_a_fresh_one() {
        let (storage, store) = store();

        let before = store.ensure_conversation_id().await;
        let after = store.rotate_conversation_id().await;
        assert_ne!(before, after);

        // The rotated identifier is the persisted one.
        assert_eq!(
            storage.get(CONVERSATION_ID_KEY).await.unwrap().as_deref(),
            Some(after.as_str())
        );
    }
}
