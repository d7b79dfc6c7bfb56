use crate::backend::{ChatBackend, ChatRequest, ChatResponse};
use crate::message::{normalize_map_data, Message};
use crate::store::ConversationStore;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Shown instead of a raw error whenever the chat call fails.
pub const APOLOGY_TEXT: &str = "죄송해요, 일시적인 오류가 발생했어요. 다시 시도해주세요. 😢";

/// Caption for map replies that arrive without content.
pub const DEFAULT_MAP_CAPTION: &str = "위치를 지도에 표시해 드려요! 📍";

/// Initial typing-indicator caption; status-stream events replace it.
pub const DEFAULT_TYPING_CAPTION: &str = "생각 정리 중..";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The cycle ran to completion (the reply may be the apology text).
    Sent,
    /// Empty or whitespace-only input; nothing happened.
    EmptyInput,
    /// Another send was in flight; this one was ignored.
    Busy,
}

/// Drives one send/receive cycle against the chat backend.
///
/// At most one send is in flight per controller; concurrent calls are
/// rejected, not queued. Every failure path resolves to a user-visible
/// fallback, so `send` itself never errors.
pub struct ChatController {
    store: Arc<ConversationStore>,
    backend: Arc<dyn ChatBackend>,
    stream_status: bool,
    sending: tokio::sync::Mutex<()>,
    loading: watch::Sender<bool>,
    status: watch::Sender<Option<String>>,
}

impl ChatController {
    pub fn new(
        store: Arc<ConversationStore>,
        backend: Arc<dyn ChatBackend>,
        stream_status: bool,
    ) -> Self {
        let (loading, _) = watch::channel(false);
        let (status, _) = watch::channel(None);
        Self {
            store,
            backend,
            stream_status,
            sending: tokio::sync::Mutex::new(()),
            loading,
            status,
        }
    }

    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    /// Watch handle for the loading flag, for views that want to react.
    pub fn loading_changes(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    /// Current typing-indicator caption, if a cycle is running.
    pub fn status_caption(&self) -> Option<String> {
        self.status.borrow().clone()
    }

    pub fn status_changes(&self) -> watch::Receiver<Option<String>> {
        self.status.subscribe()
    }

    /// Runs one full chat cycle: append the user message, call the backend,
    /// append the classified reply (or the apology text), always leaving
    /// the loading flag cleared and the status channel closed.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::EmptyInput;
        }

        // Single-flight: a second send while one is pending is dropped.
        let _guard = match self.sending.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("send ignored, another request is in flight");
                return SendOutcome::Busy;
            }
        };

        self.store.append(Message::user(text)).await;
        self.loading.send_replace(true);
        self.status
            .send_replace(Some(DEFAULT_TYPING_CAPTION.to_string()));

        let conversation_id = self.store.ensure_conversation_id().await;
        let status_task = if self.stream_status {
            self.spawn_status_task(&conversation_id).await
        } else {
            None
        };

        let request = ChatRequest {
            message: text.to_string(),
            conversation_id,
        };

        match self.backend.chat(&request).await {
            Ok(response) => {
                // The server may rename or confirm the identifier.
                if let Some(id) = response
                    .conversation_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                {
                    self.store.set_conversation_id(id).await;
                }
                self.store.append(classify_response(response)).await;
            }
            Err(error) => {
                warn!(%error, "chat request failed");
                self.store.append(Message::assistant_text(APOLOGY_TEXT)).await;
            }
        }

        if let Some(task) = status_task {
            task.abort();
        }
        self.status.send_replace(None);
        self.loading.send_replace(false);

        SendOutcome::Sent
    }

    /// Explicit "대화 초기화": drops the transcript but keeps the
    /// conversation identifier.
    pub async fn reset(&self) {
        self.store.clear().await;
    }

    /// Page-unload hook: the next visit starts a fresh conversation instead
    /// of resuming one whose identifier the backend may have expired.
    pub async fn on_unload(&self) {
        self.store.clear().await;
        self.store.rotate_conversation_id().await;
    }

    async fn spawn_status_task(&self, conversation_id: &str) -> Option<JoinHandle<()>> {
        match self.backend.status_stream(conversation_id).await {
            Ok(mut stream) => {
                let status = self.status.clone();
                Some(tokio::spawn(async move {
                    while let Some(update) = stream.next().await {
                        status.send_replace(Some(update));
                    }
                }))
            }
            Err(error) => {
                // The chat call proceeds without live status updates.
                debug!(%error, "status stream unavailable");
                None
            }
        }
    }
}

/// Maps a backend response onto a transcript entry. Map responses get their
/// payload normalized to a list and fall back to a fixed caption when the
/// content is empty; anything else is plain assistant text.
fn classify_response(response: ChatResponse) -> Message {
    if response.kind.as_deref() == Some("map") {
        let data = response
            .data
            .map(normalize_map_data)
            .filter(|entries| !entries.is_empty());
        let content = response
            .content
            .filter(|content| !content.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MAP_CAPTION.to_string());
        Message::assistant_map(content, response.link, data)
    } else {
        Message::assistant_text(response.content.unwrap_or_default())
    }
}
