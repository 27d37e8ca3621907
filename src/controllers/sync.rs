use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::models::conversation::Conversation;
use crate::models::conversation_list::SharedConversationList;
use crate::models::timeline::SharedTimeline;
use crate::repositories::failure_repository::FailureRepository;
use crate::services::transport::ChatTransport;

/// Default page size for history pagination.
pub const HISTORY_PAGE_SIZE: usize = 50;

/// What a completed pagination request tells the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOutcome {
    /// Entries that were actually new to the window.
    pub inserted: usize,
    /// False once the server has no older history.
    pub has_more: bool,
}

/// Request/response synchronization: history pagination into the timeline
/// cache and conversation-list bootstrap. Real-time traffic goes through the
/// push bridge instead.
pub struct SyncController {
    timeline: SharedTimeline,
    conversations: SharedConversationList,
    transport: Arc<dyn ChatTransport>,
    failures: Arc<dyn FailureRepository>,
    viewer_id: String,
}

impl SyncController {
    pub fn new(
        timeline: SharedTimeline,
        conversations: SharedConversationList,
        transport: Arc<dyn ChatTransport>,
        failures: Arc<dyn FailureRepository>,
        viewer_id: impl Into<String>,
    ) -> Self {
        Self {
            timeline,
            conversations,
            transport,
            failures,
            viewer_id: viewer_id.into(),
        }
    }

    /// Load the latest page for a conversation being opened. Merges through
    /// the same sorted path as push traffic, so a window warmed by real-time
    /// events just gets backfilled.
    pub async fn load_latest(&self, conversation_id: &str) -> Result<PageOutcome> {
        let page = self
            .transport
            .fetch_older(conversation_id, None, HISTORY_PAGE_SIZE)
            .await
            .context("Failed to fetch latest page")?;
        Ok(self.merge_page(conversation_id, page))
    }

    /// Fetch the page older than what is currently materialized. The cursor
    /// is the oldest cached message id, so tail inserts never shift it.
    pub async fn load_older(&self, conversation_id: &str) -> Result<PageOutcome> {
        let cursor = self.timeline.lock().oldest_cursor(conversation_id);
        let page = self
            .transport
            .fetch_older(conversation_id, cursor.as_deref(), HISTORY_PAGE_SIZE)
            .await
            .context("Failed to fetch older page")?;
        Ok(self.merge_page(conversation_id, page))
    }

    fn merge_page(
        &self,
        conversation_id: &str,
        page: Vec<crate::models::message::Message>,
    ) -> PageOutcome {
        let has_more = page.len() >= HISTORY_PAGE_SIZE;
        let inserted = self.timeline.lock().extend_older(conversation_id, page);
        if inserted > 0 {
            let timeline = self.timeline.lock();
            let window = timeline.display(conversation_id);
            self.conversations
                .lock()
                .recompute_unread(conversation_id, window, &self.viewer_id);
        }
        PageOutcome { inserted, has_more }
    }

    /// Persist the viewer's read watermark server-side and zero the local
    /// unread count. Used where the backend expects the REST path instead of
    /// the channel signal.
    pub async fn mark_read(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        self.transport
            .mark_read(conversation_id, message_id)
            .await
            .context("Failed to persist read watermark")?;
        self.conversations.lock().mark_read(conversation_id, message_id);
        Ok(())
    }

    /// Replace the sidebar with the server's conversation set. Local-only
    /// entries disappear; this is the authoritative bootstrap at sign-in.
    pub async fn refresh_conversations(&self) -> Result<usize> {
        let fetched = self
            .transport
            .list_conversations()
            .await
            .context("Failed to list conversations")?;
        let count = fetched.len();
        let mut list = self.conversations.lock();
        for conversation in fetched {
            list.upsert(conversation);
        }
        info!(count, "conversation list refreshed");
        Ok(count)
    }

    pub async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation> {
        let created = self
            .transport
            .create_conversation(conversation)
            .await
            .context("Failed to create conversation")?;
        self.conversations.lock().upsert(created.clone());
        Ok(created)
    }

    /// Delete a conversation and evict all of its local state, including the
    /// durable failure records. Nothing may resurrect on the next launch.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        self.transport
            .delete_conversation(conversation_id)
            .await
            .context("Failed to delete conversation")?;
        self.timeline.lock().evict(conversation_id);
        self.conversations.lock().remove(conversation_id);
        self.failures
            .clear_for(conversation_id)
            .await
            .context("Failed to clear failure records for deleted conversation")?;
        Ok(())
    }
}
