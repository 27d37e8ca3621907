use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::conversation::Conversation;
use super::message::{Message, MessageKind};

/// Maximum preview length shown in the conversation list.
pub const PREVIEW_MAX_CHARS: usize = 50;

/// Shared handle to the conversation list. Updated at message-boundary
/// granularity only — never per streaming token.
pub type SharedConversationList = Arc<Mutex<ConversationListModel>>;

pub fn shared_conversation_list() -> SharedConversationList {
    Arc::new(Mutex::new(ConversationListModel::new()))
}

/// Truncate text for a list preview.
pub fn truncate_preview(text: &str) -> String {
    text.chars().take(PREVIEW_MAX_CHARS).collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConversationEntry {
    pub conversation: Conversation,
    pub preview: Option<String>,
    pub unread: u32,
    /// Id of the newest message the viewer has read; unread is always
    /// recomputable from this watermark.
    pub last_seen: Option<String>,
}

/// Ordered list of conversations with last-message preview and unread count.
/// Every setter is structural-equality-checked and reports whether anything
/// changed, so downstream re-renders can be suppressed.
#[derive(Debug, Default)]
pub struct ConversationListModel {
    entries: HashMap<String, ConversationEntry>,
}

impl ConversationListModel {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Insert or replace a conversation record. Returns whether the stored
    /// entry changed.
    pub fn upsert(&mut self, conversation: Conversation) -> bool {
        match self.entries.get_mut(&conversation.id) {
            Some(entry) => {
                if entry.conversation == conversation {
                    false
                } else {
                    entry.conversation = conversation;
                    true
                }
            }
            None => {
                self.entries.insert(
                    conversation.id.clone(),
                    ConversationEntry {
                        conversation,
                        preview: None,
                        unread: 0,
                        last_seen: None,
                    },
                );
                true
            }
        }
    }

    pub fn remove(&mut self, conversation_id: &str) -> bool {
        self.entries.remove(conversation_id).is_some()
    }

    pub fn get(&self, conversation_id: &str) -> Option<&ConversationEntry> {
        self.entries.get(conversation_id)
    }

    pub fn get_conversation_mut(&mut self, conversation_id: &str) -> Option<&mut Conversation> {
        self.entries
            .get_mut(conversation_id)
            .map(|e| &mut e.conversation)
    }

    /// All entries, newest activity first.
    pub fn ordered(&self) -> Vec<&ConversationEntry> {
        let mut entries: Vec<&ConversationEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| {
            (
                Reverse(e.conversation.last_message_at),
                e.conversation.id.clone(),
            )
        });
        entries
    }

    /// Record a delivered message: bump ordering timestamp, refresh the
    /// preview, and count it as unread when it is a newly-seen message from
    /// someone else. `newly_inserted` is the flag returned by
    /// `TimelineCache::insert_sorted`, which keeps replayed push events from
    /// inflating the counter.
    pub fn note_message(&mut self, message: &Message, viewer_id: &str, newly_inserted: bool) -> bool {
        let Some(entry) = self.entries.get_mut(&message.conversation_id) else {
            return false;
        };
        let mut changed = false;

        if message.created_at > entry.conversation.last_message_at {
            entry.conversation.last_message_at = message.created_at;
            changed = true;
        }

        let preview = Some(preview_for(message));
        if entry.preview != preview {
            entry.preview = preview;
            changed = true;
        }

        if newly_inserted && message.sender_id != viewer_id {
            entry.unread += 1;
            changed = true;
        }
        changed
    }

    /// Replace the preview text (already truncated here). Returns whether it
    /// changed.
    pub fn set_preview(&mut self, conversation_id: &str, preview: &str) -> bool {
        let Some(entry) = self.entries.get_mut(conversation_id) else {
            return false;
        };
        let truncated = Some(truncate_preview(preview));
        if entry.preview == truncated {
            false
        } else {
            entry.preview = truncated;
            true
        }
    }

    /// The viewer read everything up to `watermark_id`.
    pub fn mark_read(&mut self, conversation_id: &str, watermark_id: &str) -> bool {
        let Some(entry) = self.entries.get_mut(conversation_id) else {
            return false;
        };
        let changed = entry.unread != 0 || entry.last_seen.as_deref() != Some(watermark_id);
        entry.unread = 0;
        entry.last_seen = Some(watermark_id.to_string());
        changed
    }

    /// Recompute unread from the materialized window by walking back from the
    /// newest message until the watermark or one of the viewer's own
    /// messages. Never negative by construction.
    pub fn recompute_unread(&mut self, conversation_id: &str, window: &[Message], viewer_id: &str) {
        let Some(entry) = self.entries.get_mut(conversation_id) else {
            return;
        };
        let watermark = entry.last_seen.as_deref();
        let mut unread = 0u32;
        for message in window.iter().rev() {
            if message.sender_id == viewer_id {
                break;
            }
            if watermark == Some(message.id.as_str()) {
                break;
            }
            unread += 1;
        }
        entry.unread = unread;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn preview_for(message: &Message) -> String {
    match message.kind {
        MessageKind::Image => "[image]".to_string(),
        _ => truncate_preview(message.body.as_deref().unwrap_or_default()),
    }
}
