use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::message::{Message, MessagePatch};

/// Shared handle to the timeline cache. Every component reads and writes the
/// timeline exclusively through this handle; no other mutation path exists.
pub type SharedTimeline = Arc<Mutex<TimelineCache>>;

pub fn shared_timeline() -> SharedTimeline {
    Arc::new(Mutex::new(TimelineCache::new()))
}

/// One conversation's materialized window: a contiguous, ordered,
/// deduplicated run of messages. Stored ascending by `(created_at, id)`;
/// network pages arrive newest-first and are merged in through the same
/// sorted-insert path, so `messages()` is already display order.
#[derive(Debug, Default)]
pub struct TimelineWindow {
    messages: Vec<Message>,
}

impl TimelineWindow {
    /// Insert or merge-in-place. Returns true only for a brand-new entry;
    /// replaying a message that is already present merges its fields and
    /// returns false.
    fn upsert(&mut self, message: Message) -> bool {
        if let Some(pos) = self.position_of(&message.id) {
            let moved = self.messages[pos].merge_from(&message);
            if moved {
                self.reposition(pos);
            }
            return false;
        }

        // Fast paths: most traffic is an append at the tail (new message) or
        // an insert at the head (older page).
        if self.messages.is_empty()
            || message.sort_key() >= self.messages[self.messages.len() - 1].sort_key()
        {
            self.messages.push(message);
        } else if message.sort_key() <= self.messages[0].sort_key() {
            self.messages.insert(0, message);
        } else {
            let idx = self
                .messages
                .binary_search_by(|m| m.sort_key().cmp(&message.sort_key()))
                .unwrap_or_else(|idx| idx);
            self.messages.insert(idx, message);
        }
        true
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Move the entry at `pos` to wherever its (possibly changed) sort key
    /// now belongs.
    fn reposition(&mut self, pos: usize) {
        let message = self.messages.remove(pos);
        let idx = self
            .messages
            .binary_search_by(|m| m.sort_key().cmp(&message.sort_key()))
            .unwrap_or_else(|idx| idx);
        self.messages.insert(idx, message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// The canonical, per-conversation, paginated, deduplicated, ordered set of
/// messages. Single source of truth for rendering; all mutation entry points
/// are idempotent under replay and never error on a missing id.
#[derive(Debug, Default)]
pub struct TimelineCache {
    windows: HashMap<String, TimelineWindow>,
}

impl TimelineCache {
    pub fn new() -> Self {
        Self {
            windows: HashMap::new(),
        }
    }

    /// Insert a message, or merge it into an existing entry with the same id.
    /// Returns whether this was a new insertion — the scroll anchor and the
    /// conversation list use that flag to decide on bump behavior.
    pub fn insert_sorted(&mut self, conversation_id: &str, message: Message) -> bool {
        self.windows
            .entry(conversation_id.to_string())
            .or_default()
            .upsert(message)
    }

    /// Shallow-merge fields into an existing entry. Returns whether anything
    /// visibly changed; a replayed identical patch is a no-op. A patch aimed
    /// at a removed id is an expected race (reconciliation may have discarded
    /// the entry concurrently): it is logged and dropped, never an error.
    pub fn patch(&mut self, conversation_id: &str, id: &str, patch: MessagePatch) -> bool {
        let Some(window) = self.windows.get_mut(conversation_id) else {
            debug!(conversation_id, id, "patch for unknown conversation dropped");
            return false;
        };
        let Some(pos) = window.position_of(id) else {
            warn!(conversation_id, id, "patch target not in timeline, dropping");
            return false;
        };
        let effect = window.messages[pos].apply_patch(patch);
        if effect.moved {
            window.reposition(pos);
        }
        effect.changed
    }

    /// Remove an entry, used to discard a stale failed attempt before its
    /// retry is inserted. Missing ids are a no-op.
    pub fn remove_by_id(&mut self, conversation_id: &str, id: &str) -> bool {
        let Some(window) = self.windows.get_mut(conversation_id) else {
            return false;
        };
        match window.position_of(id) {
            Some(pos) => {
                window.messages.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Prepend a page of older messages (fetched newest-first from the
    /// network) without disturbing the already-materialized suffix. Returns
    /// how many entries were actually new.
    pub fn extend_older(&mut self, conversation_id: &str, page: Vec<Message>) -> usize {
        let window = self.windows.entry(conversation_id.to_string()).or_default();
        let mut inserted = 0;
        for message in page {
            if window.upsert(message) {
                inserted += 1;
            }
        }
        inserted
    }

    /// Continuation cursor for the next older page: the id of the oldest
    /// message currently materialized. Id-based, so concurrent inserts at
    /// the tail never shift it.
    pub fn oldest_cursor(&self, conversation_id: &str) -> Option<String> {
        self.windows
            .get(conversation_id)?
            .messages
            .first()
            .map(|m| m.id.clone())
    }

    /// Oldest-first view for the renderer. Pure: borrows stored order.
    pub fn display(&self, conversation_id: &str) -> &[Message] {
        self.windows
            .get(conversation_id)
            .map(|w| w.messages())
            .unwrap_or(&[])
    }

    pub fn last_message(&self, conversation_id: &str) -> Option<&Message> {
        self.windows.get(conversation_id)?.last()
    }

    pub fn get(&self, conversation_id: &str, id: &str) -> Option<&Message> {
        self.windows.get(conversation_id)?.get(id)
    }

    /// Drop a conversation's whole window (conversation deleted).
    pub fn evict(&mut self, conversation_id: &str) -> bool {
        self.windows.remove(conversation_id).is_some()
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        self.windows.get(conversation_id).map_or(0, |w| w.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::{DeliveryState, MessageKind};
    use chrono::{TimeZone, Utc};

    fn msg(id: &str, at: i64) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: "alice".into(),
            created_at: Utc.timestamp_opt(at, 0).unwrap(),
            kind: MessageKind::Text,
            body: Some(format!("body-{id}")),
            image: None,
            is_ai: false,
            state: DeliveryState::Confirmed,
            seen_by: Vec::new(),
        }
    }

    fn ids(cache: &TimelineCache) -> Vec<String> {
        cache.display("c1").iter().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn test_arbitrary_arrival_order_is_sorted() {
        // Several permutations of the same set must materialize identically.
        let arrivals: [&[(&str, i64)]; 3] = [
            &[("a", 10), ("b", 20), ("c", 30), ("d", 40)],
            &[("d", 40), ("b", 20), ("a", 10), ("c", 30)],
            &[("c", 30), ("a", 10), ("d", 40), ("b", 20)],
        ];
        for arrival in arrivals {
            let mut cache = TimelineCache::new();
            for (id, at) in arrival {
                cache.insert_sorted("c1", msg(id, *at));
            }
            assert_eq!(ids(&cache), vec!["a", "b", "c", "d"]);
        }
    }

    #[test]
    fn test_id_tiebreak_on_equal_timestamps() {
        let mut cache = TimelineCache::new();
        cache.insert_sorted("c1", msg("b", 10));
        cache.insert_sorted("c1", msg("a", 10));
        cache.insert_sorted("c1", msg("c", 10));
        assert_eq!(ids(&cache), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_insert_merges_fields_from_later_write() {
        let mut cache = TimelineCache::new();
        let mut optimistic = msg("m1", 10);
        optimistic.state = DeliveryState::Pending;
        assert!(cache.insert_sorted("c1", optimistic));

        let echo = msg("m1", 10);
        assert!(!cache.insert_sorted("c1", echo));

        assert_eq!(cache.len("c1"), 1);
        let stored = cache.get("c1", "m1").unwrap();
        assert_eq!(stored.state, DeliveryState::Confirmed);
    }

    #[test]
    fn test_patch_missing_id_is_noop() {
        let mut cache = TimelineCache::new();
        cache.insert_sorted("c1", msg("m1", 10));
        assert!(!cache.patch("c1", "ghost", MessagePatch::body("x")));
        assert!(!cache.patch("nope", "m1", MessagePatch::body("x")));
        assert_eq!(cache.display("c1").len(), 1);
        assert_eq!(cache.get("c1", "m1").unwrap().body.as_deref(), Some("body-m1"));
    }

    #[test]
    fn test_replayed_patch_reports_no_change() {
        let mut cache = TimelineCache::new();
        cache.insert_sorted("c1", msg("m1", 10));
        assert!(cache.patch("c1", "m1", MessagePatch::seen_by(vec!["bob".into()])));
        // Identical replay: target exists, nothing visibly changes.
        assert!(!cache.patch("c1", "m1", MessagePatch::seen_by(vec!["bob".into()])));
        assert!(!cache.patch("c1", "m1", MessagePatch::body("body-m1")));
    }

    #[test]
    fn test_patch_created_at_repositions() {
        let mut cache = TimelineCache::new();
        cache.insert_sorted("c1", msg("a", 10));
        cache.insert_sorted("c1", msg("b", 20));
        let patch = MessagePatch {
            created_at: Some(Utc.timestamp_opt(30, 0).unwrap()),
            ..Default::default()
        };
        assert!(cache.patch("c1", "a", patch));
        assert_eq!(ids(&cache), vec!["b", "a"]);
    }

    #[test]
    fn test_extend_older_no_gap_no_dup() {
        let mut cache = TimelineCache::new();
        // Suffix already rendered.
        cache.insert_sorted("c1", msg("d", 40));
        cache.insert_sorted("c1", msg("e", 50));

        // Older page arrives newest-first and overlaps the suffix boundary.
        let page = vec![msg("d", 40), msg("c", 30), msg("b", 20)];
        let inserted = cache.extend_older("c1", page);
        assert_eq!(inserted, 2);
        assert_eq!(ids(&cache), vec!["b", "c", "d", "e"]);
    }

    #[test]
    fn test_cursor_is_stable_under_tail_inserts() {
        let mut cache = TimelineCache::new();
        cache.insert_sorted("c1", msg("b", 20));
        cache.insert_sorted("c1", msg("c", 30));
        let cursor = cache.oldest_cursor("c1");
        assert_eq!(cursor.as_deref(), Some("b"));

        // New real-time messages at the tail must not shift the cursor.
        cache.insert_sorted("c1", msg("z", 99));
        assert_eq!(cache.oldest_cursor("c1").as_deref(), Some("b"));

        // Only an older prepend moves it.
        cache.extend_older("c1", vec![msg("a", 10)]);
        assert_eq!(cache.oldest_cursor("c1").as_deref(), Some("a"));
    }

    #[test]
    fn test_remove_then_reinsert_for_server_assigned_id() {
        let mut cache = TimelineCache::new();
        let mut pending = msg("client-1", 10);
        pending.state = DeliveryState::Pending;
        cache.insert_sorted("c1", pending);

        assert!(cache.remove_by_id("c1", "client-1"));
        cache.insert_sorted("c1", msg("server-9", 10));

        assert_eq!(ids(&cache), vec!["server-9"]);
        assert!(!cache.remove_by_id("c1", "client-1"));
    }

    #[test]
    fn test_evict_drops_window() {
        let mut cache = TimelineCache::new();
        cache.insert_sorted("c1", msg("a", 10));
        assert!(cache.evict("c1"));
        assert!(cache.display("c1").is_empty());
        assert!(!cache.evict("c1"));
    }
}
