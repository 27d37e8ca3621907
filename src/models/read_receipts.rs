use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::debug;

use super::message::Message;

/// Minimum interval between outbound mark-seen signals for one conversation.
pub const SEEN_DEBOUNCE: Duration = Duration::from_millis(500);

/// Per-conversation read-receipt state: decides when to emit a single
/// "mark seen" signal for the newest message, and absorbs inbound seen-set
/// updates with an order-independent equality check so re-renders only happen
/// when the indicator actually changes.
#[derive(Debug, Default)]
pub struct ReadReceiptTracker {
    /// Id of the last message we emitted a mark-seen signal for.
    signaled: Option<String>,
    /// Seen-set of the currently-last message, as last rendered.
    seen: BTreeSet<String>,
    last_fire: Option<Instant>,
}

impl ReadReceiptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on every render of the timeline with the current last message.
    /// Returns the message id to mark as seen, at most once per change of
    /// "which message is last" and never more often than `SEEN_DEBOUNCE`.
    /// Re-renders with an unchanged last message are a no-op; a debounced
    /// call stays pending and fires on a later render.
    pub fn observe_last(
        &mut self,
        last: Option<&Message>,
        viewer_id: &str,
        now: Instant,
    ) -> Option<String> {
        let last = last?;
        if last.sender_id == viewer_id {
            return None;
        }
        if self.signaled.as_deref() == Some(last.id.as_str()) {
            return None;
        }
        if let Some(at) = self.last_fire
            && now.duration_since(at) < SEEN_DEBOUNCE
        {
            debug!(id = %last.id, "mark-seen debounced");
            return None;
        }
        self.signaled = Some(last.id.clone());
        self.last_fire = Some(now);
        Some(last.id.clone())
    }

    /// Apply an inbound seen-set update for the currently-last message.
    /// Returns whether the indicator changed — the comparison ignores order,
    /// so a reshuffled payload does not cause a re-render. A changed
    /// indicator grows the layout, which is why callers re-check the scroll
    /// anchor when this returns true.
    pub fn apply_seen_update(&mut self, seen_by: &[String]) -> bool {
        let next: BTreeSet<String> = seen_by.iter().cloned().collect();
        if next == self.seen {
            false
        } else {
            self.seen = next;
            true
        }
    }

    pub fn seen_by(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(String::as_str)
    }

    /// Component teardown: clear pending debounce state so a superseding
    /// view starts fresh.
    pub fn reset(&mut self) {
        self.signaled = None;
        self.seen.clear();
        self.last_fire = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::{DeliveryState, MessageKind};
    use chrono::{TimeZone, Utc};

    fn msg(id: &str, sender: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: sender.into(),
            created_at: Utc.timestamp_opt(100, 0).unwrap(),
            kind: MessageKind::Text,
            body: Some("hi".into()),
            image: None,
            is_ai: false,
            state: DeliveryState::Confirmed,
            seen_by: Vec::new(),
        }
    }

    #[test]
    fn test_fires_once_per_last_message() {
        let mut tracker = ReadReceiptTracker::new();
        let t0 = Instant::now();
        let m = msg("m1", "bob");

        assert_eq!(tracker.observe_last(Some(&m), "alice", t0), Some("m1".into()));
        // Re-render with the same last message: no re-fire, ever.
        assert_eq!(tracker.observe_last(Some(&m), "alice", t0 + SEEN_DEBOUNCE * 2), None);
    }

    #[test]
    fn test_fires_again_when_last_changes() {
        let mut tracker = ReadReceiptTracker::new();
        let t0 = Instant::now();
        tracker.observe_last(Some(&msg("m1", "bob")), "alice", t0);
        let t1 = t0 + SEEN_DEBOUNCE;
        assert_eq!(
            tracker.observe_last(Some(&msg("m2", "bob")), "alice", t1),
            Some("m2".into())
        );
    }

    #[test]
    fn test_debounce_defers_but_does_not_lose() {
        let mut tracker = ReadReceiptTracker::new();
        let t0 = Instant::now();
        tracker.observe_last(Some(&msg("m1", "bob")), "alice", t0);

        // A new last message inside the debounce window is deferred...
        let m2 = msg("m2", "bob");
        assert_eq!(tracker.observe_last(Some(&m2), "alice", t0 + Duration::from_millis(100)), None);
        // ...and fires on the next render after the window.
        assert_eq!(
            tracker.observe_last(Some(&m2), "alice", t0 + SEEN_DEBOUNCE),
            Some("m2".into())
        );
    }

    #[test]
    fn test_own_message_is_never_marked() {
        let mut tracker = ReadReceiptTracker::new();
        assert_eq!(
            tracker.observe_last(Some(&msg("m1", "alice")), "alice", Instant::now()),
            None
        );
    }

    #[test]
    fn test_seen_update_equality_ignores_order() {
        let mut tracker = ReadReceiptTracker::new();
        assert!(tracker.apply_seen_update(&["a".into(), "b".into()]));
        assert!(!tracker.apply_seen_update(&["b".into(), "a".into()]));
        assert!(tracker.apply_seen_update(&["a".into(), "b".into(), "c".into()]));
    }
}
