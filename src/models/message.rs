use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Body shown in place of an assistant reply whose stream failed or was
/// aborted. The provisional text is replaced wholesale, never left partial.
pub const AI_FAILURE_BODY: &str =
    "Something went wrong while generating this response. Retry to try again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    System,
}

/// Delivery lifecycle of a single message attempt.
///
/// `Pending` and `Streaming` are transient and local-only. `Confirmed` and
/// `Failed` are terminal for the attempt; a retry spawns a new attempt rather
/// than resurrecting this one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Streaming,
    Confirmed,
    Failed,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Confirmed | DeliveryState::Failed)
    }
}

/// The atomic unit of a conversation timeline.
///
/// A message keeps the same id across its whole lifecycle: client-generated
/// ids are acceptable as permanent ids and are not replaced on confirmation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub image: Option<String>,
    pub is_ai: bool,
    pub state: DeliveryState,
    /// Users who have observed this message. Only meaningful for the most
    /// recent message in a conversation.
    #[serde(default)]
    pub seen_by: Vec<String>,
}

impl Message {
    /// Build a pending, user-authored text message with a fresh client id.
    pub fn new_pending_text(conversation_id: &str, sender_id: &str, body: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            created_at: Utc::now(),
            kind: MessageKind::Text,
            body: Some(body),
            image: None,
            is_ai: false,
            state: DeliveryState::Pending,
            seen_by: Vec::new(),
        }
    }

    /// Build a pending, user-authored image message with a fresh client id.
    pub fn new_pending_image(conversation_id: &str, sender_id: &str, image: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            created_at: Utc::now(),
            kind: MessageKind::Image,
            body: None,
            image: Some(image),
            is_ai: false,
            state: DeliveryState::Pending,
            seen_by: Vec::new(),
        }
    }

    /// Total-order key within a conversation: `(created_at, id)` ascending,
    /// id used only as a tie-break.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }

    /// Apply a lifecycle transition, enforcing monotonicity.
    ///
    /// Pending/Streaming may move to any state; a terminal state only accepts
    /// `Confirmed` (the server is authoritative — a late echo may confirm an
    /// attempt the client already gave up on). Anything else is ignored and
    /// logged, returning false.
    pub fn apply_state(&mut self, next: DeliveryState) -> bool {
        use DeliveryState::*;
        if self.state == next {
            return true;
        }
        match (self.state, next) {
            (Pending | Streaming, _) => {
                self.state = next;
                true
            }
            (Failed, Confirmed) => {
                debug!(id = %self.id, "late confirmation of a failed attempt");
                self.state = Confirmed;
                true
            }
            (from, to) => {
                warn!(id = %self.id, ?from, ?to, "ignoring non-monotonic lifecycle transition");
                false
            }
        }
    }

    /// Merge an authoritative copy of the same logical message into this
    /// entry. Field values come from the later write; the lifecycle still
    /// moves monotonically. Returns true if `created_at` changed (the caller
    /// must re-sort).
    pub fn merge_from(&mut self, other: &Message) -> bool {
        debug_assert_eq!(self.id, other.id);
        let moved = self.created_at != other.created_at;
        self.created_at = other.created_at;
        self.sender_id = other.sender_id.clone();
        self.kind = other.kind;
        self.body = other.body.clone();
        self.image = other.image.clone();
        self.is_ai = other.is_ai;
        if !other.seen_by.is_empty() {
            self.seen_by = other.seen_by.clone();
        }
        self.apply_state(other.state);
        moved
    }

    /// Apply a partial-field patch, reporting what it did: `changed` is false
    /// for a patch that left every field as it was (replays), `moved` flags a
    /// `created_at` change the caller must re-sort for.
    pub fn apply_patch(&mut self, patch: MessagePatch) -> PatchEffect {
        let mut effect = PatchEffect::default();
        if let Some(body) = patch.body
            && self.body.as_ref() != Some(&body)
        {
            self.body = Some(body);
            effect.changed = true;
        }
        if let Some(image) = patch.image
            && self.image.as_ref() != Some(&image)
        {
            self.image = Some(image);
            effect.changed = true;
        }
        if let Some(state) = patch.state {
            let before = self.state;
            self.apply_state(state);
            effect.changed |= self.state != before;
        }
        if let Some(seen_by) = patch.seen_by
            && self.seen_by != seen_by
        {
            self.seen_by = seen_by;
            effect.changed = true;
        }
        if let Some(at) = patch.created_at
            && at != self.created_at
        {
            self.created_at = at;
            effect.changed = true;
            effect.moved = true;
        }
        effect
    }
}

/// What `apply_patch` actually did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatchEffect {
    pub changed: bool,
    pub moved: bool,
}

/// Shallow partial-field merge carrier for `TimelineCache::patch`.
#[derive(Clone, Debug, Default)]
pub struct MessagePatch {
    pub body: Option<String>,
    pub image: Option<String>,
    pub state: Option<DeliveryState>,
    pub created_at: Option<DateTime<Utc>>,
    pub seen_by: Option<Vec<String>>,
}

impl MessagePatch {
    pub fn state(state: DeliveryState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Default::default()
        }
    }

    pub fn seen_by(seen_by: Vec<String>) -> Self {
        Self {
            seen_by: Some(seen_by),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(state: DeliveryState) -> Message {
        Message {
            id: "m1".into(),
            conversation_id: "c1".into(),
            sender_id: "alice".into(),
            created_at: Utc.timestamp_opt(1_000, 0).unwrap(),
            kind: MessageKind::Text,
            body: Some("hello".into()),
            image: None,
            is_ai: false,
            state,
            seen_by: Vec::new(),
        }
    }

    #[test]
    fn test_pending_moves_to_confirmed() {
        let mut m = msg(DeliveryState::Pending);
        assert!(m.apply_state(DeliveryState::Confirmed));
        assert_eq!(m.state, DeliveryState::Confirmed);
    }

    #[test]
    fn test_confirmed_never_demotes() {
        let mut m = msg(DeliveryState::Confirmed);
        assert!(!m.apply_state(DeliveryState::Pending));
        assert!(!m.apply_state(DeliveryState::Streaming));
        assert_eq!(m.state, DeliveryState::Confirmed);
    }

    #[test]
    fn test_late_confirmation_of_failed_attempt() {
        let mut m = msg(DeliveryState::Failed);
        assert!(m.apply_state(DeliveryState::Confirmed));
        assert_eq!(m.state, DeliveryState::Confirmed);
    }

    #[test]
    fn test_merge_keeps_confirmed_state() {
        let mut local = msg(DeliveryState::Confirmed);
        let mut echo = msg(DeliveryState::Pending);
        echo.body = Some("hello again".into());
        local.merge_from(&echo);
        assert_eq!(local.state, DeliveryState::Confirmed);
        assert_eq!(local.body.as_deref(), Some("hello again"));
    }

    #[test]
    fn test_merge_reports_timestamp_move() {
        let mut local = msg(DeliveryState::Pending);
        let mut confirmed = msg(DeliveryState::Confirmed);
        confirmed.created_at = Utc.timestamp_opt(2_000, 0).unwrap();
        assert!(local.merge_from(&confirmed));
        assert_eq!(local.created_at, confirmed.created_at);
    }

    #[test]
    fn test_patch_reports_what_changed() {
        let mut m = msg(DeliveryState::Pending);
        let effect = m.apply_patch(MessagePatch::state(DeliveryState::Confirmed));
        assert_eq!(effect, PatchEffect { changed: true, moved: false });

        // Replaying the identical patch is a visible no-op.
        let effect = m.apply_patch(MessagePatch::state(DeliveryState::Confirmed));
        assert!(!effect.changed);
        let effect = m.apply_patch(MessagePatch::body("hello"));
        assert!(!effect.changed);
        let effect = m.apply_patch(MessagePatch::seen_by(Vec::new()));
        assert!(!effect.changed);

        let effect = m.apply_patch(MessagePatch {
            created_at: Some(Utc.timestamp_opt(2_000, 0).unwrap()),
            ..Default::default()
        });
        assert_eq!(effect, PatchEffect { changed: true, moved: true });
    }

    #[test]
    fn test_patch_roundtrip_serde() {
        let m = msg(DeliveryState::Confirmed);
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
    }
}
