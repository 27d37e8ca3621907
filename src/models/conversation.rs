use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation record. `last_message_at` is the authoritative ordering
/// timestamp for the sidebar and is deliberately decoupled from message
/// count or window contents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
    pub is_ai_chat: bool,
    pub participants: Vec<String>,
    pub last_message_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new_direct(id: impl Into<String>, participants: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            is_group: false,
            is_ai_chat: false,
            participants,
            last_message_at: Utc::now(),
        }
    }

    pub fn new_ai_chat(id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            is_group: false,
            is_ai_chat: true,
            participants: vec![owner.into()],
            last_message_at: Utc::now(),
        }
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// Drop a participant. Returns whether anything changed.
    pub fn remove_participant(&mut self, user_id: &str) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p != user_id);
        self.participants.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_participant_is_idempotent() {
        let mut conv =
            Conversation::new_direct("c1", vec!["alice".to_string(), "bob".to_string()]);
        assert!(conv.remove_participant("bob"));
        assert!(!conv.remove_participant("bob"));
        assert_eq!(conv.participants, vec!["alice".to_string()]);
    }
}
