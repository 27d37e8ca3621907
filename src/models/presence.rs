use std::collections::BTreeSet;

/// Owned online-user state with an explicit mutation API. Every mutator is
/// structural-equality-checked and returns whether anything changed, so
/// redundant presence broadcasts never trigger downstream re-renders.
#[derive(Debug, Default)]
pub struct PresenceModel {
    online: BTreeSet<String>,
}

impl PresenceModel {
    pub fn new() -> Self {
        Self {
            online: BTreeSet::new(),
        }
    }

    /// Replace the whole set (response to a `get:onlineUsers` round-trip).
    pub fn set_online(&mut self, users: Vec<String>) -> bool {
        let next: BTreeSet<String> = users.into_iter().collect();
        if next == self.online {
            false
        } else {
            self.online = next;
            true
        }
    }

    pub fn user_online(&mut self, user_id: &str) -> bool {
        self.online.insert(user_id.to_string())
    }

    pub fn user_left(&mut self, user_id: &str) -> bool {
        self.online.remove(user_id)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    pub fn online_users(&self) -> impl Iterator<Item = &str> {
        self.online.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_online_is_order_independent() {
        let mut presence = PresenceModel::new();
        assert!(presence.set_online(vec!["a".into(), "b".into()]));
        assert!(!presence.set_online(vec!["b".into(), "a".into()]));
    }

    #[test]
    fn test_join_leave_changed_flags() {
        let mut presence = PresenceModel::new();
        assert!(presence.user_online("a"));
        assert!(!presence.user_online("a"));
        assert!(presence.user_left("a"));
        assert!(!presence.user_left("a"));
        assert!(!presence.is_online("a"));
    }
}
