use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

#[derive(Clone, Debug, PartialEq)]
pub enum ErrorLevel {
    Warning,
    Error,
}

#[derive(Clone, Debug)]
pub struct ErrorEntry {
    pub timestamp: SystemTime,
    pub level: ErrorLevel,
    pub message: String,
    pub target: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub fields: HashMap<String, String>,
}

/// Bounded in-memory ring of recent warnings and errors, fed by the tracing
/// collector layer. Clones share the same underlying buffer.
#[derive(Clone)]
pub struct ErrorStore {
    entries: Arc<Mutex<VecDeque<ErrorEntry>>>,
    max_entries: usize,
}

impl ErrorStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            max_entries,
        }
    }

    pub fn add_entry(&self, entry: ErrorEntry) {
        let mut entries = self.entries.lock();
        entries.push_back(entry);

        // FIFO eviction when exceeding max
        if entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    pub fn get_all_entries(&self) -> Vec<ErrorEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.level == ErrorLevel::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.level == ErrorLevel::Warning)
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str, level: ErrorLevel) -> ErrorEntry {
        ErrorEntry {
            timestamp: SystemTime::now(),
            level,
            message: message.to_string(),
            target: "test".to_string(),
            file: None,
            line: None,
            fields: HashMap::new(),
        }
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let store = ErrorStore::new(2);
        store.add_entry(entry("one", ErrorLevel::Error));
        store.add_entry(entry("two", ErrorLevel::Error));
        store.add_entry(entry("three", ErrorLevel::Error));

        let all = store.get_all_entries();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "two");
        assert_eq!(all[1].message, "three");
    }

    #[test]
    fn test_counts_by_level() {
        let store = ErrorStore::new(10);
        store.add_entry(entry("w", ErrorLevel::Warning));
        store.add_entry(entry("e1", ErrorLevel::Error));
        store.add_entry(entry("e2", ErrorLevel::Error));
        assert_eq!(store.warning_count(), 1);
        assert_eq!(store.error_count(), 2);
    }

    #[test]
    fn test_clones_share_buffer() {
        let store = ErrorStore::new(10);
        let clone = store.clone();
        clone.add_entry(entry("shared", ErrorLevel::Error));
        assert_eq!(store.error_count(), 1);
    }
}
