use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::RepositoryResult;
use super::failure_repository::{BoxFuture, FailureRecord, FailureRepository};

/// In-memory failure store. Useful for testing and development.
#[derive(Clone, Default)]
pub struct InMemoryFailureRepository {
    records: Arc<Mutex<HashMap<String, FailureRecord>>>,
}

impl InMemoryFailureRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FailureRepository for InMemoryFailureRepository {
    fn add(&self, record: FailureRecord) -> BoxFuture<'static, RepositoryResult<()>> {
        let records = self.records.clone();
        Box::pin(async move {
            records.lock().insert(record.message.id.clone(), record);
            Ok(())
        })
    }

    fn remove(&self, message_id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let records = self.records.clone();
        let message_id = message_id.to_string();
        Box::pin(async move {
            records.lock().remove(&message_id);
            Ok(())
        })
    }

    fn list_for(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'static, RepositoryResult<Vec<FailureRecord>>> {
        let records = self.records.clone();
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let mut result: Vec<FailureRecord> = records
                .lock()
                .values()
                .filter(|r| r.message.conversation_id == conversation_id)
                .cloned()
                .collect();
            result.sort_by(|a, b| a.inserted_at.cmp(&b.inserted_at));
            Ok(result)
        })
    }

    fn list_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<FailureRecord>>> {
        let records = self.records.clone();
        Box::pin(async move {
            let mut result: Vec<FailureRecord> = records.lock().values().cloned().collect();
            result.sort_by(|a, b| a.inserted_at.cmp(&b.inserted_at));
            Ok(result)
        })
    }

    fn clear_for(&self, conversation_id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let records = self.records.clone();
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            records
                .lock()
                .retain(|_, r| r.message.conversation_id != conversation_id);
            Ok(())
        })
    }

    fn clear_all(&self) -> BoxFuture<'static, RepositoryResult<()>> {
        let records = self.records.clone();
        Box::pin(async move {
            records.lock().clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use chrono::{Duration, Utc};

    fn record(id: &str, conv: &str) -> FailureRecord {
        let mut message = Message::new_pending_text(conv, "alice", "oops".to_string());
        message.id = id.to_string();
        FailureRecord::new(message)
    }

    #[tokio::test]
    async fn test_add_is_idempotent_by_id() {
        let repo = InMemoryFailureRepository::new();
        repo.add(record("m1", "c1")).await.unwrap();
        repo.add(record("m1", "c1")).await.unwrap();
        assert_eq!(repo.list_for("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_for_filters_and_orders() {
        let repo = InMemoryFailureRepository::new();
        let mut first = record("m1", "c1");
        first.inserted_at = Utc::now() - Duration::seconds(10);
        repo.add(first).await.unwrap();
        repo.add(record("m2", "c1")).await.unwrap();
        repo.add(record("m3", "other")).await.unwrap();

        let listed = repo.list_for("c1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].message.id, "m1");
        assert_eq!(listed[1].message.id, "m2");
    }

    #[tokio::test]
    async fn test_clear_for_is_conversation_scoped() {
        let repo = InMemoryFailureRepository::new();
        repo.add(record("m1", "c1")).await.unwrap();
        repo.add(record("m2", "c1")).await.unwrap();
        repo.add(record("m3", "c2")).await.unwrap();

        repo.clear_for("c1").await.unwrap();
        repo.clear_for("missing").await.unwrap();

        assert!(repo.list_for("c1").await.unwrap().is_empty());
        assert_eq!(repo.list_for("c2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let repo = InMemoryFailureRepository::new();
        repo.add(record("m1", "c1")).await.unwrap();
        repo.add(record("m2", "c2")).await.unwrap();

        repo.remove("m1").await.unwrap();
        repo.remove("missing").await.unwrap();
        assert_eq!(repo.list_all().await.unwrap().len(), 1);

        repo.clear_all().await.unwrap();
        assert!(repo.list_all().await.unwrap().is_empty());
    }
}
