use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::RepositoryResult;
use crate::models::message::Message;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A failed outbound message, persisted so it survives restarts and can be
/// offered for retry on the next launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub message: Message,
    pub inserted_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            inserted_at: Utc::now(),
        }
    }
}

/// Repository trait for the local failure store.
///
/// `add` is keyed by message id and idempotent: recording the same failed
/// message twice keeps a single record.
pub trait FailureRepository: Send + Sync + 'static {
    /// Record a failed message. Replaces any existing record with the same id.
    fn add(&self, record: FailureRecord) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Remove the record for a message id (sent successfully, or the user
    /// discarded it). Missing ids are a no-op.
    fn remove(&self, message_id: &str) -> BoxFuture<'static, RepositoryResult<()>>;

    /// All failed messages for one conversation, oldest first.
    fn list_for(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'static, RepositoryResult<Vec<FailureRecord>>>;

    /// All failed messages across conversations, oldest first.
    fn list_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<FailureRecord>>>;

    /// Drop every record for one conversation (conversation deleted or the
    /// viewer removed from it). Unknown conversations are a no-op.
    fn clear_for(&self, conversation_id: &str) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Drop everything (sign-out).
    fn clear_all(&self) -> BoxFuture<'static, RepositoryResult<()>>;
}
