use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::models::conversation_list::SharedConversationList;
use crate::models::message::{DeliveryState, Message, MessagePatch};
use crate::models::timeline::SharedTimeline;
use crate::repositories::failure_repository::{FailureRecord, FailureRepository};
use crate::services::transport::ChatTransport;

/// Optimistic write pipeline for user-authored messages.
///
/// A send inserts a pending copy into the cache before the network round-trip
/// and reconciles on the response. The client-generated id is acceptable as
/// the permanent id; confirmation patches the existing entry in place unless
/// the server assigned a different id. Failed attempts stay visible in place
/// and are persisted to the failure store; a retry is always a brand-new
/// attempt with a fresh id.
pub struct OutboxController {
    timeline: SharedTimeline,
    conversations: SharedConversationList,
    transport: Arc<dyn ChatTransport>,
    failures: Arc<dyn FailureRepository>,
    viewer_id: String,
}

impl OutboxController {
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

    /// Send a text message. Returns the id of the attempt, which is already
    /// rendered (pending) by the time this future first yields.
    pub async fn send_text(&self, conversation_id: &str, body: String) -> Result<String> {
        self.send(Message::new_pending_text(conversation_id, &self.viewer_id, body))
            .await
    }

    pub async fn send_image(&self, conversation_id: &str, image: String) -> Result<String> {
        self.send(Message::new_pending_image(conversation_id, &self.viewer_id, image))
            .await
    }

    async fn send(&self, message: Message) -> Result<String> {
        let attempt_id = message.id.clone();
        let conversation_id = message.conversation_id.clone();

        {
            let newly = self
                .timeline
                .lock()
                .insert_sorted(&conversation_id, message.clone());
            self.conversations
                .lock()
                .note_message(&message, &self.viewer_id, newly);
        }

        match self.transport.send_message(message.clone()).await {
            Ok(confirmed) => {
                let final_id = self.confirm(&conversation_id, &attempt_id, confirmed);
                Ok(final_id)
            }
            Err(e) => {
                warn!(id = %attempt_id, error = %e, "send failed, parking attempt in failure store");
                self.record_failure(message).await?;
                Ok(attempt_id)
            }
        }
    }

    /// Reconcile the server's authoritative copy with the optimistic entry.
    /// Same id: merge in place. Different id: the swap happens under one
    /// cache lock, so no render can observe both copies or neither.
    fn confirm(&self, conversation_id: &str, attempt_id: &str, mut confirmed: Message) -> String {
        confirmed.state = DeliveryState::Confirmed;
        let final_id = confirmed.id.clone();

        {
            let mut timeline = self.timeline.lock();
            if final_id != attempt_id {
                timeline.remove_by_id(conversation_id, attempt_id);
            }
            timeline.insert_sorted(conversation_id, confirmed.clone());
        }
        self.conversations
            .lock()
            .note_message(&confirmed, &self.viewer_id, false);
        final_id
    }

    async fn record_failure(&self, mut message: Message) -> Result<()> {
        message.state = DeliveryState::Failed;
        self.timeline.lock().patch(
            &message.conversation_id,
            &message.id,
            MessagePatch::state(DeliveryState::Failed),
        );
        self.failures
            .add(FailureRecord::new(message))
            .await
            .context("Failed to persist failed message")
    }

    /// Retry a failed attempt: the stale entry is discarded from both cache
    /// and store, and the content is resent as a fresh attempt.
    pub async fn retry(&self, conversation_id: &str, message_id: &str) -> Result<String> {
        let failed = self
            .take_failed(conversation_id, message_id)
            .await?
            .ok_or_else(|| anyhow!("No failed attempt with id {message_id}"))?;

        let mut fresh = failed;
        fresh.id = uuid::Uuid::new_v4().to_string();
        fresh.created_at = chrono::Utc::now();
        fresh.state = DeliveryState::Pending;
        fresh.seen_by.clear();
        info!(old = %message_id, new = %fresh.id, "retrying failed message");

        self.send(fresh).await
    }

    /// Drop a failed attempt without resending.
    pub async fn discard_failed(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        self.take_failed(conversation_id, message_id).await?;
        Ok(())
    }

    async fn take_failed(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<Option<Message>> {
        let cached = self
            .timeline
            .lock()
            .get(conversation_id, message_id)
            .filter(|m| m.state == DeliveryState::Failed)
            .cloned();

        let message = match cached {
            Some(m) => Some(m),
            // Not materialized (e.g. restored store entry for an unopened
            // conversation): fall back to the store.
            None => self
                .failures
                .list_for(conversation_id)
                .await?
                .into_iter()
                .map(|r| r.message)
                .find(|m| m.id == message_id),
        };

        if message.is_some() {
            self.timeline.lock().remove_by_id(conversation_id, message_id);
            self.failures.remove(message_id).await?;
        }
        Ok(message)
    }

    /// Re-materialize persisted failures into a conversation's window, so
    /// they stay visible and retryable across restarts.
    pub async fn restore_failures(&self, conversation_id: &str) -> Result<usize> {
        let records = self.failures.list_for(conversation_id).await?;
        let mut timeline = self.timeline.lock();
        let mut restored = 0;
        for record in records {
            if timeline.insert_sorted(conversation_id, record.message) {
                restored += 1;
            }
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversation::Conversation;
    use crate::models::conversation_list::shared_conversation_list;
    use crate::models::timeline::shared_timeline;
    use crate::repositories::failure_repository::BoxFuture;
    use crate::repositories::in_memory_repository::InMemoryFailureRepository;
    use crate::services::transport::{ChatTransport, TransportError, TransportResult};
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;

    #[derive(Clone, Copy)]
    enum SendScript {
        /// Confirm with the client id and a server-stamped timestamp.
        Confirm,
        /// Confirm but under a server-assigned id.
        ConfirmRenamed,
        Reject,
    }

    struct FakeTransport {
        script: Mutex<Vec<SendScript>>,
        sent: Mutex<Vec<Message>>,
    }

    impl FakeTransport {
        fn scripted(script: Vec<SendScript>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    impl ChatTransport for FakeTransport {
        fn send_message(&self, message: Message) -> BoxFuture<'static, TransportResult<Message>> {
            self.sent.lock().push(message.clone());
            let step = self.script.lock().remove(0);
            Box::pin(async move {
                match step {
                    SendScript::Confirm => {
                        let mut confirmed = message;
                        confirmed.created_at += Duration::seconds(2);
                        confirmed.state = DeliveryState::Confirmed;
                        Ok(confirmed)
                    }
                    SendScript::ConfirmRenamed => {
                        let mut confirmed = message;
                        confirmed.id = format!("server-{}", confirmed.id);
                        confirmed.state = DeliveryState::Confirmed;
                        Ok(confirmed)
                    }
                    SendScript::Reject => Err(TransportError::Rejected {
                        status: 503,
                        body: "unavailable".into(),
                    }),
                }
            })
        }

        fn mark_read(&self, _: &str, _: &str) -> BoxFuture<'static, TransportResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn fetch_older(
            &self,
            _: &str,
            _: Option<&str>,
            _: usize,
        ) -> BoxFuture<'static, TransportResult<Vec<Message>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn list_conversations(&self) -> BoxFuture<'static, TransportResult<Vec<Conversation>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn create_conversation(
            &self,
            conversation: Conversation,
        ) -> BoxFuture<'static, TransportResult<Conversation>> {
            Box::pin(async move { Ok(conversation) })
        }

        fn delete_conversation(&self, _: &str) -> BoxFuture<'static, TransportResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn controller(script: Vec<SendScript>) -> (OutboxController, Arc<InMemoryFailureRepository>) {
        let failures = Arc::new(InMemoryFailureRepository::new());
        let conversations = shared_conversation_list();
        conversations.lock().upsert(Conversation::new_direct(
            "c1",
            vec!["alice".to_string(), "bob".to_string()],
        ));
        let controller = OutboxController::new(
            shared_timeline(),
            conversations,
            FakeTransport::scripted(script),
            failures.clone(),
            "alice",
        );
        (controller, failures)
    }

    #[tokio::test]
    async fn test_send_confirms_in_place_with_server_timestamp() {
        let (outbox, _) = controller(vec![SendScript::Confirm]);
        let id = outbox.send_text("c1", "hello".into()).await.unwrap();

        let timeline = outbox.timeline.lock();
        let shown = timeline.display("c1");
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].id, id);
        assert_eq!(shown[0].state, DeliveryState::Confirmed);
        drop(timeline);

        let conversations = outbox.conversations.lock();
        let entry = conversations.get("c1").unwrap();
        assert_eq!(entry.preview.as_deref(), Some("hello"));
        assert_eq!(entry.unread, 0);
    }

    #[tokio::test]
    async fn test_server_assigned_id_swaps_atomically() {
        let (outbox, _) = controller(vec![SendScript::ConfirmRenamed]);
        let final_id = outbox.send_text("c1", "hello".into()).await.unwrap();

        assert!(final_id.starts_with("server-"));
        let timeline = outbox.timeline.lock();
        let shown = timeline.display("c1");
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].id, final_id);
    }

    #[tokio::test]
    async fn test_failed_send_stays_visible_and_persisted() {
        let (outbox, failures) = controller(vec![SendScript::Reject]);
        let id = outbox.send_text("c1", "hello".into()).await.unwrap();

        let timeline = outbox.timeline.lock();
        assert_eq!(
            timeline.get("c1", &id).unwrap().state,
            DeliveryState::Failed
        );
        drop(timeline);

        let stored = failures.list_for("c1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message.id, id);
    }

    #[tokio::test]
    async fn test_retry_is_a_fresh_attempt() {
        let (outbox, failures) = controller(vec![SendScript::Reject, SendScript::Confirm]);
        let failed_id = outbox.send_text("c1", "hello".into()).await.unwrap();

        let new_id = outbox.retry("c1", &failed_id).await.unwrap();
        assert_ne!(new_id, failed_id);

        // The stale attempt is gone from cache and store; the new one is
        // confirmed.
        let timeline = outbox.timeline.lock();
        assert!(timeline.get("c1", &failed_id).is_none());
        assert_eq!(
            timeline.get("c1", &new_id).unwrap().state,
            DeliveryState::Confirmed
        );
        assert_eq!(timeline.len("c1"), 1);
        drop(timeline);
        assert!(failures.list_for("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_unknown_id_errors() {
        let (outbox, _) = controller(vec![]);
        assert!(outbox.retry("c1", "ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_discard_failed_removes_everywhere() {
        let (outbox, failures) = controller(vec![SendScript::Reject]);
        let id = outbox.send_text("c1", "bye".into()).await.unwrap();

        outbox.discard_failed("c1", &id).await.unwrap();
        assert!(outbox.timeline.lock().get("c1", &id).is_none());
        assert!(failures.list_for("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_failures_rematerializes_once() {
        let (outbox, failures) = controller(vec![]);
        let mut message = Message::new_pending_text("c1", "alice", "lost".into());
        message.state = DeliveryState::Failed;
        failures.add(FailureRecord::new(message)).await.unwrap();

        assert_eq!(outbox.restore_failures("c1").await.unwrap(), 1);
        assert_eq!(outbox.restore_failures("c1").await.unwrap(), 0);
        assert_eq!(outbox.timeline.lock().len("c1"), 1);
    }
}
