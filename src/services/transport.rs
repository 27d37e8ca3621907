use thiserror::Error;

use crate::models::conversation::Conversation;
use crate::models::message::Message;
use crate::repositories::failure_repository::BoxFuture;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server rejected request: {status} {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed server response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Request/response boundary to the chat backend. The controllers only see
/// this trait, so tests substitute scripted fakes.
pub trait ChatTransport: Send + Sync + 'static {
    /// Submit an outbound message. Resolves with the server's authoritative
    /// copy (timestamp, possibly a differing id).
    fn send_message(&self, message: Message) -> BoxFuture<'static, TransportResult<Message>>;

    /// Tell the server the viewer has read up to `message_id`.
    fn mark_read(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> BoxFuture<'static, TransportResult<()>>;

    /// Fetch a page of messages strictly older than `before` (a message id
    /// cursor), newest page first. `before = None` means the latest page.
    fn fetch_older(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> BoxFuture<'static, TransportResult<Vec<Message>>>;

    fn list_conversations(&self) -> BoxFuture<'static, TransportResult<Vec<Conversation>>>;

    fn create_conversation(
        &self,
        conversation: Conversation,
    ) -> BoxFuture<'static, TransportResult<Conversation>>;

    fn delete_conversation(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'static, TransportResult<()>>;
}
