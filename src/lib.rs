//! Client-side conversation synchronization engine.
//!
//! Keeps per-conversation message timelines ordered, deduplicated, and
//! consistent across three write paths that race freely: optimistic local
//! sends, streamed AI replies, and server push events. Rendering glue reads
//! the shared models; controllers own all mutation.

pub mod channel;
pub mod controllers;
pub mod models;
pub mod repositories;
pub mod services;

pub use channel::{ChannelEvent, OutboundEvent, PushChannel, bridge::PushBridge};
pub use controllers::ai_stream::AiStreamController;
pub use controllers::outbox::OutboxController;
pub use controllers::sync::SyncController;
pub use models::conversation::Conversation;
pub use models::conversation_list::{ConversationListModel, shared_conversation_list};
pub use models::message::{DeliveryState, Message, MessageKind, MessagePatch};
pub use models::presence::PresenceModel;
pub use models::read_receipts::ReadReceiptTracker;
pub use models::scroll_anchor::{ScrollAction, ScrollAnchor, ViewportMetrics};
pub use models::timeline::{SharedTimeline, TimelineCache, shared_timeline};
pub use repositories::failure_repository::{FailureRecord, FailureRepository};
pub use repositories::in_memory_repository::InMemoryFailureRepository;
pub use repositories::sqlite_repository::SqliteFailureRepository;
pub use services::ai_gateway::{AiGateway, AiStreamRequest, ResponseStream, StreamChunk};
pub use services::transport::{ChatTransport, TransportError};
