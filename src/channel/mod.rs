pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::models::conversation::Conversation;
use crate::models::message::Message;

/// Server-pushed events arriving over the persistent channel. Delivery is
/// at-least-once; every handler downstream must tolerate replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelEvent {
    MessageReceived(Message),
    SeenUpdated {
        conversation_id: String,
        message_id: String,
        seen_by: Vec<String>,
    },
    ConversationCreated(Conversation),
    Room(RoomEvent),
    UserOnline(String),
    UserLeft(String),
    OnlineUsers(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub conversation_id: String,
    pub kind: RoomEventKind,
    /// The affected user, absent for whole-room events.
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomEventKind {
    MemberLeft,
    MemberRemoved,
    RoomDeleted,
}

/// Client-to-server signals sent over the same channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutboundEvent {
    MarkSeen {
        conversation_id: String,
        message_id: String,
    },
    JoinRoom(String),
    LeaveRoom(String),
    ConversationCreated(Conversation),
    GetOnlineUsers,
}

/// Sink for outbound channel traffic. The production implementation wraps a
/// websocket; tests substitute a recording fake.
pub trait PushChannel: Send + Sync + 'static {
    fn emit(&self, event: OutboundEvent);
}
