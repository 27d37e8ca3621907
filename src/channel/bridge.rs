use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{ChannelEvent, OutboundEvent, PushChannel, RoomEvent, RoomEventKind};
use crate::models::conversation_list::SharedConversationList;
use crate::models::message::{DeliveryState, MessagePatch};
use crate::models::presence::PresenceModel;
use crate::models::timeline::SharedTimeline;
use crate::repositories::failure_repository::FailureRepository;

/// Translates push-channel traffic into timeline and conversation-list
/// mutations. Every inbound path funnels through the same idempotent merge
/// entry points as request/response traffic, so replays and races collapse
/// into no-ops instead of duplicates. The failure store is kept consistent
/// from here too: a late confirmation clears the persisted record, and a
/// dropped room takes its records with it.
pub struct PushBridge {
    timeline: SharedTimeline,
    conversations: SharedConversationList,
    presence: Mutex<PresenceModel>,
    channel: Arc<dyn PushChannel>,
    failures: Arc<dyn FailureRepository>,
    viewer_id: String,
}

impl PushBridge {
    pub fn new(
        timeline: SharedTimeline,
        conversations: SharedConversationList,
        channel: Arc<dyn PushChannel>,
        failures: Arc<dyn FailureRepository>,
        viewer_id: impl Into<String>,
    ) -> Self {
        Self {
            timeline,
            conversations,
            presence: Mutex::new(PresenceModel::new()),
            channel,
            failures,
            viewer_id: viewer_id.into(),
        }
    }

    /// Apply one inbound event. Returns whether any visible state changed,
    /// so redundant broadcasts never trigger a re-render.
    pub async fn handle_event(&self, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::MessageReceived(message) => {
                let conversation_id = message.conversation_id.clone();
                let (newly_inserted, confirmed_failed) = {
                    let mut timeline = self.timeline.lock();
                    let was_failed = timeline
                        .get(&conversation_id, &message.id)
                        .is_some_and(|m| m.state == DeliveryState::Failed);
                    let newly = timeline.insert_sorted(&conversation_id, message.clone());
                    let now_confirmed = timeline
                        .get(&conversation_id, &message.id)
                        .is_some_and(|m| m.state == DeliveryState::Confirmed);
                    (newly, was_failed && now_confirmed)
                };
                if confirmed_failed {
                    // The server delivered an attempt the client had given up
                    // on; its failure record must not outlive the delivery.
                    if let Err(e) = self.failures.remove(&message.id).await {
                        warn!(id = %message.id, error = %e, "failed to drop confirmed failure record");
                    }
                }
                let list_changed =
                    self.conversations
                        .lock()
                        .note_message(&message, &self.viewer_id, newly_inserted);
                newly_inserted || confirmed_failed || list_changed
            }
            ChannelEvent::SeenUpdated {
                conversation_id,
                message_id,
                seen_by,
            } => self
                .timeline
                .lock()
                .patch(&conversation_id, &message_id, MessagePatch::seen_by(seen_by)),
            ChannelEvent::ConversationCreated(conversation) => {
                let id = conversation.id.clone();
                let changed = self.conversations.lock().upsert(conversation);
                if changed {
                    // A conversation created on another device still needs
                    // this session subscribed to its room.
                    self.channel.emit(OutboundEvent::JoinRoom(id));
                }
                changed
            }
            ChannelEvent::Room(room) => self.handle_room_event(room).await,
            ChannelEvent::UserOnline(user_id) => self.presence.lock().user_online(&user_id),
            ChannelEvent::UserLeft(user_id) => self.presence.lock().user_left(&user_id),
            ChannelEvent::OnlineUsers(users) => self.presence.lock().set_online(users),
        }
    }

    async fn handle_room_event(&self, room: RoomEvent) -> bool {
        match room.kind {
            RoomEventKind::RoomDeleted => self.drop_conversation(&room.conversation_id).await,
            RoomEventKind::MemberLeft | RoomEventKind::MemberRemoved => {
                let Some(user_id) = room.user_id else {
                    debug!(conversation_id = %room.conversation_id, "member event without user, dropped");
                    return false;
                };
                if user_id == self.viewer_id {
                    // The viewer was removed: the room is gone from their
                    // perspective.
                    return self.drop_conversation(&room.conversation_id).await;
                }
                self.conversations
                    .lock()
                    .get_conversation_mut(&room.conversation_id)
                    .is_some_and(|c| c.remove_participant(&user_id))
            }
        }
    }

    async fn drop_conversation(&self, conversation_id: &str) -> bool {
        let evicted = self.timeline.lock().evict(conversation_id);
        let removed = self.conversations.lock().remove(conversation_id);
        if evicted || removed {
            info!(conversation_id, "conversation dropped by room event");
            if let Err(e) = self.failures.clear_for(conversation_id).await {
                warn!(conversation_id, error = %e, "failed to clear failure records for dropped room");
            }
            self.channel
                .emit(OutboundEvent::LeaveRoom(conversation_id.to_string()));
        }
        evicted || removed
    }

    /// Subscribe to a conversation's room when the viewer opens it.
    pub fn enter_conversation(&self, conversation_id: &str) {
        self.channel
            .emit(OutboundEvent::JoinRoom(conversation_id.to_string()));
    }

    pub fn leave_conversation(&self, conversation_id: &str) {
        self.channel
            .emit(OutboundEvent::LeaveRoom(conversation_id.to_string()));
    }

    /// Signal the viewer has read up to `message_id` and zero the local
    /// unread count in the same step.
    pub fn mark_seen(&self, conversation_id: &str, message_id: &str) {
        self.conversations
            .lock()
            .mark_read(conversation_id, message_id);
        self.channel.emit(OutboundEvent::MarkSeen {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        });
    }

    pub fn request_online_users(&self) {
        self.channel.emit(OutboundEvent::GetOnlineUsers);
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.presence.lock().is_online(user_id)
    }

    pub fn online_users(&self) -> Vec<String> {
        self.presence
            .lock()
            .online_users()
            .map(str::to_string)
            .collect()
    }
}
