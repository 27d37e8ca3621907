use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::models::conversation_list::SharedConversationList;
use crate::models::message::{
    AI_FAILURE_BODY, DeliveryState, Message, MessageKind, MessagePatch,
};
use crate::models::timeline::SharedTimeline;
use crate::repositories::failure_repository::{FailureRecord, FailureRepository};
use crate::services::ai_gateway::{AiGateway, AiStreamRequest, ResponseStream, StreamChunk};

/// A stream that goes quiet for this long is treated as failed.
pub const STREAM_STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Offset added to the user message's timestamp so the provisional reply
/// always sorts directly after it, regardless of clock skew.
const REPLY_EPSILON_MS: i64 = 1;

/// Indicator phase of an active stream: `Waiting` until the first token
/// arrives, `Typing` from then on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamPhase {
    Waiting,
    Typing,
}

struct ActiveStream {
    message_id: String,
    cancel: Arc<AtomicBool>,
    phase: StreamPhase,
}

/// Token-stream controller for AI replies.
///
/// At most one stream per conversation. The provisional assistant message is
/// inserted before the first token and grows by append-only deltas; the
/// conversation list is only touched at terminal states, never per token.
pub struct AiStreamController {
    timeline: SharedTimeline,
    conversations: SharedConversationList,
    failures: Arc<dyn FailureRepository>,
    active: Mutex<HashMap<String, ActiveStream>>,
    agent_id: String,
}

impl AiStreamController {
    pub fn new(
        timeline: SharedTimeline,
        conversations: SharedConversationList,
        failures: Arc<dyn FailureRepository>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            timeline,
            conversations,
            failures,
            active: Mutex::new(HashMap::new()),
            agent_id: agent_id.into(),
        }
    }

    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.active.lock().contains_key(conversation_id)
    }

    /// Indicator phase of the active stream, if any. Drives the "thinking"
    /// vs. "typing" affordance.
    pub fn phase(&self, conversation_id: &str) -> Option<StreamPhase> {
        self.active.lock().get(conversation_id).map(|s| s.phase)
    }

    /// Insert the provisional assistant message and register the stream.
    /// Rejects while a stream is already active for this conversation.
    pub fn begin(
        &self,
        user_message: &Message,
        agent_type: &str,
    ) -> Result<(String, AiStreamRequest)> {
        let conversation_id = user_message.conversation_id.clone();
        {
            let mut active = self.active.lock();
            if active.contains_key(&conversation_id) {
                bail!("A reply is already streaming in conversation {conversation_id}");
            }

            let provisional = Message {
                id: uuid::Uuid::new_v4().to_string(),
                conversation_id: conversation_id.clone(),
                sender_id: self.agent_id.clone(),
                created_at: user_message.created_at
                    + chrono::Duration::milliseconds(REPLY_EPSILON_MS),
                kind: MessageKind::Text,
                body: Some(String::new()),
                image: None,
                is_ai: true,
                state: DeliveryState::Streaming,
                seen_by: Vec::new(),
            };
            let message_id = provisional.id.clone();

            self.timeline.lock().insert_sorted(&conversation_id, provisional);
            active.insert(
                conversation_id.clone(),
                ActiveStream {
                    message_id: message_id.clone(),
                    cancel: Arc::new(AtomicBool::new(false)),
                    phase: StreamPhase::Waiting,
                },
            );

            let request = AiStreamRequest {
                message: user_message.body.clone().unwrap_or_default(),
                conversation_id,
                ai_agent_type: agent_type.to_string(),
                message_id: message_id.clone(),
                user_message_id: user_message.id.clone(),
                auto_save: true,
            };
            Ok((message_id, request))
        }
    }

    /// Request the active stream stop. The consume loop notices the flag and
    /// finishes the message through the failure path.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.active.lock().get(conversation_id) {
            Some(stream) => {
                stream.cancel.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Drive a begun stream to completion, applying deltas as they arrive.
    pub async fn consume(&self, conversation_id: &str, mut stream: ResponseStream) -> Result<()> {
        let (message_id, cancel) = {
            let active = self.active.lock();
            let Some(entry) = active.get(conversation_id) else {
                bail!("No active stream for conversation {conversation_id}");
            };
            (entry.message_id.clone(), entry.cancel.clone())
        };

        loop {
            if cancel.load(Ordering::Relaxed) {
                info!(conversation_id, "stream cancelled by user");
                return self.finish_failed(conversation_id, &message_id).await;
            }

            let next = tokio::time::timeout(STREAM_STALL_TIMEOUT, stream.next()).await;
            match next {
                Err(_) => {
                    warn!(conversation_id, "stream stalled past timeout");
                    return self.finish_failed(conversation_id, &message_id).await;
                }
                Ok(None) => {
                    warn!(conversation_id, "stream ended without completion");
                    return self.finish_failed(conversation_id, &message_id).await;
                }
                Ok(Some(Err(e))) => {
                    warn!(conversation_id, error = %e, "stream transport error");
                    return self.finish_failed(conversation_id, &message_id).await;
                }
                Ok(Some(Ok(StreamChunk::Error(e)))) => {
                    warn!(conversation_id, error = %e, "gateway reported stream error");
                    return self.finish_failed(conversation_id, &message_id).await;
                }
                Ok(Some(Ok(StreamChunk::Delta(delta)))) => {
                    if cancel.load(Ordering::Relaxed) {
                        // Cancelled mid-delivery: drop the token on the floor.
                        continue;
                    }
                    if let Some(entry) = self.active.lock().get_mut(conversation_id) {
                        entry.phase = StreamPhase::Typing;
                    }
                    self.apply_delta(conversation_id, &message_id, &delta);
                }
                Ok(Some(Ok(StreamChunk::Done { stamped_at }))) => {
                    return self
                        .finish_confirmed(conversation_id, &message_id, stamped_at)
                        .await;
                }
            }
        }
    }

    /// Append one delta to the provisional message. The body only ever grows
    /// while streaming; deltas are never reordered or dropped by this path.
    pub fn apply_delta(&self, conversation_id: &str, message_id: &str, delta: &str) {
        let mut timeline = self.timeline.lock();
        let Some(current) = timeline.get(conversation_id, message_id) else {
            warn!(conversation_id, message_id, "delta for missing provisional message");
            return;
        };
        let mut body = current.body.clone().unwrap_or_default();
        body.push_str(delta);
        timeline.patch(conversation_id, message_id, MessagePatch::body(body));
    }

    async fn finish_confirmed(
        &self,
        conversation_id: &str,
        message_id: &str,
        stamped_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<()> {
        let final_body = {
            let mut timeline = self.timeline.lock();
            let patch = MessagePatch {
                state: Some(DeliveryState::Confirmed),
                created_at: stamped_at,
                ..Default::default()
            };
            timeline.patch(conversation_id, message_id, patch);
            timeline
                .get(conversation_id, message_id)
                .and_then(|m| m.body.clone())
        };

        if let Some(body) = final_body {
            self.conversations.lock().set_preview(conversation_id, &body);
        }
        self.active.lock().remove(conversation_id);
        Ok(())
    }

    async fn finish_failed(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let failed = {
            let mut timeline = self.timeline.lock();
            let patch = MessagePatch {
                body: Some(AI_FAILURE_BODY.to_string()),
                state: Some(DeliveryState::Failed),
                ..Default::default()
            };
            timeline.patch(conversation_id, message_id, patch);
            timeline.get(conversation_id, message_id).cloned()
        };

        self.conversations
            .lock()
            .set_preview(conversation_id, AI_FAILURE_BODY);
        self.active.lock().remove(conversation_id);

        if let Some(message) = failed {
            self.failures.add(FailureRecord::new(message)).await?;
        }
        Ok(())
    }

    /// Retry a failed reply: the stale assistant message is discarded and a
    /// fresh stream starts from the nearest preceding user message.
    pub async fn retry(
        &self,
        conversation_id: &str,
        failed_message_id: &str,
        agent_type: &str,
    ) -> Result<(String, AiStreamRequest)> {
        let prompt = {
            let timeline = self.timeline.lock();
            let window = timeline.display(conversation_id);
            let Some(pos) = window.iter().position(|m| m.id == failed_message_id) else {
                bail!("No failed reply with id {failed_message_id}");
            };
            if !window[pos].is_ai || window[pos].state != DeliveryState::Failed {
                bail!("Message {failed_message_id} is not a failed reply");
            }
            // The prompt is the nearest user message above the failed reply.
            window[..pos]
                .iter()
                .rev()
                .find(|m| !m.is_ai)
                .cloned()
        };
        let Some(prompt) = prompt else {
            bail!("No prompt message precedes failed reply {failed_message_id}");
        };

        self.timeline
            .lock()
            .remove_by_id(conversation_id, failed_message_id);
        self.failures.remove(failed_message_id).await?;

        self.begin(&prompt, agent_type)
    }

    /// Begin, fetch, and consume a reply in one call.
    pub async fn stream_reply(
        &self,
        gateway: &AiGateway,
        user_message: &Message,
        agent_type: &str,
    ) -> Result<String> {
        let (message_id, request) = self.begin(user_message, agent_type)?;
        let conversation_id = user_message.conversation_id.clone();
        match gateway.stream_reply(request).await {
            Ok(stream) => {
                self.consume(&conversation_id, stream).await?;
                Ok(message_id)
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "failed to open reply stream");
                self.finish_failed(&conversation_id, &message_id).await?;
                Ok(message_id)
            }
        }
    }
}
