use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Stream chunks emitted while an AI reply is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// An append-only text fragment.
    Delta(String),
    /// End of stream. `stamped_at` carries the authoritative timestamp the
    /// gateway assigned to the completed reply, when it sends one.
    Done { stamped_at: Option<DateTime<Utc>> },
    Error(String),
}

/// Type alias for response streams
pub type ResponseStream = BoxStream<'static, Result<StreamChunk>>;

/// Request body for the streaming endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiStreamRequest {
    pub message: String,
    pub conversation_id: String,
    pub ai_agent_type: String,
    /// Id of the provisional assistant message, so the gateway's own persisted
    /// copy dedupes against the one already in the cache.
    pub message_id: String,
    pub user_message_id: String,
    pub auto_save: bool,
}

/// One `data:` payload from the gateway.
#[derive(Debug, Deserialize)]
struct SsePayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    error: Option<String>,
}

/// Parse a single SSE line into a chunk. Lines without the `data: ` prefix
/// and malformed payloads yield `None`; the stream keeps going.
fn parse_sse_line(line: &str) -> Option<StreamChunk> {
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return Some(StreamChunk::Done { stamped_at: None });
    }
    match serde_json::from_str::<SsePayload>(data) {
        Ok(payload) => {
            if let Some(error) = payload.error {
                return Some(StreamChunk::Error(error));
            }
            if let Some(at) = payload.created_at {
                return Some(StreamChunk::Done {
                    stamped_at: Some(at),
                });
            }
            payload.content.map(StreamChunk::Delta)
        }
        Err(e) => {
            warn!(error = %e, "Skipping malformed SSE payload");
            None
        }
    }
}

/// HTTP client for the AI reply gateway. Speaks SSE over a streaming POST.
#[derive(Clone)]
pub struct AiGateway {
    client: reqwest::Client,
    base_url: String,
}

impl AiGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Start a streamed reply. Returns an error for connection failures and
    /// non-success statuses; transport drops mid-stream surface as an `Err`
    /// item on the returned stream.
    pub async fn stream_reply(&self, request: AiStreamRequest) -> Result<ResponseStream> {
        let response = self
            .client
            .post(format!("{}/ai/stream", self.base_url))
            .json(&request)
            .send()
            .await
            .context("Failed to reach AI gateway")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("AI gateway returned {status}: {body}"));
        }

        let mut bytes = response.bytes_stream();

        let stream: ResponseStream = Box::pin(async_stream::stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        // Process every complete line; keep the partial tail.
                        while let Some(newline) = buffer.find('\n') {
                            let line = buffer[..newline].trim_end_matches('\r').to_string();
                            buffer.drain(..=newline);
                            if let Some(chunk) = parse_sse_line(&line) {
                                let done = matches!(chunk, StreamChunk::Done { .. });
                                yield Ok(chunk);
                                if done {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(anyhow!("Stream error: {e}"));
                        return;
                    }
                }
            }
            // Connection ended without a done marker.
            yield Err(anyhow!("AI stream ended before completion"));
        });

        Ok(stream)
    }
}
