//! Stream Events
//!
//! Typed events emitted by the server while generating a response.
//! Events are JSON objects tagged by `type`, one per line:
//!
//! ```json
//! {"type":"user_message_saved","user_message_id":"u1","expected_assistant_message_id":"m1"}
//! {"type":"thinking","content":"Looking up flights"}
//! {"type":"tool_start","tool":"search","detail":"SFO to JFK"}
//! {"type":"tool_end","tool":"search"}
//! {"type":"token","content":"Here are"}
//! {"type":"done","message_id":"m1"}
//! ```
//!
//! Server-sent-event framing is tolerated: a `data:` prefix is stripped, and
//! blank lines, `:` comments, other SSE fields and the `[DONE]` sentinel are
//! skipped.

use crate::model::{ApprovalRequest, FileAttachment, GeneratedImage, Message, Role, Source};
use crate::{Result, SyncError};
use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Ordered sequence of events for one request
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// SSE fields that carry no event payload
const IGNORED_SSE_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// One server-emitted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The server persisted the user message
    UserMessageSaved {
        user_message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
        /// Id of the placeholder reserved for the assistant reply
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_assistant_message_id: Option<String>,
    },
    Thinking {
        content: String,
    },
    ToolStart {
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    ToolDetail {
        tool: String,
        detail: String,
    },
    ToolEnd {
        tool: String,
    },
    Token {
        content: String,
    },
    ApprovalRequired(ApprovalRequest),
    Done(DoneEvent),
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default)]
        retryable: bool,
    },
}

/// Payload of the terminal `done` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneEvent {
    /// Authoritative id of the assistant message
    pub message_id: String,
    /// Full content, present on some servers even when tokens were streamed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated_images: Vec<GeneratedImage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,
}

impl DoneEvent {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            content: None,
            created_at: None,
            updated_at: None,
            sources: Vec::new(),
            generated_images: Vec::new(),
            files: Vec::new(),
            approval: None,
        }
    }

    /// Build the final message from streamed content
    ///
    /// Streamed tokens win; the event's own `content` is only used when no
    /// token arrived, which covers token events lost in transit.
    pub fn into_message(self, streamed: &str) -> Message {
        let content = if streamed.is_empty() {
            self.content.unwrap_or_default()
        } else {
            streamed.to_string()
        };

        Message {
            id: self.message_id,
            role: Role::Assistant,
            content,
            created_at: self.created_at,
            updated_at: self.updated_at,
            sources: self.sources,
            generated_images: self.generated_images,
            files: self.files,
        }
    }
}

impl StreamEvent {
    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::UserMessageSaved { .. } => "user_message_saved",
            StreamEvent::Thinking { .. } => "thinking",
            StreamEvent::ToolStart { .. } => "tool_start",
            StreamEvent::ToolDetail { .. } => "tool_detail",
            StreamEvent::ToolEnd { .. } => "tool_end",
            StreamEvent::Token { .. } => "token",
            StreamEvent::ApprovalRequired(_) => "approval_required",
            StreamEvent::Done(_) => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// Whether this event ends the sequence
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done(_) | StreamEvent::Error { .. })
    }

    /// Parse one line of the event stream
    ///
    /// Returns `Ok(None)` for lines that carry no event.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatsync_protocol::StreamEvent;
    ///
    /// let event = StreamEvent::from_line(r#"data: {"type":"token","content":"Hi"}"#)
    ///     .unwrap()
    ///     .unwrap();
    /// assert_eq!(event, StreamEvent::Token { content: "Hi".to_string() });
    ///
    /// assert!(StreamEvent::from_line("").unwrap().is_none());
    /// assert!(StreamEvent::from_line("data: [DONE]").unwrap().is_none());
    /// ```
    pub fn from_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }
        if IGNORED_SSE_FIELDS.iter().any(|field| line.starts_with(field)) {
            return Ok(None);
        }

        let payload = line
            .strip_prefix("data:")
            .map(str::trim_start)
            .unwrap_or(line);
        if payload.is_empty() || payload == "[DONE]" {
            return Ok(None);
        }

        serde_json::from_str(payload)
            .map(Some)
            .map_err(|e| SyncError::InvalidEvent(format!("Failed to deserialize event: {}", e)))
    }

    /// Serialize to a newline-terminated line
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Longest line [`LineBuffer`] keeps before discarding it
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Splits arbitrary byte chunks into complete lines
///
/// A line longer than the buffer's limit is dropped up to its terminating
/// newline.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Bytes of `pending` already searched for a newline
    scanned: usize,
    max_line: usize,
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    /// Append a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut chunk = chunk;

        if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    chunk = &chunk[pos + 1..];
                }
                None => return lines,
            }
        }

        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let raw = &self.pending[start..=end];
            if raw.len() > self.max_line + 1 {
                warn!("Dropping {} byte event line over the {} byte limit", raw.len(), self.max_line);
            } else {
                lines.push(Self::decode(raw));
            }
            start = end + 1;
            self.scanned = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();

        if self.pending.len() > self.max_line {
            warn!("Discarding unterminated event line over the {} byte limit", self.max_line);
            self.pending.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        lines
    }

    /// Return the trailing unterminated line, if any
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        self.discarding = false;
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(Self::decode(&raw))
    }

    fn decode(raw: &[u8]) -> String {
        String::from_utf8_lossy(raw)
            .trim_end_matches(&['\r', '\n'][..])
            .to_string()
    }
}

/// Decode a stream of byte chunks into typed events
///
/// Chunk boundaries may fall anywhere, including inside a UTF-8 sequence;
/// lines are only decoded once complete. A line that fails to decode is
/// yielded as `SyncError::InvalidEvent` and decoding continues; a read error
/// ends the stream.
pub fn decode_event_stream<S, B>(chunks: S) -> EventStream
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    Box::pin(stream! {
        let mut chunks = Box::pin(chunks);
        let mut buffer = LineBuffer::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for line in buffer.push(chunk.as_ref()) {
                if let Some(event) = StreamEvent::from_line(&line).transpose() {
                    yield event;
                }
            }
        }

        if let Some(line) = buffer.finish() {
            if let Some(event) = StreamEvent::from_line(&line).transpose() {
                yield event;
            }
        }
    })
}
