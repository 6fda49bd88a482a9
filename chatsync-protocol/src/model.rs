//! Shared data model
//!
//! Wire records exchanged with the server (messages, sync responses) and the
//! local conversation summaries derived from them.

use crate::trace::ThinkingTraceItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    #[default]
    Assistant,
    System,
}

/// Web source cited by an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Image generated during a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// File attached to or produced by a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A persisted message as returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: String,
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
}

impl Message {
    /// Create an assistant message with the given content and no attachments
    pub fn assistant(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: content.into(),
            created_at: None,
            updated_at: None,
            sources: Vec::new(),
            generated_images: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Whether the message carries anything worth rendering
    ///
    /// A placeholder reserved by the server before generation finishes has
    /// blank content and no files or images.
    pub fn has_payload(&self) -> bool {
        !self.content.trim().is_empty() || !self.files.is_empty() || !self.generated_images.is_empty()
    }
}

/// Tool call waiting for explicit user approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approval_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A user send, as handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub conversation_id: String,
    pub content: String,
    /// Client-generated id shown until the server confirms the user message
    pub temp_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_ids: Vec<String>,
}

impl ChatRequest {
    /// Create a request with a fresh client temp id
    pub fn new(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            content: content.into(),
            temp_id: format!("temp-{}", Uuid::new_v4()),
            model: None,
            file_ids: Vec::new(),
        }
    }

    /// Select the model for this request
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach previously uploaded files
    pub fn with_files(mut self, file_ids: Vec<String>) -> Self {
        self.file_ids = file_ids;
        self
    }
}

/// Final state of a successfully delivered assistant response
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedMessage {
    pub conversation_id: String,
    pub message: Message,
    /// Canonical id of the user message that triggered the response
    pub user_message_id: Option<String>,
    pub trace: Vec<ThinkingTraceItem>,
    pub approval: Option<ApprovalRequest>,
}

/// Opaque server timestamp marking the last applied sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(pub String);

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation record as reported by the sync endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConversation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub message_count: u32,
}

/// Response of the sync endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub conversations: Vec<RemoteConversation>,
    pub server_time: SyncCursor,
}

/// Local view of a conversation in the sidebar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub model: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Message count last reported by the server
    pub message_count: u32,
    /// Message count this client has accounted for
    pub baseline: u32,
    pub unread_count: u32,
    /// Set while the open conversation has unseen server-side messages
    #[serde(skip)]
    pub has_external_update: bool,
}

impl ConversationSummary {
    /// Create a summary for a conversation that only exists locally so far
    pub fn local(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            model: None,
            updated_at: Utc::now(),
            message_count: 0,
            baseline: 0,
            unread_count: 0,
            has_external_update: false,
        }
    }

    /// Refresh the server-owned fields from a sync record
    pub(crate) fn apply_remote(&mut self, remote: &RemoteConversation) {
        self.title = remote.title.clone();
        self.model = remote.model.clone();
        self.updated_at = remote.updated_at;
        self.message_count = remote.message_count;
    }
}

impl From<&RemoteConversation> for ConversationSummary {
    fn from(remote: &RemoteConversation) -> Self {
        Self {
            id: remote.id.clone(),
            title: remote.title.clone(),
            model: remote.model.clone(),
            updated_at: remote.updated_at,
            message_count: remote.message_count,
            baseline: 0,
            unread_count: 0,
            has_external_update: false,
        }
    }
}
