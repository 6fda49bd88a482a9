//! Test doubles for the transport, view and sync callbacks

use crate::event::{EventStream, StreamEvent};
use crate::model::{
    ChatRequest, CompletedMessage, ConversationSummary, Message, RemoteConversation, SyncCursor,
    SyncResponse,
};
use crate::sync::SyncCallbacks;
use crate::trace::ThinkingTraceItem;
use crate::transport::ChatTransport;
use crate::view::ChatView;
use crate::{ApprovalRequest, Result, SyncError};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn remote(id: &str, message_count: u32) -> RemoteConversation {
    RemoteConversation {
        id: id.to_string(),
        title: format!("Conversation {}", id),
        model: None,
        updated_at: Utc::now(),
        message_count,
    }
}

pub fn sync_response(conversations: Vec<RemoteConversation>, server_time: &str) -> SyncResponse {
    SyncResponse {
        conversations,
        server_time: SyncCursor(server_time.to_string()),
    }
}

/// Scripted answer to a message fetch or batch send
#[derive(Debug, Clone)]
pub enum MessageReply {
    Found(Message),
    NotFound,
    Error(String),
}

impl MessageReply {
    fn into_result(self, message_id: &str) -> Result<Message> {
        match self {
            MessageReply::Found(message) => Ok(message),
            MessageReply::NotFound => Err(SyncError::NotFound(message_id.to_string())),
            MessageReply::Error(message) => Err(SyncError::transport(message, None, false)),
        }
    }
}

#[derive(Debug)]
enum StreamScript {
    Events { events: Vec<StreamEvent>, hang: bool },
    Fail(String),
}

/// Transport answering from scripted queues
///
/// An empty message queue answers not-found; an empty sync queue fails.
#[derive(Debug, Default)]
pub struct MockTransport {
    messages: Mutex<VecDeque<MessageReply>>,
    message_calls: AtomicUsize,
    message_delay: Option<Duration>,
    syncs: Mutex<VecDeque<std::result::Result<SyncResponse, String>>>,
    sync_calls: Mutex<Vec<(Option<SyncCursor>, bool)>>,
    sync_delay: Option<Duration>,
    streams: Mutex<VecDeque<StreamScript>>,
    batches: Mutex<VecDeque<MessageReply>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message_delay(mut self, delay: Duration) -> Self {
        self.message_delay = Some(delay);
        self
    }

    pub fn with_sync_delay(mut self, delay: Duration) -> Self {
        self.sync_delay = Some(delay);
        self
    }

    pub fn push_message(&self, reply: MessageReply) {
        self.messages.lock().unwrap().push_back(reply);
    }

    pub fn push_sync(&self, response: SyncResponse) {
        self.syncs.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_sync_error(&self, message: &str) {
        self.syncs.lock().unwrap().push_back(Err(message.to_string()));
    }

    /// Queue a stream; with `hang` the stream stays open after the events
    pub fn push_stream(&self, events: Vec<StreamEvent>, hang: bool) {
        self.streams
            .lock()
            .unwrap()
            .push_back(StreamScript::Events { events, hang });
    }

    pub fn push_stream_error(&self, message: &str) {
        self.streams
            .lock()
            .unwrap()
            .push_back(StreamScript::Fail(message.to_string()));
    }

    pub fn push_batch(&self, reply: MessageReply) {
        self.batches.lock().unwrap().push_back(reply);
    }

    pub fn message_calls(&self) -> usize {
        self.message_calls.load(Ordering::SeqCst)
    }

    pub fn sync_calls(&self) -> Vec<(Option<SyncCursor>, bool)> {
        self.sync_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn get_message(&self, message_id: &str) -> Result<Message> {
        self.message_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.message_delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .messages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MessageReply::NotFound);
        reply.into_result(message_id)
    }

    async fn sync_conversations(
        &self,
        since: Option<&SyncCursor>,
        full: bool,
    ) -> Result<SyncResponse> {
        self.sync_calls.lock().unwrap().push((since.cloned(), full));
        if let Some(delay) = self.sync_delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.syncs.lock().unwrap().pop_front();
        match reply {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(SyncError::transport(message, None, true)),
            None => Err(SyncError::NetworkError("no scripted sync reply".to_string())),
        }
    }

    async fn stream_chat(&self, _request: &ChatRequest) -> Result<EventStream> {
        let script = self.streams.lock().unwrap().pop_front();
        match script {
            Some(StreamScript::Events { events, hang }) => {
                let events = stream::iter(events.into_iter().map(Ok));
                if hang {
                    Ok(events.chain(stream::pending()).boxed())
                } else {
                    Ok(events.boxed())
                }
            }
            Some(StreamScript::Fail(message)) => Err(SyncError::transport(message, None, true)),
            None => Ok(stream::empty().boxed()),
        }
    }

    async fn send_batch_chat(&self, request: &ChatRequest) -> Result<Message> {
        let reply = self
            .batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MessageReply::Error("no scripted batch reply".to_string()));
        reply.into_result(&request.temp_id)
    }
}

/// Rendering call observed by [`RecordingView`]
#[derive(Debug, Clone, PartialEq)]
pub enum ViewCall {
    ConfirmUser {
        conversation_id: String,
        temp_id: Option<String>,
        user_message_id: String,
    },
    Trace {
        conversation_id: String,
        items: Vec<ThinkingTraceItem>,
        is_thinking: bool,
    },
    Content(String, String),
    Approval(String, String),
    Finalized(String, String),
    Incomplete {
        conversation_id: String,
        message_id: Option<String>,
        content: String,
    },
    RemovePlaceholder(String),
    RestorePlaceholder(String, String),
}

/// View that records every rendering call
#[derive(Debug, Default)]
pub struct RecordingView {
    displayed: Mutex<Option<String>>,
    calls: Mutex<Vec<ViewCall>>,
    finalized: Mutex<Vec<CompletedMessage>>,
}

impl RecordingView {
    pub fn displaying(conversation_id: &str) -> Self {
        let view = Self::default();
        view.set_displayed(Some(conversation_id));
        view
    }

    pub fn set_displayed(&self, conversation_id: Option<&str>) {
        *self.displayed.lock().unwrap() = conversation_id.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<ViewCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn finalized(&self) -> Vec<CompletedMessage> {
        self.finalized.lock().unwrap().clone()
    }

    fn record(&self, call: ViewCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ChatView for RecordingView {
    fn displayed_conversation(&self) -> Option<String> {
        self.displayed.lock().unwrap().clone()
    }

    fn confirm_user_message(&self, conversation_id: &str, temp_id: Option<&str>, user_message_id: &str) {
        self.record(ViewCall::ConfirmUser {
            conversation_id: conversation_id.to_string(),
            temp_id: temp_id.map(str::to_string),
            user_message_id: user_message_id.to_string(),
        });
    }

    fn render_trace(&self, conversation_id: &str, trace: &[ThinkingTraceItem], is_thinking: bool) {
        self.record(ViewCall::Trace {
            conversation_id: conversation_id.to_string(),
            items: trace.to_vec(),
            is_thinking,
        });
    }

    fn render_content(&self, conversation_id: &str, content: &str) {
        self.record(ViewCall::Content(
            conversation_id.to_string(),
            content.to_string(),
        ));
    }

    fn render_approval(&self, conversation_id: &str, approval: &ApprovalRequest) {
        self.record(ViewCall::Approval(
            conversation_id.to_string(),
            approval.approval_id.clone(),
        ));
    }

    fn finalize_message(&self, conversation_id: &str, completed: &CompletedMessage) {
        self.record(ViewCall::Finalized(
            conversation_id.to_string(),
            completed.message.id.clone(),
        ));
        self.finalized.lock().unwrap().push(completed.clone());
    }

    fn mark_incomplete(&self, conversation_id: &str, message_id: Option<&str>, content: &str) {
        self.record(ViewCall::Incomplete {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.map(str::to_string),
            content: content.to_string(),
        });
    }

    fn remove_placeholder(&self, conversation_id: &str) {
        self.record(ViewCall::RemovePlaceholder(conversation_id.to_string()));
    }

    fn restore_placeholder(&self, conversation_id: &str, message: &Message) {
        self.record(ViewCall::RestorePlaceholder(
            conversation_id.to_string(),
            message.id.clone(),
        ));
    }
}

/// Sync callbacks that record every notification
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    updates: Mutex<Vec<Vec<ConversationSummary>>>,
    deleted: Mutex<Vec<String>>,
    external_updates: Mutex<Vec<(String, u32)>>,
}

impl RecordingCallbacks {
    pub fn updates(&self) -> Vec<Vec<ConversationSummary>> {
        self.updates.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn external_updates(&self) -> Vec<(String, u32)> {
        self.external_updates.lock().unwrap().clone()
    }
}

impl SyncCallbacks for RecordingCallbacks {
    fn on_conversations_updated(&self, conversations: &[ConversationSummary]) {
        self.updates.lock().unwrap().push(conversations.to_vec());
    }

    fn on_current_conversation_deleted(&self, conversation_id: &str) {
        self.deleted
            .lock()
            .unwrap()
            .push(conversation_id.to_string());
    }

    fn on_current_conversation_external_update(&self, conversation_id: &str, message_count: u32) {
        self.external_updates
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), message_count));
    }
}
