//! Stream Event Processor
//!
//! Drives one send from request to terminal state:
//!
//! ```text
//! THINKING <-> TOOL_ACTIVE -> STREAMING_TOKENS -> DONE | ERROR | ABORTED
//! ```
//!
//! Thinking and tool bursts may interleave with tokens in any order. Every
//! event updates the registry entry whether or not the conversation is on
//! screen; rendering is gated per event on the displayed conversation.
//!
//! A stream that ends without `done` or `error` (closed connection, read
//! failure, per-chunk timeout) is handed to the [`StreamRecoveryEngine`].
//! A user abort removes the placeholder and is reported as a normal outcome.

use crate::active_request::{ActiveRequestRegistry, ActiveRequestState, RequestKind};
use crate::completion::Completion;
use crate::config::StreamConfig;
use crate::event::{DoneEvent, StreamEvent};
use crate::model::{ApprovalRequest, ChatRequest, CompletedMessage, Message};
use crate::recovery::{InterruptionReason, RecoveryOutcome, StreamRecoveryEngine};
use crate::sync::SyncManager;
use crate::trace::ThinkingTrace;
use crate::transport::ChatTransport;
use crate::view::{is_displayed, ChatView};
use crate::{Result, SyncError};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a stream is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Thinking,
    ToolActive,
    StreamingTokens,
    Done,
    Error,
    Aborted,
}

/// How a send ended, when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The server sent `done`
    Completed(CompletedMessage),
    /// The stream was lost and the message was fetched afterwards
    Recovered(Message),
    /// The stream was lost and recovery gave up; partial content is kept
    Incomplete { content: String },
    /// The user aborted the send
    Aborted,
}

/// Accumulated state of one stream
#[derive(Debug)]
struct StreamState {
    conversation_id: String,
    temp_id: String,
    phase: StreamPhase,
    content: String,
    trace: ThinkingTrace,
    is_thinking: bool,
    user_message_id: Option<String>,
    expected_message_id: Option<String>,
    approval: Option<ApprovalRequest>,
}

impl StreamState {
    fn new(request: &ChatRequest) -> Self {
        Self {
            conversation_id: request.conversation_id.clone(),
            temp_id: request.temp_id.clone(),
            phase: StreamPhase::Thinking,
            content: String::new(),
            trace: ThinkingTrace::new(),
            is_thinking: false,
            user_message_id: None,
            expected_message_id: None,
            approval: None,
        }
    }
}

enum Flow {
    Continue,
    Done(DoneEvent),
    Error {
        message: String,
        code: Option<String>,
        retryable: bool,
    },
}

/// Live read loops per conversation
type ReadingSet = Arc<Mutex<HashMap<String, usize>>>;

/// Releases one read loop of a conversation when it ends, including when the
/// send future is dropped
///
/// A replaced send and its replacement overlap briefly, so loops are counted.
struct ReadingGuard {
    reading: ReadingSet,
    conversation_id: String,
}

impl Drop for ReadingGuard {
    fn drop(&mut self) {
        let mut reading = self.reading.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(loops) = reading.get_mut(&self.conversation_id) {
            *loops = loops.saturating_sub(1);
            if *loops == 0 {
                reading.remove(&self.conversation_id);
            }
        }
    }
}

/// Consumes server events for sends
#[derive(Clone)]
pub struct StreamEventProcessor {
    transport: Arc<dyn ChatTransport>,
    registry: ActiveRequestRegistry,
    sync: SyncManager,
    recovery: StreamRecoveryEngine,
    view: Arc<dyn ChatView>,
    completion: Completion,
    config: StreamConfig,
    reading: ReadingSet,
}

impl StreamEventProcessor {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        registry: ActiveRequestRegistry,
        sync: SyncManager,
        recovery: StreamRecoveryEngine,
        view: Arc<dyn ChatView>,
        config: StreamConfig,
    ) -> Self {
        let completion = Completion::new(registry.clone(), sync.clone(), view.clone());
        Self {
            transport,
            registry,
            sync,
            recovery,
            view,
            completion,
            config,
            reading: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Send a message and consume the streamed response
    ///
    /// # Errors
    ///
    /// Returns the transport error if the stream could not be opened,
    /// `SyncError::Stream` for a server `error` event, and
    /// `SyncError::StreamInterrupted` if the stream was lost before the server
    /// announced the reply id.
    pub async fn send_message(&self, request: ChatRequest) -> Result<SendOutcome> {
        let conversation_id = request.conversation_id.clone();
        let cancel = self.register(&conversation_id, RequestKind::Stream).await;
        let _reading = self.begin_reading(&conversation_id);

        debug!(
            "Opening stream for conversation {} (temp id {})",
            conversation_id, request.temp_id
        );
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.finish_aborted(&conversation_id).await,
            opened = timeout(self.config.request_timeout(), self.transport.stream_chat(&request)) => opened,
        };

        let mut events = match opened {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                warn!("Failed to open stream for conversation {}: {}", conversation_id, e);
                self.completion.discard(&conversation_id).await;
                return Err(e);
            }
            Err(_) => {
                warn!("Timed out opening stream for conversation {}", conversation_id);
                self.completion.discard(&conversation_id).await;
                return Err(SyncError::Timeout(format!(
                    "opening stream for conversation {}",
                    conversation_id
                )));
            }
        };

        let mut state = StreamState::new(&request);
        let chunk_timeout = self.config.chunk_timeout();
        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.finish_aborted(&conversation_id).await,
                next = timeout(chunk_timeout, events.next()) => next,
            };

            let event = match next {
                Err(_) => {
                    warn!(
                        "No event for {:?} on conversation {}",
                        chunk_timeout, conversation_id
                    );
                    break InterruptionReason::Timeout;
                }
                Ok(None) => {
                    warn!(
                        "Stream for conversation {} ended without a terminal event",
                        conversation_id
                    );
                    break InterruptionReason::Network;
                }
                Ok(Some(Err(SyncError::InvalidEvent(e)))) => {
                    warn!("Skipping malformed event: {}", e);
                    continue;
                }
                Ok(Some(Err(e))) => {
                    warn!("Stream read for conversation {} failed: {}", conversation_id, e);
                    break InterruptionReason::Network;
                }
                Ok(Some(Ok(event))) => event,
            };

            match self.apply_event(&mut state, event).await {
                Flow::Continue => {}
                Flow::Done(done) => return Ok(self.finish_done(state, done).await),
                Flow::Error {
                    message,
                    code,
                    retryable,
                } => return Err(self.finish_error(state, message, code, retryable).await),
            }
        };

        self.finish_interrupted(state, reason).await
    }

    /// Send a message and wait for the complete response
    ///
    /// The request is registered like a stream so view switches and sync
    /// suppression behave the same, and finalized through the same path.
    pub async fn send_batch(&self, request: ChatRequest) -> Result<SendOutcome> {
        let conversation_id = request.conversation_id.clone();
        let cancel = self.register(&conversation_id, RequestKind::Batch).await;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.finish_aborted(&conversation_id).await,
            result = self.transport.send_batch_chat(&request) => result,
        };

        match result {
            Ok(message) => {
                let completed = match self
                    .completion
                    .finalize(&conversation_id, message.clone(), None)
                    .await
                {
                    Some(completed) => completed,
                    None => CompletedMessage {
                        conversation_id,
                        message,
                        user_message_id: None,
                        trace: Vec::new(),
                        approval: None,
                    },
                };
                Ok(SendOutcome::Completed(completed))
            }
            Err(e) => {
                warn!("Batch send to conversation {} failed: {}", conversation_id, e);
                self.completion.discard(&conversation_id).await;
                Err(e)
            }
        }
    }

    /// Cancel the send in flight for a conversation
    pub async fn abort(&self, conversation_id: &str) -> bool {
        self.registry.abort(conversation_id).await
    }

    /// Whether a read loop is currently consuming events for the conversation
    pub fn is_reading(&self, conversation_id: &str) -> bool {
        self.reading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(conversation_id)
    }

    async fn register(&self, conversation_id: &str, kind: RequestKind) -> CancellationToken {
        let state = ActiveRequestState::new(conversation_id, kind);
        let cancel = state.cancel.clone();
        self.registry.set_active_request(state).await;
        self.sync
            .set_conversation_streaming(conversation_id, true)
            .await;
        cancel
    }

    fn begin_reading(&self, conversation_id: &str) -> ReadingGuard {
        self.reading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(conversation_id.to_string())
            .and_modify(|loops| *loops += 1)
            .or_insert(1);
        ReadingGuard {
            reading: self.reading.clone(),
            conversation_id: conversation_id.to_string(),
        }
    }

    async fn apply_event(&self, state: &mut StreamState, event: StreamEvent) -> Flow {
        let conversation_id = state.conversation_id.clone();
        let displayed = is_displayed(self.view.as_ref(), &conversation_id);
        debug!("Conversation {}: {} event", conversation_id, event.kind());

        match event {
            StreamEvent::UserMessageSaved {
                user_message_id,
                temp_id,
                expected_assistant_message_id,
            } => {
                if state.user_message_id.is_some() {
                    debug!("Ignoring repeated user_message_saved");
                    return Flow::Continue;
                }
                state.user_message_id = Some(user_message_id.clone());
                if state.expected_message_id.is_none() {
                    state.expected_message_id = expected_assistant_message_id;
                }
                self.registry
                    .set_message_ids(
                        &conversation_id,
                        Some(user_message_id.clone()),
                        state.expected_message_id.clone(),
                    )
                    .await;
                self.sync
                    .increment_local_message_count(&conversation_id, 1)
                    .await;

                if displayed {
                    let temp_id = temp_id.unwrap_or_else(|| state.temp_id.clone());
                    self.view
                        .confirm_user_message(&conversation_id, Some(&temp_id), &user_message_id);
                }
                return Flow::Continue;
            }
            StreamEvent::Thinking { content } => {
                state.trace.thinking(content);
                state.is_thinking = true;
                state.phase = StreamPhase::Thinking;
                if displayed {
                    self.view
                        .render_trace(&conversation_id, state.trace.items(), true);
                }
            }
            StreamEvent::ToolStart {
                tool,
                detail,
                metadata,
            } => {
                state.trace.tool_start(tool, detail, metadata);
                state.is_thinking = false;
                state.phase = StreamPhase::ToolActive;
                if displayed {
                    self.view
                        .render_trace(&conversation_id, state.trace.items(), false);
                }
            }
            StreamEvent::ToolDetail { tool, detail } => {
                if !state.trace.tool_detail(&tool, detail) {
                    debug!("No running tool {} for detail update", tool);
                } else if displayed {
                    self.view
                        .render_trace(&conversation_id, state.trace.items(), state.is_thinking);
                }
            }
            StreamEvent::ToolEnd { tool } => {
                state.trace.tool_end(&tool);
                if !state.trace.has_running_tool() && state.phase == StreamPhase::ToolActive {
                    state.phase = StreamPhase::Thinking;
                }
                if displayed {
                    self.view
                        .render_trace(&conversation_id, state.trace.items(), state.is_thinking);
                }
            }
            StreamEvent::Token { content } => {
                state.content.push_str(&content);
                state.phase = StreamPhase::StreamingTokens;
                if state.is_thinking {
                    state.is_thinking = false;
                    if displayed {
                        self.view
                            .render_trace(&conversation_id, state.trace.items(), false);
                    }
                }
                if displayed {
                    self.view.render_content(&conversation_id, &state.content);
                }
            }
            StreamEvent::ApprovalRequired(approval) => {
                info!(
                    "Conversation {} waiting for approval {}",
                    conversation_id, approval.approval_id
                );
                if displayed {
                    self.view.render_approval(&conversation_id, &approval);
                }
                state.approval = Some(approval);
            }
            StreamEvent::Done(done) => return Flow::Done(done),
            StreamEvent::Error {
                message,
                code,
                retryable,
            } => {
                return Flow::Error {
                    message,
                    code,
                    retryable,
                }
            }
        }

        self.registry
            .update_content(&conversation_id, &state.content, state.trace.snapshot())
            .await;
        Flow::Continue
    }

    async fn finish_done(&self, mut state: StreamState, done: DoneEvent) -> SendOutcome {
        let conversation_id = state.conversation_id.clone();
        state.trace.stop();
        state.is_thinking = false;
        state.phase = StreamPhase::Done;

        let approval = done.approval.clone().or(state.approval.take());
        let message = done.into_message(&state.content);
        self.registry
            .update_content(&conversation_id, &message.content, state.trace.snapshot())
            .await;
        self.recovery.clear_pending_recovery(&conversation_id).await;

        let completed = match self
            .completion
            .finalize(&conversation_id, message.clone(), approval.clone())
            .await
        {
            Some(completed) => completed,
            None => CompletedMessage {
                conversation_id,
                message,
                user_message_id: state.user_message_id,
                trace: state.trace.snapshot(),
                approval,
            },
        };
        SendOutcome::Completed(completed)
    }

    async fn finish_error(
        &self,
        mut state: StreamState,
        message: String,
        code: Option<String>,
        retryable: bool,
    ) -> SyncError {
        let conversation_id = state.conversation_id.clone();
        state.trace.stop();
        state.phase = StreamPhase::Error;
        warn!(
            "Server reported an error on conversation {}: {} (code {:?})",
            conversation_id, message, code
        );

        if is_displayed(self.view.as_ref(), &conversation_id) {
            self.view
                .render_trace(&conversation_id, state.trace.items(), false);
        }
        self.recovery.clear_pending_recovery(&conversation_id).await;
        self.completion
            .fail(
                &conversation_id,
                state.expected_message_id.as_deref(),
                &state.content,
            )
            .await;

        SyncError::Stream {
            message,
            code,
            retryable,
        }
    }

    async fn finish_interrupted(
        &self,
        mut state: StreamState,
        reason: InterruptionReason,
    ) -> Result<SendOutcome> {
        let conversation_id = state.conversation_id.clone();
        state.trace.stop();

        let Some(expected) = state.expected_message_id.clone() else {
            self.completion
                .fail(&conversation_id, None, &state.content)
                .await;
            return Err(SyncError::StreamInterrupted(format!(
                "conversation {} ({}) before the reply id was known",
                conversation_id, reason
            )));
        };

        self.recovery
            .mark_stream_for_recovery(&conversation_id, &expected, &state.content, reason)
            .await;

        match self.recovery.recover(&conversation_id).await {
            RecoveryOutcome::Recovered(message) => Ok(SendOutcome::Recovered(message)),
            RecoveryOutcome::NotAttempted => {
                debug!(
                    "Recovery for conversation {} not attempted; keeping partial content",
                    conversation_id
                );
                self.recovery.clear_pending_recovery(&conversation_id).await;
                self.completion
                    .mark_incomplete(&conversation_id, Some(&expected), &state.content)
                    .await;
                Ok(SendOutcome::Incomplete {
                    content: state.content,
                })
            }
            _ => Ok(SendOutcome::Incomplete {
                content: state.content,
            }),
        }
    }

    async fn finish_aborted(&self, conversation_id: &str) -> Result<SendOutcome> {
        info!("Send to conversation {} aborted", conversation_id);
        self.recovery.clear_pending_recovery(conversation_id).await;

        // A replacing send cancels this one; leave its entry alone.
        match self.registry.get_active_request(conversation_id).await {
            Some(current) if !current.cancel.is_cancelled() => {
                debug!("Conversation {} has a newer request", conversation_id);
            }
            _ => {
                self.completion.discard(conversation_id).await;
            }
        }
        Ok(SendOutcome::Aborted)
    }
}
