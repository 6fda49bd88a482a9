//! Stream Recovery
//!
//! Repairs a response whose event stream was lost (tab backgrounded, network
//! dropped, connection silently died) by fetching the persisted message.
//!
//! ## Two-phase fetch
//!
//! 1. **Find**: look the expected message up by id. A not-found answer means
//!    the server has not persisted it yet; retry over an increasing delay
//!    sequence. Any other error ends the attempt.
//! 2. **Content poll**: a found message can still be an empty placeholder
//!    while generation (or a long tool chain) runs server-side. Poll until
//!    content, files or generated images appear. Not-found at this point
//!    means the message was deleted.
//!
//! ## Bookkeeping
//!
//! At most one pending entry per conversation. Its reason can be upgraded from
//! `Visibility` to `Network`/`Timeout`, which also refreshes the interruption
//! time; any other overwrite is ignored. Concurrent attempts for the same
//! message share a single fetch sequence. An attempt for a different message
//! of the same conversation is debounced while the first one is recent; a
//! finished attempt clears the debounce.

use crate::active_request::ActiveRequestRegistry;
use crate::completion::Completion;
use crate::config::RecoveryConfig;
use crate::model::Message;
use crate::sync::SyncManager;
use crate::transport::ChatTransport;
use crate::view::{is_displayed, ChatView};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Why a stream stopped delivering events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptionReason {
    /// The tab was hidden; the stream may still be alive
    Visibility,
    /// The connection failed or closed without a terminal event
    Network,
    /// No event arrived within the per-chunk timeout
    Timeout,
}

impl InterruptionReason {
    fn severity(self) -> u8 {
        match self {
            InterruptionReason::Visibility => 0,
            InterruptionReason::Network | InterruptionReason::Timeout => 1,
        }
    }
}

impl fmt::Display for InterruptionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptionReason::Visibility => write!(f, "visibility"),
            InterruptionReason::Network => write!(f, "network"),
            InterruptionReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Interrupted stream waiting to be recovered
#[derive(Debug, Clone)]
pub struct PendingRecovery {
    pub conversation_id: String,
    pub expected_message_id: String,
    /// Content streamed before the interruption
    pub captured_content: String,
    pub interrupted_at: Instant,
    pub reason: InterruptionReason,
}

/// Result of a recovery attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// The message was fetched with content and finalized
    Recovered(Message),
    /// The message exists but stayed empty for the whole poll sequence
    Incomplete,
    /// The message disappeared while polling
    Deleted,
    /// The message never showed up
    NotFound,
    /// A transport error ended the attempt
    Failed(String),
    /// Nothing pending, debounced, or the hidden period was too short
    NotAttempted,
}

impl RecoveryOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, RecoveryOutcome::Recovered(_))
    }
}

/// Walks a fixed delay sequence
#[derive(Debug, Clone)]
pub struct DelaySchedule {
    delays: Vec<Duration>,
    /// Number of delays handed out so far
    pub attempt: usize,
}

impl DelaySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays, attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn has_attempts_remaining(&self) -> bool {
        self.attempt < self.delays.len()
    }

    /// Next delay, or `None` once the sequence is exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.delays.get(self.attempt).copied()?;
        self.attempt += 1;
        Some(delay)
    }

    pub fn status(&self) -> String {
        format!("attempt {}/{}", self.attempt, self.delays.len())
    }
}

type SharedRecovery = Shared<BoxFuture<'static, RecoveryOutcome>>;

/// Attempt currently running for a conversation
struct InFlight {
    message_id: String,
    attempt: SharedRecovery,
}

#[derive(Default)]
struct RecoveryState {
    pending: HashMap<String, PendingRecovery>,
    last_attempt: HashMap<String, Instant>,
    in_flight: HashMap<String, InFlight>,
}

/// Recovers interrupted streams from the persisted message
#[derive(Clone)]
pub struct StreamRecoveryEngine {
    transport: Arc<dyn ChatTransport>,
    sync: SyncManager,
    view: Arc<dyn ChatView>,
    completion: Completion,
    config: RecoveryConfig,
    state: Arc<Mutex<RecoveryState>>,
}

impl StreamRecoveryEngine {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        registry: ActiveRequestRegistry,
        sync: SyncManager,
        view: Arc<dyn ChatView>,
        config: RecoveryConfig,
    ) -> Self {
        let completion = Completion::new(registry, sync.clone(), view.clone());
        Self {
            transport,
            sync,
            view,
            completion,
            config,
            state: Arc::new(Mutex::new(RecoveryState::default())),
        }
    }

    /// Record an interruption; performs no I/O
    pub async fn mark_stream_for_recovery(
        &self,
        conversation_id: &str,
        expected_message_id: &str,
        captured_content: &str,
        reason: InterruptionReason,
    ) {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.pending.get_mut(conversation_id) {
            if reason.severity() > existing.reason.severity() {
                debug!(
                    "Upgrading recovery for conversation {} from {} to {}",
                    conversation_id, existing.reason, reason
                );
                existing.reason = reason;
                existing.interrupted_at = Instant::now();
                existing.expected_message_id = expected_message_id.to_string();
                if captured_content.len() > existing.captured_content.len() {
                    existing.captured_content = captured_content.to_string();
                }
            } else {
                debug!(
                    "Recovery for conversation {} already pending ({}); ignoring {}",
                    conversation_id, existing.reason, reason
                );
            }
            return;
        }

        info!(
            "Conversation {} interrupted ({}); message {} marked for recovery",
            conversation_id, reason, expected_message_id
        );
        state.pending.insert(
            conversation_id.to_string(),
            PendingRecovery {
                conversation_id: conversation_id.to_string(),
                expected_message_id: expected_message_id.to_string(),
                captured_content: captured_content.to_string(),
                interrupted_at: Instant::now(),
                reason,
            },
        );
    }

    /// Try to recover the pending stream; true if the message was recovered
    pub async fn attempt_recovery(&self, conversation_id: &str) -> bool {
        self.recover(conversation_id).await.is_recovered()
    }

    /// Try to recover the pending stream and report how it went
    pub async fn recover(&self, conversation_id: &str) -> RecoveryOutcome {
        let attempt = {
            let mut state = self.state.lock().await;
            let Some(pending) = state.pending.get(conversation_id).cloned() else {
                return RecoveryOutcome::NotAttempted;
            };

            let running = state
                .in_flight
                .get(conversation_id)
                .filter(|in_flight| in_flight.message_id == pending.expected_message_id);
            if let Some(in_flight) = running {
                debug!(
                    "Recovery already running for conversation {}; joining it",
                    conversation_id
                );
                in_flight.attempt.clone()
            } else {
                if let Some(last) = state.last_attempt.get(conversation_id) {
                    if last.elapsed() < self.config.debounce() {
                        debug!("Recovery for conversation {} debounced", conversation_id);
                        return RecoveryOutcome::NotAttempted;
                    }
                }

                if pending.reason == InterruptionReason::Visibility
                    && pending.interrupted_at.elapsed() < self.config.min_hidden()
                {
                    debug!(
                        "Conversation {} was hidden only briefly; dropping recovery",
                        conversation_id
                    );
                    state.pending.remove(conversation_id);
                    return RecoveryOutcome::NotAttempted;
                }

                state
                    .last_attempt
                    .insert(conversation_id.to_string(), Instant::now());
                let engine = self.clone();
                let expected_message_id = pending.expected_message_id.clone();
                let attempt = async move { engine.run(pending).await }.boxed().shared();
                state.in_flight.insert(
                    conversation_id.to_string(),
                    InFlight {
                        message_id: expected_message_id,
                        attempt: attempt.clone(),
                    },
                );
                attempt
            }
        };

        attempt.await
    }

    pub async fn has_pending_recovery(&self, conversation_id: &str) -> bool {
        self.state.lock().await.pending.contains_key(conversation_id)
    }

    pub async fn pending_recovery(&self, conversation_id: &str) -> Option<PendingRecovery> {
        self.state.lock().await.pending.get(conversation_id).cloned()
    }

    /// Conversations with a pending entry
    pub async fn pending_conversations(&self) -> Vec<String> {
        self.state.lock().await.pending.keys().cloned().collect()
    }

    pub async fn is_recovering(&self, conversation_id: &str) -> bool {
        self.state.lock().await.in_flight.contains_key(conversation_id)
    }

    /// Drop the pending entry, e.g. after `done` or a user abort
    pub async fn clear_pending_recovery(&self, conversation_id: &str) {
        let mut state = self.state.lock().await;
        if state.pending.remove(conversation_id).is_some() {
            debug!("Cleared pending recovery for conversation {}", conversation_id);
        }
        state.last_attempt.remove(conversation_id);
    }

    /// Forget everything; in-flight attempts run to completion unobserved
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.pending.clear();
        state.last_attempt.clear();
        state.in_flight.clear();
    }

    async fn run(self, pending: PendingRecovery) -> RecoveryOutcome {
        let conversation_id = pending.conversation_id.as_str();
        info!(
            "Recovering message {} for conversation {} after {} interruption",
            pending.expected_message_id, conversation_id, pending.reason
        );

        let outcome = self.fetch(&pending.expected_message_id).await;
        match &outcome {
            RecoveryOutcome::Recovered(message) => {
                self.apply_recovered(conversation_id, message.clone()).await;
            }
            other => {
                warn!(
                    "Recovery of message {} failed: {:?}",
                    pending.expected_message_id, other
                );
                self.completion
                    .mark_incomplete(
                        conversation_id,
                        Some(&pending.expected_message_id),
                        &pending.captured_content,
                    )
                    .await;
            }
        }

        // Entries recorded or upgraded while this attempt ran stay pending.
        let mut state = self.state.lock().await;
        let unchanged = state.pending.get(conversation_id).is_some_and(|current| {
            current.expected_message_id == pending.expected_message_id
                && current.interrupted_at == pending.interrupted_at
        });
        if unchanged {
            state.pending.remove(conversation_id);
        }
        let owned = state
            .in_flight
            .get(conversation_id)
            .is_some_and(|in_flight| in_flight.message_id == pending.expected_message_id);
        if owned {
            state.in_flight.remove(conversation_id);
            state.last_attempt.remove(conversation_id);
        }
        outcome
    }

    async fn fetch(&self, message_id: &str) -> RecoveryOutcome {
        let mut find = DelaySchedule::new(self.config.find_delays());
        let message = loop {
            match self.transport.get_message(message_id).await {
                Ok(message) => break message,
                Err(e) if e.is_not_found() => match find.next_delay() {
                    Some(delay) => {
                        debug!(
                            "Message {} not persisted yet, retrying in {:?} ({})",
                            message_id,
                            delay,
                            find.status()
                        );
                        sleep(delay).await;
                    }
                    None => return RecoveryOutcome::NotFound,
                },
                Err(e) => return RecoveryOutcome::Failed(e.to_string()),
            }
        };

        if message.has_payload() {
            return RecoveryOutcome::Recovered(message);
        }

        let mut poll = DelaySchedule::new(self.config.poll_delays());
        while let Some(delay) = poll.next_delay() {
            debug!(
                "Message {} is still empty, polling in {:?} ({})",
                message_id,
                delay,
                poll.status()
            );
            sleep(delay).await;

            match self.transport.get_message(message_id).await {
                Ok(message) if message.has_payload() => return RecoveryOutcome::Recovered(message),
                Ok(_) => {}
                Err(e) if e.is_not_found() => return RecoveryOutcome::Deleted,
                Err(e) if e.is_recoverable() => {
                    debug!("Transient error polling message {}: {}", message_id, e);
                }
                Err(e) => return RecoveryOutcome::Failed(e.to_string()),
            }
        }

        RecoveryOutcome::Incomplete
    }

    async fn apply_recovered(&self, conversation_id: &str, message: Message) {
        if is_displayed(self.view.as_ref(), conversation_id) {
            self.view.restore_placeholder(conversation_id, &message);
            self.view.render_content(conversation_id, &message.content);
        }

        let message_id = message.id.clone();
        self.completion.finalize(conversation_id, message, None).await;
        info!(
            "Recovered message {} for conversation {}",
            message_id, conversation_id
        );

        let outcome = self.sync.incremental_sync().await;
        debug!("Post-recovery sync: {:?}", outcome);
    }
}
