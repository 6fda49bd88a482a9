//! Terminal bookkeeping shared by the stream processor and the recovery engine
//!
//! A send ends exactly once. Whichever path gets there first removes the
//! registry entry and does the bookkeeping; later calls find no entry and only
//! log.

use crate::active_request::{ActiveRequestRegistry, ActiveRequestState};
use crate::model::{ApprovalRequest, CompletedMessage, Message};
use crate::sync::SyncManager;
use crate::view::{is_displayed, ChatView};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub(crate) struct Completion {
    registry: ActiveRequestRegistry,
    sync: SyncManager,
    view: Arc<dyn ChatView>,
}

impl Completion {
    pub(crate) fn new(
        registry: ActiveRequestRegistry,
        sync: SyncManager,
        view: Arc<dyn ChatView>,
    ) -> Self {
        Self {
            registry,
            sync,
            view,
        }
    }

    /// Finalize a successful send
    ///
    /// Bumps the local baseline by one for the assistant message, or by two
    /// when the user message was never confirmed. Returns `None` if the send
    /// was already finalized elsewhere.
    pub(crate) async fn finalize(
        &self,
        conversation_id: &str,
        message: Message,
        approval: Option<ApprovalRequest>,
    ) -> Option<CompletedMessage> {
        let Some(state) = self.registry.remove_active_request(conversation_id).await else {
            debug!(
                "Conversation {} already finalized; ignoring message {}",
                conversation_id, message.id
            );
            return None;
        };

        let bump = if state.user_message_id.is_some() { 1 } else { 2 };
        self.sync
            .increment_local_message_count(conversation_id, bump)
            .await;
        self.sync
            .set_conversation_streaming(conversation_id, false)
            .await;

        let completed = CompletedMessage {
            conversation_id: conversation_id.to_string(),
            message,
            user_message_id: state.user_message_id,
            trace: state.trace,
            approval,
        };

        if is_displayed(self.view.as_ref(), conversation_id) {
            self.view.finalize_message(conversation_id, &completed);
        }
        info!(
            "Conversation {}: message {} complete ({} chars)",
            conversation_id,
            completed.message.id,
            completed.message.content.len()
        );
        Some(completed)
    }

    /// End a send that produced no usable message
    ///
    /// Partial content stays visible flagged incomplete; an empty placeholder
    /// is removed.
    pub(crate) async fn fail(
        &self,
        conversation_id: &str,
        message_id: Option<&str>,
        content: &str,
    ) -> Option<ActiveRequestState> {
        if content.trim().is_empty() {
            return self.discard(conversation_id).await;
        }
        self.mark_incomplete(conversation_id, message_id, content)
            .await
    }

    /// Keep the placeholder, flagged incomplete with a reload action
    pub(crate) async fn mark_incomplete(
        &self,
        conversation_id: &str,
        message_id: Option<&str>,
        content: &str,
    ) -> Option<ActiveRequestState> {
        if is_displayed(self.view.as_ref(), conversation_id) {
            self.view
                .mark_incomplete(conversation_id, message_id, content);
        }
        self.release(conversation_id).await
    }

    /// End a send without leaving anything behind, e.g. on user abort
    pub(crate) async fn discard(&self, conversation_id: &str) -> Option<ActiveRequestState> {
        if is_displayed(self.view.as_ref(), conversation_id) {
            self.view.remove_placeholder(conversation_id);
        }
        self.release(conversation_id).await
    }

    async fn release(&self, conversation_id: &str) -> Option<ActiveRequestState> {
        let state = self.registry.remove_active_request(conversation_id).await;
        self.sync
            .set_conversation_streaming(conversation_id, false)
            .await;
        state
    }
}
