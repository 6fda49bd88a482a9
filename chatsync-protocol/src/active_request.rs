//! Active Request Registry
//!
//! Tracks in-flight sends per conversation so a view that is switched away from
//! and back to mid-stream can resume from the accumulated content instead of
//! starting over.
//!
//! There is at most one entry per conversation. Content only grows for the
//! lifetime of an entry.

use crate::trace::ThinkingTraceItem;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the response is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Token-streamed response
    Stream,
    /// Single response delivered when generation completes
    Batch,
}

/// In-flight send for one conversation
#[derive(Debug, Clone)]
pub struct ActiveRequestState {
    pub conversation_id: String,
    pub kind: RequestKind,
    pub content: String,
    pub trace: Vec<ThinkingTraceItem>,
    /// Canonical user message id once the server confirmed it
    pub user_message_id: Option<String>,
    /// Placeholder id reserved by the server for the reply
    pub expected_message_id: Option<String>,
    pub cancel: CancellationToken,
    pub started_at: Instant,
}

impl ActiveRequestState {
    pub fn new(conversation_id: impl Into<String>, kind: RequestKind) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind,
            content: String::new(),
            trace: Vec::new(),
            user_message_id: None,
            expected_message_id: None,
            cancel: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }
}

/// Registry of in-flight requests, keyed by conversation id
#[derive(Debug, Clone, Default)]
pub struct ActiveRequestRegistry {
    requests: Arc<RwLock<HashMap<String, ActiveRequestState>>>,
}

impl ActiveRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request, cancelling any request it replaces
    pub async fn set_active_request(&self, state: ActiveRequestState) {
        let mut requests = self.requests.write().await;
        let conversation_id = state.conversation_id.clone();
        if let Some(previous) = requests.insert(conversation_id.clone(), state) {
            warn!(
                "Replacing active request for conversation {}; cancelling the previous one",
                conversation_id
            );
            previous.cancel.cancel();
        }
        debug!("Registered active request for conversation {}", conversation_id);
    }

    pub async fn get_active_request(&self, conversation_id: &str) -> Option<ActiveRequestState> {
        self.requests.read().await.get(conversation_id).cloned()
    }

    /// Update accumulated content and trace
    ///
    /// Updates that would shrink the content are ignored. Returns whether the
    /// update was applied.
    pub async fn update_content(
        &self,
        conversation_id: &str,
        content: &str,
        trace: Vec<ThinkingTraceItem>,
    ) -> bool {
        let mut requests = self.requests.write().await;
        let Some(state) = requests.get_mut(conversation_id) else {
            return false;
        };

        if content.len() < state.content.len() {
            debug!(
                "Ignoring shrinking content update for conversation {} ({} < {} bytes)",
                conversation_id,
                content.len(),
                state.content.len()
            );
            return false;
        }

        state.content.clear();
        state.content.push_str(content);
        state.trace = trace;
        true
    }

    /// Record the server-confirmed message ids
    pub async fn set_message_ids(
        &self,
        conversation_id: &str,
        user_message_id: Option<String>,
        expected_message_id: Option<String>,
    ) {
        let mut requests = self.requests.write().await;
        if let Some(state) = requests.get_mut(conversation_id) {
            if user_message_id.is_some() {
                state.user_message_id = user_message_id;
            }
            if expected_message_id.is_some() {
                state.expected_message_id = expected_message_id;
            }
        }
    }

    pub async fn remove_active_request(&self, conversation_id: &str) -> Option<ActiveRequestState> {
        let removed = self.requests.write().await.remove(conversation_id);
        if removed.is_some() {
            debug!("Removed active request for conversation {}", conversation_id);
        }
        removed
    }

    /// Whether a streamed response is in flight for the conversation
    pub async fn is_streaming(&self, conversation_id: &str) -> bool {
        self.requests
            .read()
            .await
            .get(conversation_id)
            .map(|state| state.kind == RequestKind::Stream)
            .unwrap_or(false)
    }

    /// Ids of conversations with a streamed response in flight
    pub async fn streaming_conversations(&self) -> Vec<String> {
        self.requests
            .read()
            .await
            .values()
            .filter(|state| state.kind == RequestKind::Stream)
            .map(|state| state.conversation_id.clone())
            .collect()
    }

    /// Cancel the request for a conversation
    ///
    /// The entry stays registered; the owner of the request observes the
    /// cancellation and cleans up. Returns false if nothing was in flight.
    pub async fn abort(&self, conversation_id: &str) -> bool {
        match self.requests.read().await.get(conversation_id) {
            Some(state) => {
                info!("Aborting active request for conversation {}", conversation_id);
                state.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and drop every entry
    pub async fn clear(&self) {
        let mut requests = self.requests.write().await;
        for state in requests.values() {
            state.cancel.cancel();
        }
        requests.clear();
    }

    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.is_empty()
    }
}
