//! Chat Session
//!
//! Constructs every component once per signed-in session and wires them
//! together. The view layer holds a `ChatSession` and reaches the components
//! through it.

use crate::active_request::ActiveRequestRegistry;
use crate::config::EngineConfig;
use crate::model::ChatRequest;
use crate::navigation::{NavigationTarget, NavigationToken, NavigationTokenGuard};
use crate::recovery::{InterruptionReason, StreamRecoveryEngine};
use crate::stream::{SendOutcome, StreamEventProcessor};
use crate::sync::{SyncCallbacks, SyncManager, SyncOutcome};
use crate::transport::ChatTransport;
use crate::view::ChatView;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ChatSession {
    config: EngineConfig,
    navigation: NavigationTokenGuard,
    registry: ActiveRequestRegistry,
    sync: SyncManager,
    recovery: StreamRecoveryEngine,
    processor: StreamEventProcessor,
}

impl ChatSession {
    /// Build a session
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Configuration` if `config` fails validation.
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        view: Arc<dyn ChatView>,
        callbacks: Arc<dyn SyncCallbacks>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let registry = ActiveRequestRegistry::new();
        let sync = SyncManager::new(
            transport.clone(),
            callbacks,
            registry.clone(),
            config.sync.clone(),
        );
        let recovery = StreamRecoveryEngine::new(
            transport.clone(),
            registry.clone(),
            sync.clone(),
            view.clone(),
            config.recovery.clone(),
        );
        let processor = StreamEventProcessor::new(
            transport,
            registry.clone(),
            sync.clone(),
            recovery.clone(),
            view,
            config.stream.clone(),
        );

        Ok(Self {
            config,
            navigation: NavigationTokenGuard::new(),
            registry,
            sync,
            recovery,
            processor,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn navigation(&self) -> &NavigationTokenGuard {
        &self.navigation
    }

    pub fn registry(&self) -> &ActiveRequestRegistry {
        &self.registry
    }

    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    pub fn recovery(&self) -> &StreamRecoveryEngine {
        &self.recovery
    }

    pub fn processor(&self) -> &StreamEventProcessor {
        &self.processor
    }

    pub async fn start(&self) {
        info!("Starting chat session");
        self.sync.start().await;
    }

    pub async fn stop(&self) {
        self.sync.stop().await;
        info!("Chat session stopped");
    }

    /// Stop and drop all state, cancelling anything in flight
    pub async fn reset(&self) {
        self.sync.reset().await;
        self.registry.clear().await;
        self.recovery.reset().await;
        info!("Chat session reset");
    }

    pub async fn send(&self, request: ChatRequest) -> Result<SendOutcome> {
        self.processor.send_message(request).await
    }

    pub async fn send_batch(&self, request: ChatRequest) -> Result<SendOutcome> {
        self.processor.send_batch(request).await
    }

    pub async fn abort(&self, conversation_id: &str) -> bool {
        self.processor.abort(conversation_id).await
    }

    /// Start a view transition; pass the token back once loading finished
    pub fn begin_navigation(&self, target: NavigationTarget) -> NavigationToken {
        self.navigation.start_navigation(target)
    }

    /// Make a loaded conversation current, unless a newer navigation won
    pub async fn finish_open_conversation(
        &self,
        token: NavigationToken,
        conversation_id: &str,
        message_count: u32,
    ) -> bool {
        if !self.navigation.is_valid(token) {
            debug!(
                "Navigation to conversation {} superseded; discarding result",
                conversation_id
            );
            return false;
        }
        self.sync
            .set_current_conversation(Some(conversation_id.to_string()))
            .await;
        self.sync
            .mark_conversation_read(conversation_id, message_count)
            .await;
        true
    }

    /// Leave the conversation view for a special view, unless superseded
    pub async fn finish_open_view(&self, token: NavigationToken) -> bool {
        if !self.navigation.is_valid(token) {
            return false;
        }
        self.sync.set_current_conversation(None).await;
        true
    }

    /// Forward tab visibility to sync and recovery
    ///
    /// Hiding records a visibility interruption for every stream whose reply
    /// id is known. Showing again runs the refocus sync and then recovers any
    /// pending stream that is no longer being read.
    pub async fn set_visibility(&self, visible: bool) -> Option<SyncOutcome> {
        if !visible {
            for conversation_id in self.registry.streaming_conversations().await {
                let Some(state) = self.registry.get_active_request(&conversation_id).await else {
                    continue;
                };
                if let Some(expected) = state.expected_message_id.as_deref() {
                    self.recovery
                        .mark_stream_for_recovery(
                            &conversation_id,
                            expected,
                            &state.content,
                            InterruptionReason::Visibility,
                        )
                        .await;
                }
            }
        }

        let outcome = self.sync.set_visibility(visible).await;

        if visible {
            for conversation_id in self.recovery.pending_conversations().await {
                if self.processor.is_reading(&conversation_id) {
                    continue;
                }
                let recovered = self.recovery.attempt_recovery(&conversation_id).await;
                debug!(
                    "Refocus recovery for conversation {}: {}",
                    conversation_id, recovered
                );
            }
        }

        outcome
    }
}
