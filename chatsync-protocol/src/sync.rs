//! Conversation Sync
//!
//! Polls the server for conversation changes and keeps the local summaries,
//! unread counts and "external update" signals consistent across devices.
//!
//! ## Sync modes
//!
//! - **Full**: the complete conversation set. Runs on start, after a long
//!   hidden period, and whenever no cursor exists. Detects deletions by set
//!   difference and re-baselines unread accounting.
//! - **Incremental**: conversations changed since the last server timestamp.
//!   Runs on a fixed interval while visible and once on refocus.
//!
//! ## Guarantees
//!
//! - At most one sync runs at a time; a trigger arriving while one is in flight
//!   is dropped.
//! - Conversations with a response streaming into them are skipped entirely.
//!   Their baseline moves only through explicit local bumps when the stream
//!   completes, so the user never sees "new messages from another device" for
//!   their own reply.
//! - The open conversation never has server-side messages spliced in; an
//!   external-update callback is raised instead.
//! - Network failures are logged and swallowed. The scheduler keeps running.

use crate::active_request::ActiveRequestRegistry;
use crate::config::SyncConfig;
use crate::model::{ConversationSummary, SyncCursor, SyncResponse};
use crate::transport::ChatTransport;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Notifications raised to the view layer after a sync is applied
pub trait SyncCallbacks: Send + Sync {
    /// The conversation list changed; `conversations` is the full list,
    /// most recently updated first
    fn on_conversations_updated(&self, conversations: &[ConversationSummary]);

    /// The conversation on screen was deleted on another device
    fn on_current_conversation_deleted(&self, conversation_id: &str);

    /// The conversation on screen has messages this client has not shown
    fn on_current_conversation_external_update(&self, conversation_id: &str, message_count: u32);
}

/// Kind of sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Result of a sync trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied {
        mode: SyncMode,
        updated: usize,
        deleted: usize,
    },
    /// Another sync was in flight
    Skipped,
    /// The request failed; the error was logged
    Failed,
}

/// Per-conversation read bookkeeping
#[derive(Debug, Clone, Default)]
struct ReadState {
    baseline: u32,
    /// Unread messages folded in by the last full-sync re-baseline
    carried_unread: u32,
    /// Count last reported through the external-update callback
    signaled_count: Option<u32>,
}

#[derive(Debug, Default)]
struct SyncState {
    conversations: HashMap<String, ConversationSummary>,
    read_states: HashMap<String, ReadState>,
    streaming: HashSet<String>,
    local_only: HashSet<String>,
    current: Option<String>,
    cursor: Option<SyncCursor>,
    initialized: bool,
    hidden_since: Option<Instant>,
}

#[derive(Debug, Default)]
struct Notifications {
    conversations: Option<Vec<ConversationSummary>>,
    current_deleted: Option<String>,
    external_updates: Vec<(String, u32)>,
}

impl Notifications {
    fn dispatch(self, callbacks: &dyn SyncCallbacks) {
        if let Some(conversations) = self.conversations {
            callbacks.on_conversations_updated(&conversations);
        }
        if let Some(id) = self.current_deleted {
            callbacks.on_current_conversation_deleted(&id);
        }
        for (id, count) in self.external_updates {
            callbacks.on_current_conversation_external_update(&id, count);
        }
    }
}

/// Resets the in-flight flag when a sync pass ends, however it ends
struct SyncGuard(Arc<AtomicBool>);

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Periodic conversation sync
#[derive(Clone)]
pub struct SyncManager {
    transport: Arc<dyn ChatTransport>,
    callbacks: Arc<dyn SyncCallbacks>,
    registry: ActiveRequestRegistry,
    config: SyncConfig,
    state: Arc<RwLock<SyncState>>,
    syncing: Arc<AtomicBool>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SyncManager {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        callbacks: Arc<dyn SyncCallbacks>,
        registry: ActiveRequestRegistry,
        config: SyncConfig,
    ) -> Self {
        Self {
            transport,
            callbacks,
            registry,
            config,
            state: Arc::new(RwLock::new(SyncState::default())),
            syncing: Arc::new(AtomicBool::new(false)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Run a full sync now and start the poll loop
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            debug!("Sync manager already running");
            return;
        }

        let manager = self.clone();
        let period = self.config.poll_interval();
        *task = Some(tokio::spawn(async move {
            manager.full_sync().await;

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if manager.is_visible().await {
                    manager.incremental_sync().await;
                }
            }
        }));

        info!("Sync manager started (poll interval {:?})", period);
    }

    /// Stop the poll loop; state is kept
    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            info!("Sync manager stopped");
        }
    }

    /// Stop and forget everything, e.g. on sign-out
    pub async fn reset(&self) {
        self.stop().await;
        *self.state.write().await = SyncState::default();
        debug!("Sync state reset");
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Fetch the complete conversation set
    pub async fn full_sync(&self) -> SyncOutcome {
        self.run(SyncMode::Full).await
    }

    /// Fetch conversations changed since the last cursor
    ///
    /// Runs as a full sync when no cursor exists yet.
    pub async fn incremental_sync(&self) -> SyncOutcome {
        if self.state.read().await.cursor.is_none() {
            return self.run(SyncMode::Full).await;
        }
        self.run(SyncMode::Incremental).await
    }

    /// Record tab visibility changes
    ///
    /// Becoming visible again triggers an incremental sync, or a full sync when
    /// the tab was hidden for at least the configured threshold. Returns the
    /// outcome of that sync, if one ran.
    pub async fn set_visibility(&self, visible: bool) -> Option<SyncOutcome> {
        let hidden_for = {
            let mut state = self.state.write().await;
            if !visible {
                state.hidden_since.get_or_insert_with(Instant::now);
                return None;
            }
            state.hidden_since.take().map(|since| since.elapsed())
        };

        let hidden_for = hidden_for?;
        if hidden_for >= self.config.full_sync_after_hidden() {
            info!("Visible again after {:?}; running full sync", hidden_for);
            Some(self.full_sync().await)
        } else {
            debug!("Visible again after {:?}; running incremental sync", hidden_for);
            Some(self.incremental_sync().await)
        }
    }

    pub async fn is_visible(&self) -> bool {
        self.state.read().await.hidden_since.is_none()
    }

    /// Set the conversation on screen
    pub async fn set_current_conversation(&self, conversation_id: Option<String>) {
        self.state.write().await.current = conversation_id;
    }

    pub async fn current_conversation(&self) -> Option<String> {
        self.state.read().await.current.clone()
    }

    /// Suppress or resume sync application for a conversation
    pub async fn set_conversation_streaming(&self, conversation_id: &str, streaming: bool) {
        let mut state = self.state.write().await;
        if streaming {
            state.streaming.insert(conversation_id.to_string());
        } else {
            state.streaming.remove(conversation_id);
        }
        debug!("Conversation {} streaming={}", conversation_id, streaming);
    }

    /// Reset the baseline after the user opened or reloaded a conversation
    ///
    /// Clears unread and external-update state unconditionally.
    pub async fn mark_conversation_read(&self, conversation_id: &str, message_count: u32) {
        let mut state = self.state.write().await;
        let read = state
            .read_states
            .entry(conversation_id.to_string())
            .or_default();
        read.baseline = message_count;
        read.carried_unread = 0;
        read.signaled_count = None;

        if let Some(summary) = state.conversations.get_mut(conversation_id) {
            summary.baseline = message_count;
            summary.unread_count = 0;
            summary.has_external_update = false;
        }
        debug!(
            "Conversation {} marked read at {} messages",
            conversation_id, message_count
        );
    }

    /// Bump the baseline after messages were confirmed locally
    pub async fn increment_local_message_count(&self, conversation_id: &str, count: u32) {
        let mut state = self.state.write().await;
        let read = state
            .read_states
            .entry(conversation_id.to_string())
            .or_default();
        read.baseline = read.baseline.saturating_add(count);
        let baseline = read.baseline;

        if let Some(summary) = state.conversations.get_mut(conversation_id) {
            summary.baseline = baseline;
            summary.message_count = summary.message_count.max(baseline);
        }
        debug!(
            "Conversation {} local baseline now {}",
            conversation_id, baseline
        );
    }

    /// Track a conversation that has not been persisted on the server yet
    ///
    /// Local-only conversations are never treated as deleted by a full sync.
    pub async fn add_local_conversation(&self, summary: ConversationSummary) {
        let mut state = self.state.write().await;
        state.local_only.insert(summary.id.clone());
        state.read_states.insert(
            summary.id.clone(),
            ReadState {
                baseline: summary.message_count,
                ..ReadState::default()
            },
        );
        state.conversations.insert(summary.id.clone(), summary);
    }

    /// The server now knows about a previously local-only conversation
    pub async fn confirm_conversation_persisted(&self, conversation_id: &str) {
        self.state.write().await.local_only.remove(conversation_id);
    }

    /// Conversations, most recently updated first
    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        Self::sorted(&self.state.read().await.conversations)
    }

    pub async fn summary(&self, conversation_id: &str) -> Option<ConversationSummary> {
        self.state.read().await.conversations.get(conversation_id).cloned()
    }

    pub async fn baseline(&self, conversation_id: &str) -> Option<u32> {
        self.state
            .read()
            .await
            .read_states
            .get(conversation_id)
            .map(|read| read.baseline)
    }

    pub async fn cursor(&self) -> Option<SyncCursor> {
        self.state.read().await.cursor.clone()
    }

    fn try_begin(&self) -> Option<SyncGuard> {
        self.syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SyncGuard(self.syncing.clone()))
    }

    async fn run(&self, mode: SyncMode) -> SyncOutcome {
        let Some(_guard) = self.try_begin() else {
            debug!("Sync already in flight, dropping {} trigger", mode);
            return SyncOutcome::Skipped;
        };

        let cursor = match mode {
            SyncMode::Full => None,
            SyncMode::Incremental => self.state.read().await.cursor.clone(),
        };

        let response = match self
            .transport
            .sync_conversations(cursor.as_ref(), mode == SyncMode::Full)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("{} sync failed: {}", mode, e);
                return SyncOutcome::Failed;
            }
        };

        let streaming_requests: HashSet<String> = self
            .registry
            .streaming_conversations()
            .await
            .into_iter()
            .collect();

        let (outcome, notifications) = {
            let mut state = self.state.write().await;
            Self::apply(&mut state, response, mode, &streaming_requests)
        };

        notifications.dispatch(self.callbacks.as_ref());
        debug!("{} sync applied: {:?}", mode, outcome);
        outcome
    }

    fn apply(
        state: &mut SyncState,
        response: SyncResponse,
        mode: SyncMode,
        streaming_requests: &HashSet<String>,
    ) -> (SyncOutcome, Notifications) {
        let full = mode == SyncMode::Full;
        let first_sync = !state.initialized;
        let mut notifications = Notifications::default();
        let mut updated = 0;

        let server_ids: HashSet<&str> = response
            .conversations
            .iter()
            .map(|remote| remote.id.as_str())
            .collect();

        for remote in &response.conversations {
            let id = remote.id.as_str();
            if state.streaming.contains(id) || streaming_requests.contains(id) {
                debug!("Skipping conversation {} while a response is streaming", id);
                continue;
            }

            let is_current = state.current.as_deref() == Some(id);
            let count = remote.message_count;

            // Everything present at startup counts as read.
            let read = state
                .read_states
                .entry(remote.id.clone())
                .or_insert_with(|| ReadState {
                    baseline: if first_sync || is_current { count } else { 0 },
                    ..ReadState::default()
                });

            let summary = state
                .conversations
                .entry(remote.id.clone())
                .or_insert_with(|| ConversationSummary::from(remote));
            summary.apply_remote(remote);
            state.local_only.remove(id);

            if is_current {
                read.carried_unread = 0;
                summary.unread_count = 0;
                if count > read.baseline {
                    summary.has_external_update = true;
                    if read.signaled_count != Some(count) {
                        read.signaled_count = Some(count);
                        notifications.external_updates.push((remote.id.clone(), count));
                    }
                } else {
                    read.baseline = read.baseline.max(count);
                    read.signaled_count = None;
                    summary.has_external_update = false;
                }
            } else if full {
                let delta = count.saturating_sub(read.baseline);
                read.carried_unread = read.carried_unread.saturating_add(delta);
                read.baseline = read.baseline.max(count);
                summary.unread_count = read.carried_unread;
                summary.has_external_update = false;
            } else if count > read.baseline {
                summary.unread_count = read.carried_unread + (count - read.baseline);
            } else {
                if read.carried_unread == 0 {
                    read.baseline = read.baseline.max(count);
                }
                summary.unread_count = read.carried_unread;
            }

            summary.baseline = read.baseline;
            updated += 1;
        }

        let mut deleted = Vec::new();
        if full {
            deleted = state
                .conversations
                .keys()
                .filter(|id| {
                    !server_ids.contains(id.as_str())
                        && !state.local_only.contains(*id)
                        && !state.streaming.contains(*id)
                        && !streaming_requests.contains(*id)
                })
                .cloned()
                .collect();

            for id in &deleted {
                state.conversations.remove(id);
                state.read_states.remove(id);
                if state.current.as_deref() == Some(id.as_str()) {
                    info!("Current conversation {} was deleted remotely", id);
                    state.current = None;
                    notifications.current_deleted = Some(id.clone());
                } else {
                    debug!("Conversation {} was deleted remotely", id);
                }
            }
        }

        state.cursor = Some(response.server_time);
        state.initialized = true;
        notifications.conversations = Some(Self::sorted(&state.conversations));

        let outcome = SyncOutcome::Applied {
            mode,
            updated,
            deleted: deleted.len(),
        };
        (outcome, notifications)
    }

    fn sorted(conversations: &HashMap<String, ConversationSummary>) -> Vec<ConversationSummary> {
        let mut list: Vec<ConversationSummary> = conversations.values().cloned().collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{remote, sync_response, MockTransport, RecordingCallbacks};
    use std::time::Duration;

    fn manager(transport: Arc<MockTransport>) -> (SyncManager, Arc<RecordingCallbacks>) {
        manager_with_registry(transport, ActiveRequestRegistry::new())
    }

    fn manager_with_registry(
        transport: Arc<MockTransport>,
        registry: ActiveRequestRegistry,
    ) -> (SyncManager, Arc<RecordingCallbacks>) {
        let callbacks = Arc::new(RecordingCallbacks::default());
        let manager = SyncManager::new(transport, callbacks.clone(), registry, SyncConfig::default());
        (manager, callbacks)
    }

    #[tokio::test]
    async fn test_first_full_sync_treats_everything_as_read() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(vec![remote("c1", 4), remote("c2", 2)], "t1"));
        let (manager, callbacks) = manager(transport.clone());

        let outcome = manager.full_sync().await;
        assert_eq!(
            outcome,
            SyncOutcome::Applied {
                mode: SyncMode::Full,
                updated: 2,
                deleted: 0
            }
        );

        let c1 = manager.summary("c1").await.unwrap();
        assert_eq!(c1.unread_count, 0);
        assert_eq!(c1.baseline, 4);
        assert_eq!(manager.cursor().await, Some(SyncCursor("t1".to_string())));
        assert_eq!(callbacks.updates().len(), 1);
        assert_eq!(transport.sync_calls(), vec![(None, true)]);
    }

    #[tokio::test]
    async fn test_full_sync_rebaselines_closed_conversation() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(vec![remote("c1", 4)], "t1"));
        transport.push_sync(sync_response(vec![remote("c1", 6)], "t2"));
        let (manager, _callbacks) = manager(transport);

        manager.full_sync().await;
        assert_eq!(manager.baseline("c1").await, Some(4));

        manager.full_sync().await;
        let c1 = manager.summary("c1").await.unwrap();
        assert_eq!(c1.unread_count, 2);
        assert_eq!(c1.baseline, 6);
    }

    #[tokio::test]
    async fn test_incremental_sync_protects_unread_state() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(vec![remote("c1", 4)], "t1"));
        transport.push_sync(sync_response(vec![remote("c1", 7)], "t2"));
        transport.push_sync(sync_response(vec![remote("c1", 7)], "t3"));
        let (manager, _callbacks) = manager(transport.clone());

        manager.full_sync().await;
        manager.incremental_sync().await;

        let c1 = manager.summary("c1").await.unwrap();
        assert_eq!(c1.unread_count, 3);
        assert_eq!(c1.baseline, 4);

        manager.incremental_sync().await;
        let c1 = manager.summary("c1").await.unwrap();
        assert_eq!(c1.unread_count, 3);

        let calls = transport.sync_calls();
        assert_eq!(calls[1], (Some(SyncCursor("t1".to_string())), false));
        assert_eq!(calls[2], (Some(SyncCursor("t2".to_string())), false));
    }

    #[tokio::test]
    async fn test_unread_carried_across_rebaseline() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(vec![remote("c1", 4)], "t1"));
        transport.push_sync(sync_response(vec![remote("c1", 6)], "t2"));
        transport.push_sync(sync_response(vec![remote("c1", 7)], "t3"));
        let (manager, _callbacks) = manager(transport);

        manager.full_sync().await;
        manager.full_sync().await;
        manager.incremental_sync().await;

        let c1 = manager.summary("c1").await.unwrap();
        assert_eq!(c1.unread_count, 3);
        assert_eq!(c1.baseline, 6);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(vec![remote("c1", 4)], "t1"));
        transport.push_sync(sync_response(vec![remote("c1", 9)], "t2"));
        let (manager, _callbacks) = manager(transport);

        manager.full_sync().await;
        manager.full_sync().await;
        assert_eq!(manager.summary("c1").await.unwrap().unread_count, 5);

        manager.mark_conversation_read("c1", 9).await;
        assert_eq!(manager.summary("c1").await.unwrap().unread_count, 0);
        manager.mark_conversation_read("c1", 9).await;
        let c1 = manager.summary("c1").await.unwrap();
        assert_eq!(c1.unread_count, 0);
        assert_eq!(c1.baseline, 9);
    }

    #[tokio::test]
    async fn test_streaming_conversation_is_skipped() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(vec![remote("c1", 8)], "t1"));
        transport.push_sync(sync_response(vec![remote("c1", 10)], "t2"));
        transport.push_sync(sync_response(vec![remote("c1", 10)], "t3"));
        let (manager, callbacks) = manager(transport);

        manager.full_sync().await;
        manager.set_conversation_streaming("c1", true).await;
        manager.incremental_sync().await;

        let c1 = manager.summary("c1").await.unwrap();
        assert_eq!(c1.unread_count, 0);
        assert_eq!(c1.baseline, 8);
        assert_eq!(c1.message_count, 8);

        manager.set_conversation_streaming("c1", false).await;
        manager.incremental_sync().await;
        let c1 = manager.summary("c1").await.unwrap();
        assert_eq!(c1.unread_count, 2);
        assert!(callbacks.external_updates().is_empty());
    }

    #[tokio::test]
    async fn test_registry_stream_also_suppresses() {
        use crate::active_request::{ActiveRequestState, RequestKind};

        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(vec![remote("c1", 8)], "t1"));
        transport.push_sync(sync_response(vec![remote("c1", 10)], "t2"));
        let registry = ActiveRequestRegistry::new();
        let (manager, _callbacks) = manager_with_registry(transport, registry.clone());

        manager.full_sync().await;
        registry
            .set_active_request(ActiveRequestState::new("c1", RequestKind::Stream))
            .await;
        manager.incremental_sync().await;

        assert_eq!(manager.summary("c1").await.unwrap().baseline, 8);
        assert_eq!(manager.summary("c1").await.unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn test_open_conversation_raises_external_update_once() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(vec![remote("c1", 4)], "t1"));
        transport.push_sync(sync_response(vec![remote("c1", 6)], "t2"));
        transport.push_sync(sync_response(vec![remote("c1", 6)], "t3"));
        let (manager, callbacks) = manager(transport);

        manager.full_sync().await;
        manager.set_current_conversation(Some("c1".to_string())).await;
        manager.incremental_sync().await;
        manager.incremental_sync().await;

        assert_eq!(callbacks.external_updates(), vec![("c1".to_string(), 6)]);
        let c1 = manager.summary("c1").await.unwrap();
        assert!(c1.has_external_update);
        assert_eq!(c1.unread_count, 0);
        assert_eq!(c1.baseline, 4);

        manager.mark_conversation_read("c1", 6).await;
        assert!(!manager.summary("c1").await.unwrap().has_external_update);
    }

    #[tokio::test]
    async fn test_local_increment_prevents_false_external_update() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(vec![remote("c1", 4)], "t1"));
        transport.push_sync(sync_response(vec![remote("c1", 6)], "t2"));
        let (manager, callbacks) = manager(transport);

        manager.full_sync().await;
        manager.set_current_conversation(Some("c1".to_string())).await;
        manager.increment_local_message_count("c1", 2).await;
        manager.incremental_sync().await;

        assert!(callbacks.external_updates().is_empty());
        assert_eq!(manager.baseline("c1").await, Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_keeps_local_increment() {
        let transport = Arc::new(MockTransport::new().with_sync_delay(Duration::from_millis(100)));
        transport.push_sync(sync_response(vec![remote("c1", 4)], "t1"));
        transport.push_sync(sync_response(vec![remote("c1", 4)], "t2"));
        transport.push_sync(sync_response(vec![remote("c1", 6)], "t3"));
        let (manager, callbacks) = manager(transport);

        manager.full_sync().await;
        manager.set_current_conversation(Some("c1".to_string())).await;

        let poller = manager.clone();
        let in_flight = tokio::spawn(async move { poller.incremental_sync().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.increment_local_message_count("c1", 2).await;
        in_flight.await.unwrap();

        assert_eq!(manager.baseline("c1").await, Some(6));

        manager.incremental_sync().await;
        assert!(callbacks.external_updates().is_empty());
        assert!(!manager.summary("c1").await.unwrap().has_external_update);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_does_not_create_unread() {
        let transport = Arc::new(MockTransport::new().with_sync_delay(Duration::from_millis(100)));
        transport.push_sync(sync_response(vec![remote("c1", 4)], "t1"));
        transport.push_sync(sync_response(vec![remote("c1", 4)], "t2"));
        transport.push_sync(sync_response(vec![remote("c1", 6)], "t3"));
        transport.push_sync(sync_response(vec![remote("c1", 6)], "t4"));
        let (manager, _callbacks) = manager(transport);

        manager.full_sync().await;

        let poller = manager.clone();
        let in_flight = tokio::spawn(async move { poller.incremental_sync().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.increment_local_message_count("c1", 2).await;
        in_flight.await.unwrap();
        assert_eq!(manager.baseline("c1").await, Some(6));

        manager.incremental_sync().await;
        assert_eq!(manager.summary("c1").await.unwrap().unread_count, 0);

        manager.full_sync().await;
        let c1 = manager.summary("c1").await.unwrap();
        assert_eq!(c1.unread_count, 0);
        assert_eq!(c1.baseline, 6);
    }

    #[tokio::test]
    async fn test_full_sync_detects_deletions() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(
            vec![remote("c1", 1), remote("c2", 1), remote("c3", 1)],
            "t1",
        ));
        transport.push_sync(sync_response(vec![remote("c3", 1)], "t2"));
        let (manager, callbacks) = manager(transport);

        manager.full_sync().await;
        manager.set_current_conversation(Some("c1".to_string())).await;
        manager
            .add_local_conversation(ConversationSummary::local("draft", "New chat"))
            .await;

        let outcome = manager.full_sync().await;
        assert_eq!(
            outcome,
            SyncOutcome::Applied {
                mode: SyncMode::Full,
                updated: 1,
                deleted: 2
            }
        );
        assert_eq!(callbacks.deleted(), vec!["c1".to_string()]);
        assert!(manager.summary("c2").await.is_none());
        assert!(manager.summary("draft").await.is_some());
        assert_eq!(manager.current_conversation().await, None);
    }

    #[tokio::test]
    async fn test_incremental_sync_never_deletes() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(vec![remote("c1", 1), remote("c2", 1)], "t1"));
        transport.push_sync(sync_response(vec![remote("c2", 2)], "t2"));
        let (manager, _callbacks) = manager(transport);

        manager.full_sync().await;
        manager.incremental_sync().await;

        assert!(manager.summary("c1").await.is_some());
        assert_eq!(manager.conversations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_new_remote_conversation_is_unread() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(vec![remote("c1", 1)], "t1"));
        transport.push_sync(sync_response(vec![remote("c2", 3)], "t2"));
        let (manager, _callbacks) = manager(transport);

        manager.full_sync().await;
        manager.incremental_sync().await;

        assert_eq!(manager.summary("c2").await.unwrap().unread_count, 3);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync_error("503 Service Unavailable");
        transport.push_sync(sync_response(vec![remote("c1", 1)], "t1"));
        let (manager, callbacks) = manager(transport);

        assert_eq!(manager.full_sync().await, SyncOutcome::Failed);
        assert!(!manager.is_syncing());
        assert!(callbacks.updates().is_empty());

        assert!(matches!(manager.full_sync().await, SyncOutcome::Applied { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_trigger_is_dropped() {
        let transport = Arc::new(MockTransport::new().with_sync_delay(Duration::from_millis(100)));
        transport.push_sync(sync_response(vec![remote("c1", 1)], "t1"));
        transport.push_sync(sync_response(vec![remote("c1", 1)], "t2"));
        let (manager, _callbacks) = manager(transport.clone());

        let (first, second) = tokio::join!(manager.full_sync(), manager.full_sync());
        assert!(matches!(first, SyncOutcome::Applied { .. }));
        assert_eq!(second, SyncOutcome::Skipped);
        assert_eq!(transport.sync_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_polls_only_while_visible() {
        let transport = Arc::new(MockTransport::new());
        for i in 0..6 {
            transport.push_sync(sync_response(vec![remote("c1", 1)], &format!("t{}", i)));
        }
        let (manager, _callbacks) = manager(transport.clone());

        manager.start().await;
        assert!(manager.is_running().await);
        tokio::time::sleep(Duration::from_secs(61)).await;

        let calls = transport.sync_calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].1);
        assert!(!calls[1].1);

        manager.set_visibility(false).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.sync_calls().len(), 3);

        manager.stop().await;
        assert!(!manager.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refocus_chooses_sync_mode_by_hidden_duration() {
        let transport = Arc::new(MockTransport::new());
        for i in 0..3 {
            transport.push_sync(sync_response(vec![remote("c1", 1)], &format!("t{}", i)));
        }
        let (manager, _callbacks) = manager(transport.clone());
        manager.full_sync().await;

        assert_eq!(manager.set_visibility(false).await, None);
        tokio::time::sleep(Duration::from_secs(10)).await;
        let outcome = manager.set_visibility(true).await;
        assert!(matches!(
            outcome,
            Some(SyncOutcome::Applied {
                mode: SyncMode::Incremental,
                ..
            })
        ));

        manager.set_visibility(false).await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        let outcome = manager.set_visibility(true).await;
        assert!(matches!(
            outcome,
            Some(SyncOutcome::Applied {
                mode: SyncMode::Full,
                ..
            })
        ));

        assert_eq!(manager.set_visibility(true).await, None);
    }

    #[tokio::test]
    async fn test_reset_forgets_state() {
        let transport = Arc::new(MockTransport::new());
        transport.push_sync(sync_response(vec![remote("c1", 1)], "t1"));
        let (manager, _callbacks) = manager(transport);

        manager.full_sync().await;
        manager.reset().await;

        assert!(manager.conversations().await.is_empty());
        assert_eq!(manager.cursor().await, None);
    }
}
