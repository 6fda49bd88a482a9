//! Event Stream Replay
//!
//! Feeds a recorded event file through a real [`ChatSession`] so stream
//! handling and recovery can be observed without a server. Messages for
//! recovery come from an optional JSON fixture; everything else the server
//! would answer is empty.

use crate::diagnostics::ReplayMetrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chatsync_protocol::{
    decode_event_stream, ChatRequest, ChatSession, ChatTransport, ChatView, CompletedMessage,
    ConversationSummary, EngineConfig, EventStream, Message, SendOutcome, SyncCallbacks,
    SyncCursor, SyncError, SyncResponse, ThinkingTraceItem,
};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Replay parameters
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub events: PathBuf,
    pub messages: Option<PathBuf>,
    pub conversation_id: String,
    pub prompt: String,
    pub chunk_size: usize,
}

/// Result of a replay
#[derive(Debug)]
pub struct ReplayReport {
    pub outcome: std::result::Result<SendOutcome, SyncError>,
    pub metrics: ReplayMetrics,
}

/// Transport serving a recorded event file and a message fixture
#[derive(Debug)]
pub struct ReplayTransport {
    source: PathBuf,
    recording: Vec<u8>,
    chunk_size: usize,
    messages: HashMap<String, Message>,
    metrics: Arc<Mutex<ReplayMetrics>>,
}

impl ReplayTransport {
    pub fn new(
        source: PathBuf,
        recording: Vec<u8>,
        chunk_size: usize,
        messages: Vec<Message>,
        metrics: Arc<Mutex<ReplayMetrics>>,
    ) -> Self {
        Self {
            source,
            recording,
            chunk_size,
            messages: messages
                .into_iter()
                .map(|message| (message.id.clone(), message))
                .collect(),
            metrics,
        }
    }

    fn with_metrics(&self, update: impl FnOnce(&mut ReplayMetrics)) {
        if let Ok(mut metrics) = self.metrics.lock() {
            update(&mut metrics);
        }
    }
}

/// Load a JSON array of messages
pub fn load_messages(path: &Path) -> Result<Vec<Message>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read message fixture {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse message fixture {}", path.display()))
}

#[async_trait]
impl ChatTransport for ReplayTransport {
    async fn get_message(&self, message_id: &str) -> chatsync_protocol::Result<Message> {
        self.with_metrics(ReplayMetrics::record_message_fetch);
        match self.messages.get(message_id) {
            Some(message) => {
                debug!("Serving message {} from fixture", message_id);
                Ok(message.clone())
            }
            None => Err(SyncError::NotFound(message_id.to_string())),
        }
    }

    async fn sync_conversations(
        &self,
        _since: Option<&SyncCursor>,
        _full: bool,
    ) -> chatsync_protocol::Result<SyncResponse> {
        Ok(SyncResponse {
            conversations: Vec::new(),
            server_time: SyncCursor(chrono::Utc::now().to_rfc3339()),
        })
    }

    async fn stream_chat(&self, request: &ChatRequest) -> chatsync_protocol::Result<EventStream> {
        info!(
            "Replaying {} bytes from {} into conversation {}",
            self.recording.len(),
            self.source.display(),
            request.conversation_id
        );
        self.with_metrics(|metrics| metrics.record_bytes(self.recording.len()));

        let chunk_size = if self.chunk_size == 0 {
            self.recording.len().max(1)
        } else {
            self.chunk_size
        };
        let chunks: Vec<chatsync_protocol::Result<Vec<u8>>> = self
            .recording
            .chunks(chunk_size)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();

        let metrics = self.metrics.clone();
        let events = decode_event_stream(stream::iter(chunks)).inspect(move |event| {
            if let Ok(mut metrics) = metrics.lock() {
                match event {
                    Ok(event) => metrics.record_event(event),
                    Err(_) => metrics.record_decode_error(),
                }
            }
        });
        Ok(events.boxed())
    }

    async fn send_batch_chat(&self, _request: &ChatRequest) -> chatsync_protocol::Result<Message> {
        Err(SyncError::Configuration(
            "batch sends cannot be replayed".to_string(),
        ))
    }
}

/// View printing the replayed conversation to stdout
#[derive(Debug)]
pub struct ConsoleView {
    conversation_id: String,
    printed: Mutex<usize>,
}

impl ConsoleView {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            printed: Mutex::new(0),
        }
    }
}

impl ChatView for ConsoleView {
    fn displayed_conversation(&self) -> Option<String> {
        Some(self.conversation_id.clone())
    }

    fn confirm_user_message(&self, _conversation_id: &str, temp_id: Option<&str>, user_message_id: &str) {
        info!(
            "User message confirmed: {} -> {}",
            temp_id.unwrap_or("-"),
            user_message_id
        );
    }

    fn render_trace(&self, _conversation_id: &str, trace: &[ThinkingTraceItem], is_thinking: bool) {
        if let Some(item) = trace.last() {
            debug!(
                "Trace ({} items, thinking={}): {:?} {}",
                trace.len(),
                is_thinking,
                item.kind,
                item.label
            );
        }
    }

    fn render_content(&self, _conversation_id: &str, content: &str) {
        let Ok(mut printed) = self.printed.lock() else {
            return;
        };
        // Content is cumulative; only the unseen tail is printed.
        if let Some(tail) = content.get(*printed..) {
            print!("{}", tail);
        }
        *printed = content.len();
    }

    fn finalize_message(&self, _conversation_id: &str, completed: &CompletedMessage) {
        println!();
        println!(
            "[done] message {} ({} chars, {} trace items)",
            completed.message.id,
            completed.message.content.chars().count(),
            completed.trace.len()
        );
        if let Some(approval) = &completed.approval {
            println!("[approval pending] {}", approval.approval_id);
        }
    }

    fn mark_incomplete(&self, _conversation_id: &str, message_id: Option<&str>, content: &str) {
        println!();
        println!(
            "[incomplete] message {} kept with {} chars",
            message_id.unwrap_or("-"),
            content.chars().count()
        );
    }

    fn remove_placeholder(&self, _conversation_id: &str) {
        println!();
        println!("[removed] assistant placeholder");
    }

    fn restore_placeholder(&self, _conversation_id: &str, message: &Message) {
        info!("Restoring placeholder for recovered message {}", message.id);
    }
}

/// Sync callbacks that only log
#[derive(Debug, Default)]
pub struct LogCallbacks;

impl SyncCallbacks for LogCallbacks {
    fn on_conversations_updated(&self, conversations: &[ConversationSummary]) {
        debug!("Conversation list updated: {} entries", conversations.len());
    }

    fn on_current_conversation_deleted(&self, conversation_id: &str) {
        warn!("Current conversation {} was deleted", conversation_id);
    }

    fn on_current_conversation_external_update(&self, conversation_id: &str, message_count: u32) {
        info!(
            "Conversation {} changed elsewhere ({} messages)",
            conversation_id, message_count
        );
    }
}

/// Replay `options.events` through a fresh session
pub async fn run_replay(engine: EngineConfig, options: ReplayOptions) -> Result<ReplayReport> {
    let recording = tokio::fs::read(&options.events)
        .await
        .with_context(|| format!("Failed to read event file {}", options.events.display()))?;
    let messages = match &options.messages {
        Some(path) => load_messages(path)?,
        None => Vec::new(),
    };

    let metrics = Arc::new(Mutex::new(ReplayMetrics::new()));
    let transport = Arc::new(ReplayTransport::new(
        options.events.clone(),
        recording,
        options.chunk_size,
        messages,
        metrics.clone(),
    ));
    let view = Arc::new(ConsoleView::new(options.conversation_id.clone()));

    let session = ChatSession::new(transport, view, Arc::new(LogCallbacks), engine)
        .context("Failed to build chat session")?;
    session
        .sync()
        .set_current_conversation(Some(options.conversation_id.clone()))
        .await;

    let outcome = session
        .send(ChatRequest::new(options.conversation_id, options.prompt))
        .await;
    session.reset().await;

    let metrics = metrics
        .lock()
        .map(|mut metrics| std::mem::take(&mut *metrics))
        .unwrap_or_default();

    Ok(ReplayReport { outcome, metrics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_events(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    fn options(events: &Path) -> ReplayOptions {
        ReplayOptions {
            events: events.to_path_buf(),
            messages: None,
            conversation_id: "c1".to_string(),
            prompt: "hi".to_string(),
            chunk_size: 0,
        }
    }

    #[tokio::test]
    async fn test_replay_completed_stream() {
        let events = write_events(&[
            r#"{"type":"user_message_saved","user_message_id":"u1","expected_assistant_message_id":"m1"}"#,
            r#"{"type":"thinking","content":"Planning"}"#,
            r#"data: {"type":"token","content":"Hel"}"#,
            "",
            r#"data: {"type":"token","content":"lo"}"#,
            r#"{"type":"done","message_id":"m1"}"#,
        ]);
        let mut options = options(events.path());
        options.chunk_size = 5;

        let report = run_replay(EngineConfig::default(), options).await.unwrap();

        match report.outcome.unwrap() {
            SendOutcome::Completed(completed) => {
                assert_eq!(completed.message.id, "m1");
                assert_eq!(completed.message.content, "Hello");
                assert_eq!(completed.user_message_id.as_deref(), Some("u1"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(report.metrics.total_events(), 5);
        assert_eq!(report.metrics.event_count("token"), 2);
        assert_eq!(report.metrics.token_chars(), 5);
        assert_eq!(report.metrics.message_fetches(), 0);
    }

    #[tokio::test]
    async fn test_replay_skips_malformed_lines() {
        let events = write_events(&[
            r#"{"type":"token","content":"a"}"#,
            "{broken",
            r#"{"type":"token","content":"b"}"#,
            r#"{"type":"done","message_id":"m1"}"#,
        ]);

        let report = run_replay(EngineConfig::default(), options(events.path()))
            .await
            .unwrap();

        match report.outcome.unwrap() {
            SendOutcome::Completed(completed) => assert_eq!(completed.message.content, "ab"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(report.metrics.decode_errors(), 1);
    }

    #[tokio::test]
    async fn test_replay_server_error() {
        let events = write_events(&[
            r#"{"type":"token","content":"partial"}"#,
            r#"{"type":"error","message":"model overloaded","code":"overloaded","retryable":true}"#,
        ]);

        let report = run_replay(EngineConfig::default(), options(events.path()))
            .await
            .unwrap();

        let err = report.outcome.unwrap_err();
        assert!(matches!(err, SyncError::Stream { .. }));
        assert_eq!(report.metrics.event_count("error"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_truncated_stream_recovers_from_fixture() {
        let events = write_events(&[
            r#"{"type":"user_message_saved","user_message_id":"u1","expected_assistant_message_id":"m1"}"#,
            r#"{"type":"token","content":"Hel"}"#,
        ]);
        let fixture = write_events(&[&serde_json::to_string(&vec![Message::assistant(
            "m1", "Hello there",
        )])
        .unwrap()]);

        let mut options = options(events.path());
        options.messages = Some(fixture.path().to_path_buf());

        let report = run_replay(EngineConfig::default(), options).await.unwrap();

        match report.outcome.unwrap() {
            SendOutcome::Recovered(message) => assert_eq!(message.content, "Hello there"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(report.metrics.message_fetches() >= 1);
    }

    #[tokio::test]
    async fn test_replay_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_replay(
            EngineConfig::default(),
            options(&dir.path().join("missing.jsonl")),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("Failed to read event file"));
    }

    #[test]
    fn test_load_messages_rejects_bad_fixture() {
        let fixture = write_events(&["not json"]);
        assert!(load_messages(fixture.path()).is_err());
    }
}
