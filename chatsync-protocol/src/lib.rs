//! Chat Sync Engine
//!
//! Client-side synchronization and streaming delivery for a multi-device AI
//! chat client. Keeps a local conversation list consistent with the server
//! while long-running, token-streamed responses are delivered, interrupted and
//! recovered.
//!
//! ## Components
//!
//! - [`NavigationTokenGuard`]: discards results of superseded view transitions
//! - [`ActiveRequestRegistry`]: in-flight sends, per conversation
//! - [`StreamEventProcessor`]: consumes server events for one send
//! - [`StreamRecoveryEngine`]: fetches the persisted message after a lost stream
//! - [`SyncManager`]: full/incremental polling, unread and external-update state
//! - [`ChatSession`]: builds and wires all of the above
//!
//! HTTP and rendering are supplied by the embedding application through
//! [`ChatTransport`] and [`ChatView`].

pub mod active_request;
pub mod config;
pub mod event;
pub mod model;
pub mod navigation;
pub mod recovery;
pub mod session;
pub mod stream;
pub mod sync;
pub mod trace;
pub mod transport;
pub mod view;

mod completion;
mod error;

pub use active_request::{ActiveRequestRegistry, ActiveRequestState, RequestKind};
pub use config::{EngineConfig, RecoveryConfig, StreamConfig, SyncConfig};
pub use error::{Result, SyncError};
pub use event::{
    decode_event_stream, DoneEvent, EventStream, LineBuffer, StreamEvent, MAX_LINE_BYTES,
};
pub use model::{
    ApprovalRequest, ChatRequest, CompletedMessage, ConversationSummary, FileAttachment,
    GeneratedImage, Message, RemoteConversation, Role, Source, SyncCursor, SyncResponse,
};
pub use navigation::{NavigationTarget, NavigationToken, NavigationTokenGuard};
pub use recovery::{
    DelaySchedule, InterruptionReason, PendingRecovery, RecoveryOutcome, StreamRecoveryEngine,
};
pub use session::ChatSession;
pub use stream::{SendOutcome, StreamEventProcessor, StreamPhase};
pub use sync::{SyncCallbacks, SyncManager, SyncMode, SyncOutcome};
pub use trace::{ThinkingTrace, ThinkingTraceItem, TraceItemKind};
pub use transport::ChatTransport;
pub use view::ChatView;

/// Engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
pub mod test_utils;
