//! Chat Transport Trait
//!
//! Interface to the server the engine synchronizes with. HTTP plumbing,
//! authentication and backoff live behind this trait and are not part of the
//! engine.

use crate::event::EventStream;
use crate::model::{ChatRequest, Message, SyncCursor, SyncResponse};
use crate::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// Server operations consumed by the engine
#[async_trait]
pub trait ChatTransport: Send + Sync + Debug {
    /// Fetch a single message
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` if the message does not exist (yet),
    /// or a transport error for any other failure.
    async fn get_message(&self, message_id: &str) -> Result<Message>;

    /// Fetch conversations changed since `since`
    ///
    /// With `full` set (or no cursor) the complete conversation set is
    /// returned, which allows deletions to be detected.
    async fn sync_conversations(&self, since: Option<&SyncCursor>, full: bool)
        -> Result<SyncResponse>;

    /// Start a streamed response
    ///
    /// The returned stream yields events in server emission order. A read
    /// failure is reported as an `Err` item.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<EventStream>;

    /// Send and wait for the complete response
    async fn send_batch_chat(&self, request: &ChatRequest) -> Result<Message>;
}
