//! Error handling for the chatsync engine
//!
//! This module provides a single error type for all engine operations.
//! Errors from serialization and I/O are converted automatically using `thiserror`.
//!
//! ## Error Categories
//!
//! ### Transport Errors
//! Unreachable server, timeouts and non-2xx responses. Carry an optional
//! server error code and a retryable flag.
//!
//! ### Not Found
//! A requested message does not exist (yet). During stream recovery this is an
//! expected, transient signal: the server may not have written the placeholder.
//!
//! ### Stream Errors
//! An explicit `error` event received in the middle of a stream.
//!
//! ### Interruptions
//! A stream that ended without a terminal event. Never signalled by the server,
//! always inferred by the client.
//!
//! ## Propagation
//!
//! ```rust
//! use chatsync_protocol::{Result, SyncError};
//!
//! fn load(id: &str) -> Result<String> {
//!     if id.is_empty() {
//!         return Err(SyncError::NotFound("empty message id".to_string()));
//!     }
//!     Ok(id.to_string())
//! }
//!
//! let err = load("").unwrap_err();
//! assert!(err.is_not_found());
//! ```

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while syncing conversations or delivering a stream
///
/// # Examples
///
/// ```rust
/// use chatsync_protocol::SyncError;
///
/// let error = SyncError::NotFound("m1".to_string());
/// assert_eq!(error.to_string(), "Not found: m1");
///
/// let error = SyncError::Timeout("reading stream".to_string());
/// assert!(error.is_recoverable());
/// ```
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error
    ///
    /// Automatically converted from `std::io::Error`.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    ///
    /// Automatically converted from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport layer error (unreachable, non-2xx)
    #[error("Transport error: {message}")]
    Transport {
        /// Human readable description
        message: String,
        /// Server or transport error code, if any
        code: Option<String>,
        /// Whether the request may succeed if repeated
        retryable: bool,
    },

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Network connection error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Explicit `error` event received from the server mid-stream
    #[error("Stream error: {message}")]
    Stream {
        /// Message sent by the server
        message: String,
        /// Server error code, if any
        code: Option<String>,
        /// Whether the server marked the failure as retryable
        retryable: bool,
    },

    /// Stream ended without `done` or `error` and could not be recovered
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// Malformed event on the wire
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid state
    ///
    /// This error occurs when an operation is attempted in an invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl SyncError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>, code: Option<String>, retryable: bool) -> Self {
        SyncError::Transport {
            message: message.into(),
            code,
            retryable,
        }
    }

    /// Convert a generic I/O error into a more specific network error
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chatsync_protocol::SyncError;
    /// use std::io::{Error, ErrorKind};
    ///
    /// let io_error = Error::new(ErrorKind::TimedOut, "read timed out");
    /// let error = SyncError::from_io_error(io_error, "reading stream");
    ///
    /// assert!(matches!(error, SyncError::Timeout(_)));
    /// ```
    pub fn from_io_error(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::TimedOut => SyncError::Timeout(format!("{}: {}", context, error)),
            ErrorKind::NotFound => SyncError::NotFound(format!("{}: {}", context, error)),
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => SyncError::NetworkError(format!(
                "{}: connection interrupted ({})",
                context, error
            )),
            _ => SyncError::Io(error),
        }
    }

    /// Check if this error is transient and the operation may be retried
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Timeout(_) | SyncError::NetworkError(_) | SyncError::Io(_) => true,
            SyncError::Transport { retryable, .. } | SyncError::Stream { retryable, .. } => {
                *retryable
            }
            _ => false,
        }
    }

    /// Check if this error means the requested record does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    /// Server or transport error code, if one was supplied
    pub fn code(&self) -> Option<&str> {
        match self {
            SyncError::Transport { code, .. } | SyncError::Stream { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Get a user-friendly error message suitable for a toast
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Timeout(_) => {
                "The server took too long to respond. Check your connection and retry.".to_string()
            }
            SyncError::NetworkError(_) | SyncError::Io(_) => {
                "Connection lost. Your message was kept so you can retry.".to_string()
            }
            SyncError::Transport { message, retryable, .. } => {
                if *retryable {
                    format!("Request failed: {}. Please retry.", message)
                } else {
                    format!("Request failed: {}.", message)
                }
            }
            SyncError::Stream { message, .. } => format!("The response failed: {}.", message),
            SyncError::StreamInterrupted(_) => {
                "The response was interrupted. Reload the conversation to see the latest state."
                    .to_string()
            }
            SyncError::NotFound(_) => "The message could not be found.".to_string(),
            SyncError::Json(e) => format!("Data format error: {}.", e),
            SyncError::InvalidEvent(msg) => format!("Invalid data received: {}.", msg),
            SyncError::Configuration(msg) => {
                format!("Configuration error: {}. Check your settings.", msg)
            }
            SyncError::InvalidState(msg) => format!("Invalid state: {}.", msg),
        }
    }
}
