//! Engine Configuration
//!
//! Timing parameters for streaming, recovery and sync. Durations are stored as
//! integer milliseconds so the configuration round-trips through TOML; use the
//! accessor methods to get `Duration`s.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.stream.chunk_timeout_ms == 0 {
            return Err(SyncError::Configuration(
                "stream.chunk_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.stream.request_timeout_ms == 0 {
            return Err(SyncError::Configuration(
                "stream.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.sync.poll_interval_ms == 0 {
            return Err(SyncError::Configuration(
                "sync.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if !is_non_decreasing(&self.recovery.find_delays_ms)
            || !is_non_decreasing(&self.recovery.poll_delays_ms)
        {
            return Err(SyncError::Configuration(
                "recovery delay sequences must not decrease".to_string(),
            ));
        }
        Ok(())
    }
}

/// Streaming read configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Longest silence tolerated between two events before the connection
    /// is considered dead
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,

    /// Time allowed for the server to accept the request and open the stream
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Stream recovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Minimum spacing between two recovery attempts for one conversation
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Hidden periods shorter than this are not treated as interruptions
    #[serde(default = "default_min_hidden_ms")]
    pub min_hidden_ms: u64,

    /// Delays between lookups while the message does not exist yet
    #[serde(default = "default_find_delays_ms")]
    pub find_delays_ms: Vec<u64>,

    /// Delays between polls while the message exists but is still empty
    #[serde(default = "default_poll_delays_ms")]
    pub poll_delays_ms: Vec<u64>,
}

/// Conversation sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Incremental sync interval while visible
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Hidden periods at least this long trigger a full sync on refocus
    #[serde(default = "default_full_sync_after_hidden_ms")]
    pub full_sync_after_hidden_ms: u64,
}

fn default_chunk_timeout_ms() -> u64 {
    60_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_debounce_ms() -> u64 {
    2_000
}

fn default_min_hidden_ms() -> u64 {
    2_000
}

fn default_find_delays_ms() -> Vec<u64> {
    vec![500, 1_000, 2_000, 3_000, 5_000]
}

fn default_poll_delays_ms() -> Vec<u64> {
    vec![
        2_000, 3_000, 5_000, 5_000, 10_000, 10_000, 15_000, 15_000, 20_000, 20_000,
    ]
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_full_sync_after_hidden_ms() -> u64 {
    5 * 60_000
}

fn is_non_decreasing(delays: &[u64]) -> bool {
    delays.windows(2).all(|pair| pair[0] <= pair[1])
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_timeout_ms: default_chunk_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl StreamConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            min_hidden_ms: default_min_hidden_ms(),
            find_delays_ms: default_find_delays_ms(),
            poll_delays_ms: default_poll_delays_ms(),
        }
    }
}

impl RecoveryConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn min_hidden(&self) -> Duration {
        Duration::from_millis(self.min_hidden_ms)
    }

    pub fn find_delays(&self) -> Vec<Duration> {
        self.find_delays_ms.iter().copied().map(Duration::from_millis).collect()
    }

    pub fn poll_delays(&self) -> Vec<Duration> {
        self.poll_delays_ms.iter().copied().map(Duration::from_millis).collect()
    }

    /// Upper bound on how long one recovery attempt can sleep
    pub fn worst_case(&self) -> Duration {
        let total: u64 = self.find_delays_ms.iter().chain(&self.poll_delays_ms).sum();
        Duration::from_millis(total)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            full_sync_after_hidden_ms: default_full_sync_after_hidden_ms(),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn full_sync_after_hidden(&self) -> Duration {
        Duration::from_millis(self.full_sync_after_hidden_ms)
    }
}
