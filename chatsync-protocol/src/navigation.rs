//! Navigation Token Guard
//!
//! Discards results of asynchronous view transitions that were superseded by a
//! later navigation. A flow takes a token before awaiting I/O and checks it
//! before touching shared state:
//!
//! ```
//! use chatsync_protocol::{NavigationTarget, NavigationTokenGuard};
//!
//! let guard = NavigationTokenGuard::new();
//! let first = guard.start_navigation(NavigationTarget::Conversation("c1".into()));
//! let second = guard.start_navigation(NavigationTarget::Planner);
//!
//! assert!(!guard.is_valid(first));
//! assert!(guard.is_valid(second));
//! ```
//!
//! Invalidation only stops the result from being applied; the underlying
//! request is left to finish.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// View a navigation is heading to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationTarget {
    Conversation(String),
    Planner,
    Agents,
    Storage,
}

impl fmt::Display for NavigationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavigationTarget::Conversation(id) => write!(f, "conversation:{}", id),
            NavigationTarget::Planner => write!(f, "planner"),
            NavigationTarget::Agents => write!(f, "agents"),
            NavigationTarget::Storage => write!(f, "storage"),
        }
    }
}

/// Token issued for one navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NavigationToken(u64);

impl NavigationToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Monotonic counter that invalidates every token but the latest
#[derive(Debug, Clone, Default)]
pub struct NavigationTokenGuard {
    counter: Arc<AtomicU64>,
    target: Arc<Mutex<Option<NavigationTarget>>>,
}

impl NavigationTokenGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new token, invalidating all earlier ones
    pub fn start_navigation(&self, target: NavigationTarget) -> NavigationToken {
        let token = NavigationToken(self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        debug!("Navigation {} started towards {}", token.0, target);
        if let Ok(mut current) = self.target.lock() {
            *current = Some(target);
        }
        token
    }

    /// True iff `token` is the most recently issued one
    pub fn is_valid(&self, token: NavigationToken) -> bool {
        self.counter.load(Ordering::SeqCst) == token.0
    }

    /// Target of the latest navigation
    pub fn current_target(&self) -> Option<NavigationTarget> {
        self.target.lock().ok().and_then(|target| target.clone())
    }

    /// Pass `value` through only while `token` is still current
    pub fn guard<T>(&self, token: NavigationToken, value: T) -> Option<T> {
        if self.is_valid(token) {
            Some(value)
        } else {
            debug!(
                "Discarding stale navigation result {} (current {})",
                token.0,
                self.counter.load(Ordering::SeqCst)
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    #[test]
    fn test_only_latest_token_is_valid() {
        let guard = NavigationTokenGuard::new();
        let a = guard.start_navigation(NavigationTarget::Conversation("a".into()));
        assert!(guard.is_valid(a));

        let b = guard.start_navigation(NavigationTarget::Agents);
        assert!(a < b);
        assert!(!guard.is_valid(a));
        assert!(guard.is_valid(b));
        assert_eq!(guard.current_target(), Some(NavigationTarget::Agents));
    }

    #[test]
    fn test_guard_drops_stale_values() {
        let guard = NavigationTokenGuard::new();
        let stale = guard.start_navigation(NavigationTarget::Storage);
        let fresh = guard.start_navigation(NavigationTarget::Planner);

        assert_eq!(guard.guard(stale, "old"), None);
        assert_eq!(guard.guard(fresh, "new"), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_load_is_superseded_by_special_view() {
        let guard = NavigationTokenGuard::new();
        let applied = Arc::new(Mutex::new(Vec::new()));

        let slow = {
            let guard = guard.clone();
            let applied = applied.clone();
            async move {
                let token = guard.start_navigation(NavigationTarget::Conversation("c1".into()));
                sleep(Duration::from_millis(500)).await;
                if let Some(view) = guard.guard(token, "c1") {
                    applied.lock().unwrap().push(view);
                }
            }
        };
        let fast = {
            let guard = guard.clone();
            let applied = applied.clone();
            async move {
                sleep(Duration::from_millis(10)).await;
                let token = guard.start_navigation(NavigationTarget::Planner);
                if let Some(view) = guard.guard(token, "planner") {
                    applied.lock().unwrap().push(view);
                }
            }
        };

        tokio::join!(slow, fast);
        assert_eq!(*applied.lock().unwrap(), vec!["planner"]);
    }
}
