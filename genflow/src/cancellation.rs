//! Cooperative cancellation for pipeline runs.
//!
//! One token is handed to each run. Raising it stops new stages from
//! starting and suppresses pending retries; an attempt that is already
//! executing is always allowed to finish.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::info;

/// Run-scoped cancellation signal.
///
/// Only the first reason is kept; later calls to [`CancellationToken::cancel`]
/// are ignored.
#[derive(Default)]
pub struct CancellationToken {
    raised: AtomicBool,
    reason: RwLock<Option<String>>,
    waiters: Notify,
}

impl CancellationToken {
    /// Creates a token that has not been raised.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the token and wakes every task parked in a backoff sleep.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .raised
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let reason = reason.into();
        info!(reason = %reason, "Cancellation requested");
        *self.reason.write() = Some(reason);
        self.waiters.notify_waiters();
    }

    /// Whether the token has been raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// The first cancellation reason.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Resolves once the token is raised.
    pub async fn cancelled(&self) {
        loop {
            // Register interest before checking the flag so a concurrent cancel wakes us.
            let notified = self.waiters.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fresh_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        token.cancel("user closed the tab");
        token.cancel("deadline");

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("user closed the tab"));
        assert!(format!("{token:?}").contains("user closed the tab"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff_sleep() {
        let token = Arc::new(CancellationToken::new());
        let sleeper = {
            let token = Arc::clone(&token);
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_secs(30)) => false,
                    () = token.cancelled() => true,
                }
            })
        };

        tokio::task::yield_now().await;
        token.cancel("stop");

        assert!(sleeper.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_returns_when_already_raised() {
        let token = CancellationToken::new();
        token.cancel("early");
        token.cancelled().await;
    }
}
