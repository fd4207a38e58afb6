//! Cooperative cancellation for plan runs.
//!
//! A caller holds a [`CancellationTokenSource`] and hands its token to the
//! executor. Cancelling stops dispatch: pending and ready tasks become
//! `skipped`, in-flight invocations are aborted, completed results are kept.
//!
//! ```ignore
//! let source = CancellationTokenSource::new();
//! let executor = PlanExecutor::new(graph).with_cancellation_source(source.clone());
//!
//! tokio::select! {
//!     _ = source.token().cancelled() => {}
//!     report = executor.execute() => {}
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Thread-safe handle reporting whether a run was cancelled.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Returns true if the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once the token is cancelled.
    ///
    /// Safe to race against [`CancellationTokenSource::cancel`]; the waiter
    /// registers before checking the flag.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Owner of a cancellation token.
///
/// Cloning a source creates a new handle to the same token.
#[derive(Clone, Debug)]
pub struct CancellationTokenSource {
    token: CancellationToken,
}

impl CancellationTokenSource {
    /// Creates a new source with a fresh token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a handle to the token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancels the token. Idempotent.
    pub fn cancel(&self) {
        self.token.cancelled.store(true, Ordering::SeqCst);
        self.token.notify.notify_waiters();
    }

    /// Returns true if the source has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for CancellationTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_visible_to_all_handles() {
        let source = CancellationTokenSource::new();
        let token1 = source.token();
        let token2 = source.clone().token();

        assert!(!token1.is_cancelled());
        source.cancel();
        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());

        source.cancel();
        assert!(source.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let source = CancellationTokenSource::new();
        let token = source.token();

        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let source = CancellationTokenSource::new();
        source.cancel();
        tokio::time::timeout(Duration::from_millis(100), source.token().cancelled())
            .await
            .expect("already cancelled");
    }
}
