//! Cancellation and deadlines for network and subprocess work.
//!
//! Every suspending call in this crate runs under a [`Context`]. Racing a
//! future against the context drops it on cancellation or timeout, and
//! child processes are spawned with `kill_on_drop`, so dropping is enough
//! to stop them.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a raced future did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    /// The token was cancelled.
    #[error("operation cancelled")]
    Cancelled,
    /// The deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl From<Interrupted> for crate::Error {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Cancelled => Self::Cancelled,
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// A cancellable, optionally deadline-bearing scope.
///
/// Cloning shares the cancellation token; [`Context::child`] creates a scope
/// that is cancelled with its parent but can also be cancelled on its own.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context around an existing token.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Adds a deadline `timeout` from now, keeping an earlier one.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Adds a deadline, keeping an earlier one.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// A child scope sharing this deadline.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancels this scope and all children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether this scope has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails fast if the scope is already over.
    ///
    /// # Errors
    ///
    /// Returns the interruption when cancelled or past the deadline.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// Runs `fut` to completion unless the scope ends first, in which case
    /// `fut` is dropped.
    ///
    /// # Errors
    ///
    /// Returns the interruption that won the race.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        self.check()?;
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.token.cancelled() => Err(Interrupted::Cancelled),
                () = tokio::time::sleep_until(deadline) => Err(Interrupted::DeadlineExceeded),
                out = fut => Ok(out),
            },
            None => tokio::select! {
                biased;
                () = self.token.cancelled() => Err(Interrupted::Cancelled),
                out = fut => Ok(out),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = Context::new();
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_run_cancelled_before_start() {
        let ctx = Context::new();
        ctx.cancel();
        assert_eq!(ctx.run(async { 7 }).await, Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn test_child_cancelled_with_parent() {
        let parent = Context::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());

        let other = Context::new();
        let child = other.child();
        child.cancel();
        assert!(!other.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_secs(1));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_running() {
        let ctx = Context::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert_eq!(result, Err(Interrupted::Cancelled));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = Context::new()
            .with_deadline(now + Duration::from_secs(5))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(5)));
    }
}
