//! Per-call execution context
//!
//! A [`CallContext`] travels with every message through the Conductor and into
//! the arm that handles it. Each suspension point races its future against the
//! context's cancellation token and deadline via [`CallContext::run`].

use crate::errors::EngineError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus an optional absolute deadline
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context on an existing token
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Tighten the deadline to `timeout` from now
    ///
    /// An existing earlier deadline is kept.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// Child context: cancelled with the parent, same deadline
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail fast if the context is already cancelled or expired
    pub fn check(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(EngineError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Race `fut` against cancellation and the deadline
    pub async fn run<F, T>(&self, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = T>,
    {
        self.check()?;

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => Err(EngineError::DeadlineExceeded),
                out = fut => Ok(out),
            },
            None => tokio::select! {
                _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
                out = fut => Ok(out),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = CallContext::new();
        let out = ctx.run(async { 42 }).await;
        assert_eq!(out, Ok(42));
    }

    #[tokio::test]
    async fn test_run_cancelled_before_start() {
        let ctx = CallContext::new();
        ctx.cancel();
        let out = ctx.run(async { 1 }).await;
        assert_eq!(out, Err(EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_run_cancelled_mid_flight() {
        let ctx = CallContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let out = ctx
            .run(async {
                sleep(Duration::from_secs(5)).await;
                7
            })
            .await;
        assert_eq!(out, Err(EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(10));
        let out = ctx
            .run(async {
                sleep(Duration::from_secs(5)).await;
            })
            .await;
        assert_eq!(out, Err(EngineError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_with_timeout_keeps_earlier_deadline() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
        let first = ctx.deadline().unwrap();
        let ctx = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(first));
    }

    #[tokio::test]
    async fn test_child_follows_parent_cancel() {
        let parent = CallContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert_eq!(child.check(), Err(EngineError::Cancelled));
    }
}
