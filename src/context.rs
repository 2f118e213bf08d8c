//! Query context
//!
//! Carries cancellation and an optional deadline through every query.
//! Clones share the same cancellation state.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::QueryError;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Why a context stopped a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stopped {
    Cancelled,
    DeadlineExceeded,
}

impl Stopped {
    pub fn into_error(self, scope: &str, item_type: &str) -> QueryError {
        let message = match self {
            Stopped::Cancelled => "query cancelled",
            Stopped::DeadlineExceeded => "query deadline exceeded",
        };
        QueryError::cancelled(message, scope, item_type)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    inner: Arc<Inner>,
    deadline: Option<Instant>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that stops after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Signal cancellation to every clone of this context
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Non-blocking check, for use between pages and items
    pub fn check(&self) -> Result<(), Stopped> {
        if self.is_cancelled() {
            return Err(Stopped::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Stopped::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) -> Stopped {
        let cancelled = async {
            loop {
                let notified = self.inner.notify.notified();
                tokio::pin!(notified);
                // Register before checking so a cancel in between is not missed
                notified.as_mut().enable();
                if self.is_cancelled() {
                    return;
                }
                notified.await;
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = cancelled => Stopped::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Stopped::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                Stopped::Cancelled
            },
        }
    }

    /// Run a future unless the context stops first
    pub async fn run<F, T>(&self, fut: F) -> Result<T, Stopped>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            stopped = self.done() => Err(stopped),
            value = fut => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_without_cancel() {
        let ctx = QueryContext::new();
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancel_is_shared_between_clones() {
        let ctx = QueryContext::new();
        let clone = ctx.clone();
        clone.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.check(), Err(Stopped::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_future() {
        let ctx = QueryContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(Stopped::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_pending_future() {
        let ctx = QueryContext::with_timeout(Duration::from_secs(5));
        let result = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(Stopped::DeadlineExceeded));
    }

    #[test]
    fn test_stopped_into_error() {
        let err = Stopped::DeadlineExceeded.into_error("p.z", "t");
        assert_eq!(err.kind, crate::error::ErrorKind::Cancelled);
        assert!(err.message.contains("deadline"));
    }
}
