use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Error returned by [`LoadContext::run`] when the context ends before the future completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("load context cancelled or expired")]
pub struct ContextDone;

/// Cancellation and deadline handed to every loader invocation.
///
/// Loaders are expected to honour it: either by checking [`is_cancelled`](Self::is_cancelled)
/// themselves or by wrapping their work in [`run`](Self::run). Nothing enforces the deadline
/// from the outside.
#[derive(Debug, Clone, Default)]
pub struct LoadContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl LoadContext {
    /// A context that is never cancelled and has no deadline, unless [`cancel`](Self::cancel) is
    /// called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context bound to an existing cancellation token.
    pub fn from_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Sets a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets a deadline, keeping an earlier one if present.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Derives a context that is cancelled together with this one, but can also be cancelled on
    /// its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Whether the context ended, either by cancellation or by its deadline.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    /// Completes when the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Drives `future` to completion unless the context ends first.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, ContextDone> {
        if self.is_done() {
            return Err(ContextDone);
        }
        tokio::select! {
            biased;
            _ = self.done() => Err(ContextDone),
            output = future => Ok(output),
        }
    }
}
