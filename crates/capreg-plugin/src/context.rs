//! Call context: cancellation plus an optional deadline.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

pub use tokio_util::sync::CancellationToken;

use crate::error::PluginError;

/// Why a context-bound operation stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    /// The context's cancellation token fired.
    #[error("cancelled")]
    Cancelled,
    /// The context's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl From<Interrupted> for PluginError {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Cancelled => PluginError::Cancelled,
            Interrupted::DeadlineExceeded => PluginError::DeadlineExceeded,
        }
    }
}

/// Context passed to every capability call and every plugin acquisition.
///
/// Cloning shares the cancellation token; [`child`](Self::child) derives a
/// token that is cancelled with its parent but can also be cancelled on
/// its own.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context with a fresh token and no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `token` for cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Set the deadline, keeping an earlier one if already set.
    pub fn with_deadline(mut self, at: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(at),
            None => at,
        });
        self
    }

    /// Set the deadline to `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A derived context with a child cancellation token and the same
    /// deadline.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// The cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel this context (and every child).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The context deadline, capped at `limit` from now.
    pub fn deadline_within(&self, limit: Duration) -> Instant {
        let cap = Instant::now() + limit;
        match self.deadline {
            Some(at) => at.min(cap),
            None => cap,
        }
    }

    /// Drive `fut` until it completes, the context is cancelled, or the
    /// deadline passes. Cancellation wins ties.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = deadline => Err(Interrupted::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}
