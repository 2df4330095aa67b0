use std::sync::Arc;

use thiserror::Error;

/// An error produced while starting or reloading a [`LoopLoad`](crate::LoopLoad).
///
/// Whatever the variant, the previously committed value stays in place.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// [`start`](crate::LoopLoad::start) was called on a slot that is already started, or
    /// whose startup load is still in flight.
    #[error("already started")]
    AlreadyStarted,
    /// [`close`](crate::LoopLoad::close) was called before the scheduler loop could start.
    #[error("closed before start completed")]
    Closed,
    /// The loader returned an error.
    #[error("load failed: {0:#}")]
    Failed(Arc<anyhow::Error>),
    /// The load context was cancelled or its deadline passed before the loader finished.
    #[error("load cancelled")]
    Cancelled,
    /// The loader panicked.
    ///
    /// The panic is caught at the call boundary and is otherwise treated as a failure.
    #[error("loader panicked: {0}")]
    Panicked(String),
}

impl LoadError {
    /// Whether this is a loader failure, either a returned error or a recovered panic.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Panicked(_))
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_owned()
        };
        Self::Panicked(message)
    }
}

impl From<anyhow::Error> for LoadError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(Arc::new(err))
    }
}
