use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Holds the currently committed value of a [`LoopLoad`](crate::LoopLoad).
///
/// Reads never block and always observe a fully written value. Writes replace the whole value
/// at once.
pub struct ValueSlot<T> {
    current: ArcSwap<T>,
}

impl<T: Default> Default for ValueSlot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> ValueSlot<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(value),
        }
    }

    /// Returns a snapshot of the current value.
    pub fn get(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// Replaces the current value.
    pub fn set(&self, value: T) {
        self.current.store(Arc::new(value));
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueSlot")
            .field("current", &self.get())
            .finish()
    }
}
