use std::sync::atomic::{AtomicU8, Ordering};

/// The load state of a [`LoopLoad`](crate::LoopLoad).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadState {
    /// No load has succeeded yet, the slot holds the default value.
    NotLoaded = 0,
    /// A loader invocation is in flight.
    Loading = 1,
    /// The slot holds a committed value and accepts reloads.
    Ready = 2,
}

impl LoadState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::NotLoaded,
            1 => Self::Loading,
            _ => Self::Ready,
        }
    }
}

/// An atomic [`LoadState`].
///
/// Entering [`LoadState::Loading`] is a compare-and-swap, so at most one caller holds a
/// [`LoadingGuard`] at any time. Everyone else is turned away instead of waiting.
#[derive(Debug)]
pub(crate) struct AtomicLoadState(AtomicU8);

impl AtomicLoadState {
    pub fn new() -> Self {
        Self(AtomicU8::new(LoadState::NotLoaded as u8))
    }

    pub fn get(&self) -> LoadState {
        LoadState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves from `from` into [`LoadState::Loading`].
    ///
    /// Returns `None` if the current state is not `from`. The returned guard puts the state back
    /// to `from` when dropped, unless [`LoadingGuard::settle`] picks another state.
    pub fn begin(&self, from: LoadState) -> Option<LoadingGuard<'_>> {
        self.0
            .compare_exchange(
                from as u8,
                LoadState::Loading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;

        Some(LoadingGuard {
            state: self,
            on_drop: from,
        })
    }
}

/// Proof of exclusive access to the loader, see [`AtomicLoadState::begin`].
///
/// Leaving the `Loading` state happens on drop, so neither a panic nor a dropped future can
/// leave the slot stuck in `Loading`.
#[derive(Debug)]
pub(crate) struct LoadingGuard<'a> {
    state: &'a AtomicLoadState,
    on_drop: LoadState,
}

impl LoadingGuard<'_> {
    /// Leaves the `Loading` state for `state`.
    pub fn settle(mut self, state: LoadState) {
        self.on_drop = state;
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.0.store(self.on_drop as u8, Ordering::Release);
    }
}
