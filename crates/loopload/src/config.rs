use std::time::Duration;

use serde::Deserialize;

/// Default time between two scheduled reloads.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// Options of a [`LoopLoad`](crate::LoopLoad).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoopLoadConfig {
    /// Time between two scheduled reloads.
    ///
    /// The first scheduled reload happens one interval after a successful start.
    #[serde(with = "humantime_serde")]
    pub reload_interval: Duration,
}

impl Default for LoopLoadConfig {
    fn default() -> Self {
        Self {
            reload_interval: DEFAULT_RELOAD_INTERVAL,
        }
    }
}

impl LoopLoadConfig {
    /// Sets [`reload_interval`](Self::reload_interval).
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn reload_interval(mut self, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "reload interval must be non-zero");
        self.reload_interval = interval;
        self
    }
}
