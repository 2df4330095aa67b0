//! A named value that keeps itself fresh.
//!
//! A [`LoopLoad`] holds the latest result of a user supplied [`Loader`]. It loads once on
//! [`start`](LoopLoad::start), then reloads in the background on a fixed interval. Reads through
//! [`get`](LoopLoad::get) never wait for a load, they return the last committed value.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use loopload::{LoadContext, LoopLoad, LoopLoadConfig};
//!
//! # async fn example() -> Result<(), loopload::LoadError> {
//! let rates = LoopLoad::new(
//!     "exchange_rates",
//!     |_ctx: LoadContext| async move { anyhow::Ok(vec![1.0f64, 0.92, 0.79]) },
//!     LoopLoadConfig::default().reload_interval(Duration::from_secs(300)),
//! );
//!
//! rates.start(LoadContext::new()).await?;
//! println!("{:?}", rates.get(&LoadContext::new()));
//! rates.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_debug_implementations, clippy::all)]

#[macro_use]
pub mod metrics;

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod intercept;
pub mod slot;
pub mod state;

pub use config::LoopLoadConfig;
pub use context::{ContextDone, LoadContext};
pub use controller::{LoadStats, Loader, LoopLoad, Reload};
pub use error::LoadError;
pub use intercept::{Call, Interceptor, Operation};
pub use state::LoadState;
