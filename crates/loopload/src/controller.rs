use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{DEFAULT_RELOAD_INTERVAL, LoopLoadConfig};
use crate::context::{ContextDone, LoadContext};
use crate::error::LoadError;
use crate::intercept::{COMPONENT, Call, Interceptor, InterceptorChain, Operation};
use crate::slot::ValueSlot;
use crate::state::{AtomicLoadState, LoadState};

/// Produces fresh values for a [`LoopLoad`].
///
/// Implemented for every `Fn(LoadContext) -> impl Future<Output = anyhow::Result<T>>`.
pub trait Loader<T>: Send + Sync + 'static {
    fn load(&self, ctx: LoadContext) -> BoxFuture<'static, anyhow::Result<T>>;
}

impl<T, F, Fut> Loader<T> for F
where
    F: Fn(LoadContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    fn load(&self, ctx: LoadContext) -> BoxFuture<'static, anyhow::Result<T>> {
        self(ctx).boxed()
    }
}

/// What a call to [`LoopLoad::load`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reload {
    /// The loader ran and its value is now current.
    Committed,
    /// Another load was in flight, or the slot was not started, so the loader did not run.
    Skipped,
}

/// Number of load attempts per outcome since creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub success: u64,
    pub fail: u64,
    /// Cancelled loads and loader panics.
    pub exception: u64,
    /// Reload requests turned away because another load was in flight.
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    success: AtomicU64,
    fail: AtomicU64,
    exception: AtomicU64,
    skipped: AtomicU64,
}

/// The metric tag describing how a loader invocation ended.
fn outcome_tag(result: &Result<(), LoadError>) -> &'static str {
    match result {
        Ok(()) => "success",
        Err(LoadError::Failed(_)) => "fail",
        Err(_) => "exception",
    }
}

/// Maps a loader error onto [`LoadError`], telling cancellation apart from failure.
fn classify(ctx: &LoadContext, err: anyhow::Error) -> LoadError {
    if ctx.is_done() || err.is::<ContextDone>() || err.is::<tokio::time::error::Elapsed>() {
        LoadError::Cancelled
    } else {
        LoadError::from(err)
    }
}

struct Inner<T> {
    name: Arc<str>,
    value: ValueSlot<T>,
    state: AtomicLoadState,
    loader: Box<dyn Loader<T>>,
    interceptors: InterceptorChain,
    counters: Counters,
    last_refresh: Mutex<Option<Instant>>,
}

impl<T: Send + Sync + 'static> Inner<T> {
    fn call<'a>(&'a self, operation: Operation, ctx: &'a LoadContext) -> Call<'a> {
        Call {
            component: COMPONENT,
            name: &self.name,
            operation,
            ctx,
        }
    }

    /// Reloads unless another load holds the state, see [`LoopLoad::load`].
    async fn reload(&self, ctx: LoadContext, scheduled: bool) -> Result<Reload, LoadError> {
        let call = self.call(Operation::Load, &ctx);
        self.interceptors.before(&call);

        let result = match self.state.begin(LoadState::Ready) {
            Some(_guard) => self
                .invoke(ctx.clone(), scheduled)
                .await
                .map(|()| Reload::Committed),
            None => {
                tracing::trace!(name = %self.name, scheduled, "Reload already in flight, skipping");
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                Ok(Reload::Skipped)
            }
        };

        self.interceptors.after(&call, result.as_ref().map(|_| ()));
        result
    }

    /// Runs the loader once and commits its value on success.
    ///
    /// The caller must hold the [`LoadState::Loading`] guard.
    async fn invoke(&self, ctx: LoadContext, scheduled: bool) -> Result<(), LoadError> {
        let span = tracing::info_span!("loopload.load", name = %self.name, scheduled);

        async {
            let start = Instant::now();
            // Building the future may panic as well, so that happens inside `catch_unwind` too.
            let loaded = AssertUnwindSafe(async { self.loader.load(ctx.clone()).await })
                .catch_unwind()
                .await;

            let (value, result) = match loaded {
                Ok(Ok(value)) => (Some(value), Ok(())),
                Ok(Err(err)) => (None, Err(classify(&ctx, err))),
                Err(panic) => (None, Err(LoadError::from_panic(panic))),
            };

            let outcome = outcome_tag(&result);
            metric!(counter("loopload.load") += 1, "name" => &self.name, "outcome" => outcome);
            metric!(
                timer("loopload.load.duration") = start.elapsed(),
                "name" => &self.name,
                "outcome" => outcome,
            );

            match &result {
                Ok(()) => {
                    self.counters.success.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Loaded new value");
                }
                Err(LoadError::Failed(err)) => {
                    self.counters.fail.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %err, "Loader failed, keeping previous value");
                }
                Err(err) => {
                    self.counters.exception.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %err, "Load aborted, keeping previous value");
                }
            }

            if let Some(value) = value {
                self.value.set(value);
                *self
                    .last_refresh
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
            }

            result
        }
        .instrument(span)
        .await
    }
}

/// Handle to a running scheduler loop.
#[derive(Debug)]
struct Shutdown {
    /// Stop request, carrying the channel the loop acknowledges on.
    stop: oneshot::Sender<oneshot::Sender<()>>,
    /// Parent of the contexts handed to scheduled loads.
    cancel: CancellationToken,
}

/// Where a [`LoopLoad`] is in its start/close lifecycle.
#[derive(Debug, Default)]
enum RunState {
    #[default]
    Stopped,
    /// The startup load is in flight.
    Starting,
    Running(Shutdown),
    /// `close` was called. No loop is started from here on.
    Closed,
}

/// A named value that is loaded once on [`start`](Self::start) and then reloaded in the
/// background every [`reload_interval`](LoopLoadConfig::reload_interval).
///
/// Reads through [`get`](Self::get) never wait for a load. At most one loader invocation runs at
/// any time: a reload requested while another is in flight is skipped, not queued. Failed reloads
/// keep the previous value.
///
/// The host calls [`start`](Self::start) before serving and [`close`](Self::close) while
/// shutting down. Dropping the handle also stops the scheduler loop, without waiting for it.
pub struct LoopLoad<T> {
    inner: Arc<Inner<T>>,
    config: LoopLoadConfig,
    running: Mutex<RunState>,
}

impl<T> fmt::Debug for LoopLoad<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopLoad")
            .field("name", &self.inner.name)
            .field("state", &self.inner.state.get())
            .field("config", &self.config)
            .field("interceptors", &self.inner.interceptors)
            .finish()
    }
}

impl<T> LoopLoad<T>
where
    T: Default + Send + Sync + 'static,
{
    /// Creates a stopped slot holding `T::default()`.
    pub fn new<L>(name: impl Into<Arc<str>>, loader: L, config: LoopLoadConfig) -> Self
    where
        L: Loader<T>,
    {
        Self::with_interceptors(name, loader, config, Vec::new())
    }

    /// Like [`new`](Self::new), with `interceptors` wrapped around every get and load.
    ///
    /// The first interceptor is the outermost one.
    pub fn with_interceptors<L>(
        name: impl Into<Arc<str>>,
        loader: L,
        mut config: LoopLoadConfig,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> Self
    where
        L: Loader<T>,
    {
        let name = name.into();
        if config.reload_interval.is_zero() {
            tracing::warn!(name = %name, "Zero reload interval configured, using the default");
            config.reload_interval = DEFAULT_RELOAD_INTERVAL;
        }

        let mut chain = InterceptorChain::default();
        for interceptor in interceptors {
            chain.push(interceptor);
        }

        Self {
            inner: Arc::new(Inner {
                name,
                value: ValueSlot::default(),
                state: AtomicLoadState::new(),
                loader: Box::new(loader),
                interceptors: chain,
                counters: Counters::default(),
                last_refresh: Mutex::new(None),
            }),
            config,
            running: Mutex::new(RunState::Stopped),
        }
    }
}

impl<T> LoopLoad<T>
where
    T: Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &LoopLoadConfig {
        &self.config
    }

    pub fn load_state(&self) -> LoadState {
        self.inner.state.get()
    }

    /// Whether the scheduler loop is running.
    pub fn is_running(&self) -> bool {
        matches!(*self.lock_running(), RunState::Running(_))
    }

    fn lock_running(&self) -> MutexGuard<'_, RunState> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of load attempts per outcome so far.
    pub fn stats(&self) -> LoadStats {
        let counters = &self.inner.counters;
        LoadStats {
            success: counters.success.load(Ordering::Relaxed),
            fail: counters.fail.load(Ordering::Relaxed),
            exception: counters.exception.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// When the current value was committed, `None` before the first successful load.
    pub fn last_refresh(&self) -> Option<Instant> {
        *self
            .inner
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current value.
    ///
    /// This never waits for a load in flight: until a new value is committed, the previous one is
    /// returned. Before the first successful load this is `T::default()`. `ctx` is only handed to
    /// the interceptors.
    pub fn get(&self, ctx: &LoadContext) -> Arc<T> {
        let _span = tracing::trace_span!("loopload.get", name = %self.inner.name).entered();
        let call = self.inner.call(Operation::Get, ctx);

        self.inner.interceptors.before(&call);
        let value = self.inner.value.get();
        self.inner.interceptors.after(&call, Ok(()));

        value
    }

    /// Loads the initial value and starts the scheduler loop.
    ///
    /// The load runs on the calling task, with `ctx` as its context. If it fails the slot goes
    /// back to [`LoadState::NotLoaded`], no loop is started and `start` may be retried.
    ///
    /// Returns [`LoadError::AlreadyStarted`] if the slot was started before or a start is in
    /// flight. If [`close`](Self::close) is called while the initial load is in flight, a
    /// successfully loaded value is kept but no loop is started, and this returns
    /// [`LoadError::Closed`].
    ///
    /// Must be called within a tokio runtime.
    pub async fn start(&self, ctx: LoadContext) -> Result<(), LoadError> {
        let guard = self
            .inner
            .state
            .begin(LoadState::NotLoaded)
            .ok_or(LoadError::AlreadyStarted)?;

        {
            let mut running = self.lock_running();
            match &*running {
                RunState::Stopped => {}
                RunState::Closed => return Err(LoadError::Closed),
                RunState::Starting | RunState::Running(_) => return Err(LoadError::AlreadyStarted),
            }
            *running = RunState::Starting;
        }

        let call = self.inner.call(Operation::Load, &ctx);
        self.inner.interceptors.before(&call);
        let result = self.inner.invoke(ctx.clone(), false).await;
        self.inner.interceptors.after(&call, result.as_ref().copied());

        let mut running = self.lock_running();
        if let Err(err) = result {
            if matches!(*running, RunState::Starting) {
                *running = RunState::Stopped;
            }
            return Err(err);
        }
        guard.settle(LoadState::Ready);

        if matches!(*running, RunState::Closed) {
            tracing::info!(name = %self.inner.name, "Closed during startup, not starting loop");
            return Err(LoadError::Closed);
        }

        let cancel = CancellationToken::new();
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(run_scheduler(
            Arc::clone(&self.inner),
            self.config.reload_interval,
            cancel.clone(),
            stop_rx,
        ));
        *running = RunState::Running(Shutdown {
            stop: stop_tx,
            cancel,
        });
        drop(running);

        tracing::info!(
            name = %self.inner.name,
            interval = ?self.config.reload_interval,
            "Started reload loop"
        );
        Ok(())
    }

    /// Reloads the value now.
    ///
    /// If another load is in flight, or the slot has not been started, this returns
    /// `Ok(Reload::Skipped)` right away without running the loader. Errors leave the previous
    /// value in place.
    pub async fn load(&self, ctx: LoadContext) -> Result<Reload, LoadError> {
        self.inner.reload(ctx, false).await
    }

    /// Stops the scheduler loop and waits until it has exited.
    ///
    /// A scheduled load in flight has its context cancelled and is awaited. Once this returns, no
    /// scheduled load will run again. If a [`start`](Self::start) is in flight, its loop will not
    /// be started. Calling `close` on a slot that was never started, or again after closing, does
    /// nothing.
    pub async fn close(&self) {
        let shutdown = {
            let mut running = self.lock_running();
            match std::mem::take(&mut *running) {
                RunState::Stopped => return,
                RunState::Starting | RunState::Closed => {
                    *running = RunState::Closed;
                    return;
                }
                RunState::Running(shutdown) => {
                    *running = RunState::Closed;
                    shutdown
                }
            }
        };

        shutdown.cancel.cancel();
        let (ack_tx, ack_rx) = oneshot::channel();
        if shutdown.stop.send(ack_tx).is_ok() {
            // an error means the loop is gone already
            ack_rx.await.ok();
        }

        tracing::info!(name = %self.inner.name, "Stopped reload loop");
    }
}

impl<T> Drop for LoopLoad<T> {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let RunState::Running(shutdown) = std::mem::take(running) {
            // Dropping the stop sender makes the loop exit on its next poll.
            shutdown.cancel.cancel();
        }
    }
}

/// The scheduler loop, reloading on every tick until a stop request arrives.
async fn run_scheduler<T: Send + Sync + 'static>(
    inner: Arc<Inner<T>>,
    period: Duration,
    cancel: CancellationToken,
    mut stop: oneshot::Receiver<oneshot::Sender<()>>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            request = &mut stop => {
                drop(ticker);
                if let Ok(ack) = request {
                    ack.send(()).ok();
                }
                tracing::debug!(name = %inner.name, "Reload loop exited");
                return;
            }
            _ = ticker.tick() => {
                let ctx = LoadContext::from_token(cancel.child_token());
                // failures are already logged and counted
                inner.reload(ctx, true).await.ok();
            }
        }
    }
}
