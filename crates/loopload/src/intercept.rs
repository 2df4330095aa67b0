//! Hooks wrapped around [`get`](crate::LoopLoad::get) and [`load`](crate::LoopLoad::load).
//!
//! Interceptors only observe. They are called before and after the underlying operation and
//! cannot change its result.
use std::fmt;
use std::sync::Arc;

use crate::context::LoadContext;
use crate::error::LoadError;

/// The component every [`Call`] is tagged with.
pub const COMPONENT: &str = "loopload";

/// The intercepted operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Load,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "Get",
            Self::Load => "Load",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies an intercepted call.
#[derive(Clone, Copy, Debug)]
pub struct Call<'a> {
    pub component: &'static str,
    pub name: &'a str,
    pub operation: Operation,
    /// The context the caller passed to the operation.
    pub ctx: &'a LoadContext,
}

/// Observes calls on a [`LoopLoad`](crate::LoopLoad).
pub trait Interceptor: Send + Sync + 'static {
    /// Invoked right before the operation runs.
    fn before(&self, call: &Call<'_>) {
        let _ = call;
    }

    /// Invoked right after the operation finished.
    ///
    /// `result` is the operation's error, if any. A skipped reload is reported as success.
    fn after(&self, call: &Call<'_>, result: Result<(), &LoadError>) {
        let _ = (call, result);
    }
}

/// An ordered list of [`Interceptor`]s.
///
/// `before` hooks run in registration order, `after` hooks in reverse, so the first interceptor
/// is the outermost.
#[derive(Clone, Default)]
pub(crate) struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn before(&self, call: &Call<'_>) {
        for interceptor in &self.interceptors {
            interceptor.before(call);
        }
    }

    pub fn after(&self, call: &Call<'_>, result: Result<(), &LoadError>) {
        for interceptor in self.interceptors.iter().rev() {
            interceptor.after(call, result);
        }
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}
