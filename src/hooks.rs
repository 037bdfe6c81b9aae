//! User-callback plumbing: boxed hook types and the exception sink.
//!
//! Every user-supplied hook list follows the same all-settle discipline:
//! run every entry concurrently, wait for all of them, report individual
//! failures to the exception sink tagged with the entry index, and never
//! let one failure abort its peers.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use tracing::warn;

/// Boxed error type used at every user-facing boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A readiness or shutdown-readiness predicate. `Ok(true)` passes;
/// `Ok(false)` and `Err(_)` both count as not ready.
pub(crate) type ReadyCheckFn = Arc<dyn Fn() -> BoxFuture<Result<bool, BoxError>> + Send + Sync>;

/// A shutdown teardown hook.
pub(crate) type ShutdownHookFn = Arc<dyn Fn() -> BoxFuture<Result<(), BoxError>> + Send + Sync>;

/// A phase-transition listener, invoked with `(new, old)`.
pub(crate) type StateListenerFn =
    Arc<dyn Fn(crate::phase::Phase, crate::phase::Phase) -> BoxFuture<Result<(), BoxError>> + Send + Sync>;

/// Destination for errors raised by user hooks and tracker internals.
///
/// Receives a short context string (e.g. `"shutdown handler #0"`) and the
/// error itself. Replaceable at runtime via
/// [`Orchestrator::set_on_exception`](crate::Orchestrator::set_on_exception).
pub type ExceptionSink =
    Arc<dyn Fn(&str, &(dyn std::error::Error + Send + Sync + 'static)) + Send + Sync>;

/// Shared, swappable sink slot.
pub(crate) type SharedSink = Arc<RwLock<ExceptionSink>>;

/// Default sink: structured warning via `tracing`.
pub(crate) fn default_exception_sink() -> ExceptionSink {
    Arc::new(|context, error| {
        warn!(context = context, error = %error, "lifecycle hook failed");
    })
}

pub(crate) fn new_shared_sink() -> SharedSink {
    Arc::new(RwLock::new(default_exception_sink()))
}

/// Report an error through the shared sink.
pub(crate) fn emit(
    sink: &SharedSink,
    context: &str,
    error: &(dyn std::error::Error + Send + Sync + 'static),
) {
    let sink = sink
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    (*sink)(context, error);
}

pub(crate) fn box_ready_check<F, Fut>(check: F) -> ReadyCheckFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    Arc::new(move || Box::pin(check()) as BoxFuture<Result<bool, BoxError>>)
}

pub(crate) fn box_shutdown_hook<F, Fut>(hook: F) -> ShutdownHookFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move || Box::pin(hook()) as BoxFuture<Result<(), BoxError>>)
}

pub(crate) fn box_state_listener<F, Fut>(listener: F) -> StateListenerFn
where
    F: Fn(crate::phase::Phase, crate::phase::Phase) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |new, old| Box::pin(listener(new, old)) as BoxFuture<Result<(), BoxError>>)
}
