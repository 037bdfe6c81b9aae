//! The lifecycle orchestrator singleton.
//!
//! One `Orchestrator` value is created at program start and shared
//! (`Arc`) with every component that registers servers or hooks. All
//! mutable state lives behind a single mutex so probe handlers, the
//! shutdown sequencer, and registration calls always observe a consistent
//! snapshot; user callbacks are never invoked while the lock is held.
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_lifecycle::{LifecycleConfig, Orchestrator};
//!
//! let orchestrator = Orchestrator::new(LifecycleConfig::from_env()?);
//! orchestrator.on_ready_check(|| async { Ok(true) });
//! orchestrator.on_shutdown(|| async {
//!     // flush buffers, close pools ...
//!     Ok(())
//! });
//! ```

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::join_all;
use tracing::{debug, error, info};

use crate::clock::TimerHandle;
use crate::config::LifecycleConfig;
use crate::hooks::{
    self, box_ready_check, box_shutdown_hook, box_state_listener, BoxError, ExceptionSink,
    ReadyCheckFn, SharedSink, ShutdownHookFn, StateListenerFn,
};
use crate::phase::Phase;
use crate::tracker::{HostedServer, ServerTracker};

/// Capability used to terminate the process. Injected in tests.
pub(crate) type ExitFn = Arc<dyn Fn(i32) + Send + Sync>;

pub(crate) struct State {
    pub(crate) phase: Phase,
    pub(crate) fault: Option<Arc<dyn std::error::Error + Send + Sync>>,
    pub(crate) shutdown_requested: bool,
    pub(crate) servers: Vec<Arc<ServerTracker>>,
    pub(crate) ready_checks: Vec<ReadyCheckFn>,
    pub(crate) shutdown_callbacks: Vec<ShutdownHookFn>,
    pub(crate) shutdown_ready_checks: Vec<ReadyCheckFn>,
    pub(crate) state_listeners: Vec<StateListenerFn>,
    pub(crate) drain_poll: Option<TimerHandle>,
    pub(crate) drain_deadline: Option<TimerHandle>,
}

/// Coordinates startup, readiness, liveness, and multi-phase graceful
/// shutdown for the servers registered with it.
pub struct Orchestrator {
    config: LifecycleConfig,
    pub(crate) state: Mutex<State>,
    /// Serializes phase transitions across the listener fan-out so a later
    /// transition's listeners never start before the earlier transition's
    /// all-settle completed.
    transition: tokio::sync::Mutex<()>,
    /// Claimed by the first `start_shutdown` call.
    pub(crate) shutdown_claimed: AtomicBool,
    /// Claimed by the first `finish_shutdown` call.
    pub(crate) finishing: AtomicBool,
    pub(crate) sink: SharedSink,
    pub(crate) exit: ExitFn,
}

impl Orchestrator {
    /// Create an orchestrator. The returned value is shared; clone the
    /// `Arc` into signal handlers, probe servers, and adapters.
    pub fn new(config: LifecycleConfig) -> Arc<Self> {
        Self::with_exit_handler(config, |code| std::process::exit(code))
    }

    /// Create an orchestrator with a custom process-exit capability.
    /// Tests use this to observe exit codes instead of dying.
    pub fn with_exit_handler<F>(config: LifecycleConfig, exit: F) -> Arc<Self>
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        Arc::new(Self {
            config,
            state: Mutex::new(State {
                phase: Phase::Startup,
                fault: None,
                shutdown_requested: false,
                servers: Vec::new(),
                ready_checks: Vec::new(),
                shutdown_callbacks: Vec::new(),
                shutdown_ready_checks: Vec::new(),
                state_listeners: Vec::new(),
                drain_poll: None,
                drain_deadline: None,
            }),
            transition: tokio::sync::Mutex::new(()),
            shutdown_claimed: AtomicBool::new(false),
            finishing: AtomicBool::new(false),
            sink: hooks::new_shared_sink(),
            exit: Arc::new(exit),
        })
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub(crate) fn locked(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.locked().phase
    }

    /// Whether shutdown has been requested. Once set, readiness never
    /// reports ready again.
    pub fn is_shutdown_requested(&self) -> bool {
        self.locked().shutdown_requested
    }

    /// Whether an unrecoverable fault has been recorded.
    pub fn has_fault(&self) -> bool {
        self.locked().fault.is_some()
    }

    // -- registration API ---------------------------------------------------

    /// Begin tracking a server. Returns the tracker the server adapter
    /// feeds connection and request events into.
    pub fn add_http_server(&self, server: Arc<dyn HostedServer>) -> Arc<ServerTracker> {
        let tracker = Arc::new(ServerTracker::new(
            server,
            self.config.probe_paths.health_check_urls(),
            Arc::clone(&self.sink),
        ));
        self.locked().servers.push(Arc::clone(&tracker));
        tracker
    }

    /// Register a readiness predicate. All registered checks must resolve
    /// `Ok(true)` for the readiness probe to pass.
    pub fn on_ready_check<F, Fut>(&self, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        self.locked().ready_checks.push(box_ready_check(check));
    }

    /// Register a teardown hook, run concurrently with its peers once the
    /// drain completes. A failing hook is reported to the exception sink
    /// and never blocks the others.
    pub fn on_shutdown<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.locked().shutdown_callbacks.push(box_shutdown_hook(hook));
    }

    /// Register a drain gate. The drain phase cannot conclude until every
    /// registered check resolves `Ok(true)`, even with no active
    /// connections left.
    pub fn add_shutdown_ready_check<F, Fut>(&self, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        self.locked()
            .shutdown_ready_checks
            .push(box_ready_check(check));
    }

    /// Register a phase-transition listener, invoked with `(new, old)`
    /// exactly once per distinct transition.
    pub fn on_state_change<F, Fut>(&self, listener: F)
    where
        F: Fn(Phase, Phase) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.locked().state_listeners.push(box_state_listener(listener));
    }

    /// Replace the exception sink used for hook and tracker errors.
    pub fn set_on_exception<F>(&self, sink: F)
    where
        F: Fn(&str, &(dyn std::error::Error + Send + Sync + 'static)) + Send + Sync + 'static,
    {
        let sink: ExceptionSink = Arc::new(sink);
        *self.sink.write().unwrap_or_else(|e| e.into_inner()) = sink;
    }

    /// Record an unrecoverable fault. The fault latches: liveness fails
    /// from now on and is never restored. In dev mode the process exits
    /// immediately with code 1; in production the platform is expected to
    /// restart the pod after observing failed liveness probes.
    pub fn set_unrecoverable_error(&self, error: impl Into<BoxError>) {
        let error: Arc<dyn std::error::Error + Send + Sync> = Arc::from(error.into());
        error!(error = %error, "Unrecoverable error reported");
        {
            let mut state = self.locked();
            if state.fault.is_none() {
                state.fault = Some(Arc::clone(&error));
            }
        }
        if self.config.dev_mode {
            (self.exit)(1);
        }
    }

    pub(crate) fn exit_process(&self, code: i32) {
        (self.exit)(code);
    }

    pub(crate) fn emit_exception(
        &self,
        context: &str,
        error: &(dyn std::error::Error + Send + Sync + 'static),
    ) {
        hooks::emit(&self.sink, context, error);
    }

    pub(crate) fn trackers_snapshot(&self) -> Vec<Arc<ServerTracker>> {
        self.locked().servers.clone()
    }

    // -- phase state machine ------------------------------------------------

    /// Move the state machine to `target` and fan out to every transition
    /// listener. A no-op when `target` is the current phase or would move
    /// the machine backwards.
    pub(crate) async fn update_phase(&self, target: Phase) {
        self.apply_transition(target, |_| {}).await;
    }

    /// Like [`update_phase`](Self::update_phase), applying `prepare` to
    /// the state under the same lock as the phase flip so readers never
    /// observe an inconsistent composite.
    pub(crate) async fn apply_transition<P>(&self, target: Phase, prepare: P)
    where
        P: FnOnce(&mut State),
    {
        let _transition = self.transition.lock().await;

        let (old, listeners) = {
            let mut state = self.locked();
            if target == state.phase {
                return;
            }
            if target < state.phase {
                debug!(
                    current = %state.phase,
                    requested = %target,
                    "Ignoring backwards phase transition"
                );
                return;
            }
            let old = state.phase;
            state.phase = target;
            prepare(&mut *state);
            (old, state.state_listeners.clone())
        };

        info!(from = %old, to = %target, "Lifecycle phase changed");

        let results = join_all(listeners.iter().map(|listener| listener(target, old))).await;
        for (index, result) in results.into_iter().enumerate() {
            if let Err(err) = result {
                self.emit_exception(&format!("state change listener #{}", index), err.as_ref());
            }
        }
    }
}
