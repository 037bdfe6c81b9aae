//! Multi-phase shutdown sequencing.
//!
//! The sequence is driven entirely by timers on the runtime clock:
//!
//! 1. **Shutdown requested**: readiness starts failing immediately while
//!    traffic is still served, giving the load balancer one and a half
//!    probe intervals to drop the pod from rotation.
//! 2. **Draining**: idle connections are destroyed, new non-probe
//!    requests answer `503 Closing`, and a poll waits for active
//!    connections and user drain gates. A hard deadline bounds the wait.
//! 3. **Final**: remaining sockets are force-closed, teardown hooks run
//!    all-settle, and a force-exit timer guarantees the process dies even
//!    if a hook hangs.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::orchestrator::Orchestrator;
use crate::phase::Phase;

impl Orchestrator {
    /// Begin the graceful shutdown sequence. Bound to the process
    /// termination signal; a second invocation terminates the process
    /// immediately with code `-127`.
    pub async fn start_shutdown(self: &Arc<Self>) {
        if self.shutdown_claimed.swap(true, Ordering::SeqCst) {
            error!("Shutdown already in progress, terminating immediately");
            self.exit_process(-127);
            return;
        }

        info!("Shutdown requested, readiness probe now failing");
        self.apply_transition(Phase::ShutdownRequested, |state| {
            state.shutdown_requested = true;
        })
        .await;

        let delay = self.config().phase1_duration;
        debug!(delay_ms = delay.as_millis() as u64, "Drain phase scheduled");
        let orchestrator = Arc::clone(self);
        clock::schedule(delay, async move {
            orchestrator.enter_draining().await;
        });
    }

    /// Phase 2: stop idle connections, refuse new work, and poll the
    /// drain gates until they clear or the deadline fires.
    pub(crate) async fn enter_draining(self: Arc<Self>) {
        self.update_phase(Phase::Draining).await;

        let trackers = self.trackers_snapshot();
        for tracker in &trackers {
            tracker.request_shutdown();
        }
        info!(servers = trackers.len(), "Draining connections");

        let orchestrator = Arc::clone(&self);
        let poll_handle = clock::schedule(self.config().connection_poll, async move {
            orchestrator.drain_loop().await;
        });

        let orchestrator = Arc::clone(&self);
        let deadline_handle = clock::schedule(self.config().drain_timeout, async move {
            warn!("Close timeout reached, forcing to close");
            // Detached so cancelling the deadline timer cannot cancel the
            // finish sequence it started.
            tokio::spawn(async move {
                orchestrator.finish_shutdown().await;
            });
        });

        let mut state = self.locked();
        state.drain_poll = Some(poll_handle);
        state.drain_deadline = Some(deadline_handle);
    }

    async fn drain_loop(self: Arc<Self>) {
        loop {
            if self.drain_gates_clear().await {
                let orchestrator = Arc::clone(&self);
                tokio::spawn(async move {
                    orchestrator.finish_shutdown().await;
                });
                return;
            }
            clock::sleep(self.config().connection_poll).await;
        }
    }

    /// One drain poll: the gate is clear when no non-probe request is in
    /// flight and every user shutdown-ready check passes.
    async fn drain_gates_clear(&self) -> bool {
        let (trackers, checks) = {
            let state = self.locked();
            (state.servers.clone(), state.shutdown_ready_checks.clone())
        };

        let active: usize = trackers
            .iter()
            .map(|tracker| tracker.active_connection_count())
            .sum();

        let results = join_all(checks.iter().map(|check| check())).await;

        let mut held = false;
        if active > 0 {
            debug!(active, "Waiting for active connections to finish");
            held = true;
        }
        for (index, result) in results.iter().enumerate() {
            match result {
                Ok(true) => {}
                Ok(false) => {
                    debug!(check = index, "Waiting for shutdown-ready check");
                    held = true;
                }
                Err(err) => {
                    self.emit_exception(
                        &format!("shutdown-ready check #{}", index),
                        err.as_ref(),
                    );
                    held = true;
                }
            }
        }
        !held
    }

    /// Phase 3: tear everything down. Safe to reach from both the drain
    /// poll and the hard deadline; only the first caller acts.
    pub(crate) async fn finish_shutdown(self: &Arc<Self>) {
        if self.finishing.swap(true, Ordering::SeqCst) {
            return;
        }

        let (poll, deadline) = {
            let mut state = self.locked();
            (state.drain_poll.take(), state.drain_deadline.take())
        };
        if let Some(handle) = poll {
            handle.cancel();
        }
        if let Some(handle) = deadline {
            handle.cancel();
        }

        self.update_phase(Phase::Final).await;

        for tracker in self.trackers_snapshot() {
            if let Err(err) = tracker.force_close() {
                self.emit_exception("server close", err.as_ref());
            }
        }

        // Scheduled before the teardown hooks run so a hung hook cannot
        // keep the process alive past the grace period.
        let exit = Arc::clone(&self.exit);
        let grace = self.config().force_exit_grace;
        clock::schedule(grace, async move {
            warn!("Force-exit grace expired, terminating");
            exit(0);
        });

        let hooks = self.locked().shutdown_callbacks.clone();
        let results = join_all(hooks.iter().map(|hook| hook())).await;
        for (index, result) in results.into_iter().enumerate() {
            if let Err(err) = result {
                self.emit_exception(&format!("shutdown handler #{}", index), err.as_ref());
            }
        }

        info!("Shutdown complete");
    }
}

/// Bind the process termination signal to [`Orchestrator::start_shutdown`].
///
/// On unix this listens for `SIGTERM` and `SIGINT`; elsewhere for ctrl-c.
/// A second signal hits the duplicate-shutdown guard and terminates the
/// process with code `-127`.
pub fn bind_termination_signal(orchestrator: &Arc<Orchestrator>) -> tokio::task::JoinHandle<()> {
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move {
        loop {
            termination_signal().await;
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator.start_shutdown().await;
            });
        }
    })
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "Failed to register SIGTERM handler");
            return std::future::pending().await;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "Failed to register SIGINT handler");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received ctrl-c");
}
