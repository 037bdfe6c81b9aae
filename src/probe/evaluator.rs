//! Readiness and liveness evaluation against orchestrator state.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::debug;

use super::report::{
    ProbeReport, MSG_ALIVE, MSG_CHECKS_FAILED, MSG_CLOSING, MSG_NOT_LISTENING, MSG_NO_SERVERS,
    MSG_READY,
};
use crate::orchestrator::Orchestrator;
use crate::phase::Phase;

impl Orchestrator {
    /// Readiness decision with reason and canonical status code.
    ///
    /// Evaluation order:
    /// 1. A recorded fault or a requested shutdown fails readiness for
    ///    good.
    /// 2. No registered servers means the host has not finished wiring up.
    /// 3. Every user ready-check must resolve `Ok(true)`; errors count as
    ///    failures and never propagate.
    /// 4. Every registered server must be listening.
    /// 5. The first successful evaluation moves the machine out of
    ///    `Startup` into `Running`.
    pub async fn check_readiness(self: &Arc<Self>) -> ProbeReport {
        let (faulted, closing, servers, checks, phase) = {
            let state = self.locked();
            (
                state.fault.is_some(),
                state.shutdown_requested,
                state.servers.clone(),
                state.ready_checks.clone(),
                state.phase,
            )
        };

        if faulted || closing {
            return ProbeReport::unavailable(MSG_CLOSING);
        }

        if servers.is_empty() {
            return ProbeReport::unavailable(MSG_NO_SERVERS);
        }

        let results = join_all(checks.iter().map(|check| check())).await;
        let passed = results.iter().all(|r| matches!(r, Ok(true)));
        if !passed {
            for (index, result) in results.iter().enumerate() {
                if let Err(err) = result {
                    debug!(check = index, error = %err, "Ready check failed");
                }
            }
            return ProbeReport::unavailable(MSG_CHECKS_FAILED);
        }

        if servers.iter().any(|tracker| !tracker.is_listening()) {
            return ProbeReport::unavailable(MSG_NOT_LISTENING);
        }

        if phase == Phase::Startup {
            // Monotonic guard in the state machine makes this safe even
            // when a shutdown races the first successful probe.
            self.update_phase(Phase::Running).await;
        }

        ProbeReport::ok(MSG_READY)
    }

    /// Whether the service is ready for new traffic.
    pub async fn is_ready(self: &Arc<Self>) -> bool {
        self.check_readiness().await.is_ok()
    }

    /// Liveness decision: healthy unless an unrecoverable fault latched.
    pub fn check_liveness(&self) -> ProbeReport {
        match &self.locked().fault {
            Some(fault) => ProbeReport::unavailable(format!("Unrecoverable error: {}", fault)),
            None => ProbeReport::ok(MSG_ALIVE),
        }
    }

    /// Whether the process should keep running.
    pub fn is_healthy(&self) -> bool {
        self.check_liveness().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleConfig;
    use crate::hooks::BoxError;
    use crate::tracker::HostedServer;
    use http::StatusCode;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockServer {
        listening: AtomicBool,
    }

    impl MockServer {
        fn new(listening: bool) -> Arc<Self> {
            Arc::new(Self {
                listening: AtomicBool::new(listening),
            })
        }
    }

    impl HostedServer for MockServer {
        fn is_listening(&self) -> bool {
            self.listening.load(Ordering::SeqCst)
        }

        fn stop_listening(&self) -> Result<(), BoxError> {
            self.listening.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn orchestrator() -> Arc<Orchestrator> {
        Orchestrator::with_exit_handler(LifecycleConfig::default(), |_| {})
    }

    #[tokio::test]
    async fn test_not_ready_without_servers() {
        let orchestrator = orchestrator();
        let report = orchestrator.check_readiness().await;
        assert_eq!(report.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.message, "Server not ready");
        assert_eq!(orchestrator.phase(), Phase::Startup);
    }

    #[tokio::test]
    async fn test_ready_transitions_to_running() {
        let orchestrator = orchestrator();
        orchestrator.add_http_server(MockServer::new(true));
        orchestrator.on_ready_check(|| async { Ok(true) });

        let report = orchestrator.check_readiness().await;
        assert_eq!(report.status, StatusCode::OK);
        assert_eq!(report.message, "ready");
        assert_eq!(orchestrator.phase(), Phase::Running);
    }

    #[tokio::test]
    async fn test_failing_check_blocks_readiness() {
        let orchestrator = orchestrator();
        orchestrator.add_http_server(MockServer::new(true));
        orchestrator.on_ready_check(|| async { Ok(true) });
        orchestrator.on_ready_check(|| async { Ok(false) });

        let report = orchestrator.check_readiness().await;
        assert_eq!(report.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.message, "Ready check(s) failed");
        assert_eq!(orchestrator.phase(), Phase::Startup);
    }

    #[tokio::test]
    async fn test_erroring_check_counts_as_failed() {
        let orchestrator = orchestrator();
        orchestrator.add_http_server(MockServer::new(true));
        orchestrator.on_ready_check(|| async { Err::<bool, BoxError>("db unreachable".into()) });

        let report = orchestrator.check_readiness().await;
        assert_eq!(report.message, "Ready check(s) failed");
    }

    #[tokio::test]
    async fn test_not_listening_blocks_readiness() {
        let orchestrator = orchestrator();
        orchestrator.add_http_server(MockServer::new(false));

        let report = orchestrator.check_readiness().await;
        assert_eq!(report.message, "HTTP server not ready");
    }

    #[tokio::test]
    async fn test_shutdown_fails_readiness_forever() {
        let orchestrator = orchestrator();
        orchestrator.add_http_server(MockServer::new(true));
        assert!(orchestrator.is_ready().await);

        orchestrator
            .apply_transition(Phase::ShutdownRequested, |state| {
                state.shutdown_requested = true;
            })
            .await;

        let report = orchestrator.check_readiness().await;
        assert_eq!(report.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.message, "Service is closing");
    }

    #[tokio::test]
    async fn test_liveness_latches_on_fault() {
        let orchestrator = Orchestrator::with_exit_handler(
            LifecycleConfig::default().with_dev_mode(false),
            |_| {},
        );
        assert!(orchestrator.is_healthy());
        assert_eq!(orchestrator.check_liveness().message, "alive");

        orchestrator.set_unrecoverable_error("cache poisoned");
        assert!(!orchestrator.is_healthy());
        let report = orchestrator.check_liveness();
        assert_eq!(report.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.message, "Unrecoverable error: cache poisoned");
    }
}
