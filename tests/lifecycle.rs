//! Shutdown sequencing tests driven on the paused runtime clock.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_lifecycle::{
    BoxError, HostedServer, LifecycleConfig, Orchestrator, Phase, ServerTracker,
};

struct MockServer {
    listening: AtomicBool,
}

impl MockServer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            listening: AtomicBool::new(true),
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

/// Let spawned timer tasks and their follow-up work run to completion at
/// the current virtual instant.
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

async fn advance(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

fn orchestrator_with_exit(
    config: LifecycleConfig,
) -> (Arc<Orchestrator>, Arc<Mutex<Vec<i32>>>) {
    let codes: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&codes);
    let orchestrator = Orchestrator::with_exit_handler(config, move |code| {
        seen.lock().unwrap().push(code);
    });
    (orchestrator, codes)
}

fn recording_sink(orchestrator: &Orchestrator) -> Arc<Mutex<Vec<String>>> {
    let entries: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&entries);
    orchestrator.set_on_exception(move |ctx, err| {
        log.lock().unwrap().push(format!("{ctx}: {err}"));
    });
    entries
}

fn active_connection(tracker: &ServerTracker) -> Arc<AtomicUsize> {
    let destroyed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&destroyed);
    let id = tracker.on_connection(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    tracker.on_request(id, "/work");
    destroyed
}

#[tokio::test(start_paused = true)]
async fn three_phase_drain_with_idle_only() {
    // Probe interval of 10s puts the drain phase at +15s.
    let config = LifecycleConfig::default()
        .with_ready_probe_interval(Duration::from_secs(10));
    let (orchestrator, exits) = orchestrator_with_exit(config);
    orchestrator.add_http_server(MockServer::new());

    let order: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    for tag in [1u8, 2u8] {
        let order = Arc::clone(&order);
        orchestrator.on_shutdown(move || {
            let order = Arc::clone(&order);
            async move {
                order.lock().unwrap().push(tag);
                Ok(())
            }
        });
    }

    orchestrator.start_shutdown().await;
    assert_eq!(orchestrator.phase(), Phase::ShutdownRequested);
    assert!(orchestrator.is_shutdown_requested());

    advance(14_999).await;
    assert_eq!(orchestrator.phase(), Phase::ShutdownRequested);

    advance(1).await;
    assert_eq!(orchestrator.phase(), Phase::Draining);

    // One poll later there is nothing holding the drain.
    advance(1_000).await;
    assert_eq!(orchestrator.phase(), Phase::Final);
    assert_eq!(order.lock().unwrap().as_slice(), &[1, 2]);
    assert!(exits.lock().unwrap().is_empty());

    // The force-exit timer is the one that actually ends the process.
    advance(5_000).await;
    assert_eq!(exits.lock().unwrap().as_slice(), &[0]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_ready_check_holds_drain() {
    let config = LifecycleConfig::default()
        .with_ready_probe_interval(Duration::from_secs(2))
        .with_drain_timeout(Duration::from_secs(5));
    let (orchestrator, _exits) = orchestrator_with_exit(config);
    orchestrator.add_http_server(MockServer::new());

    let gate = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&gate);
    orchestrator.add_shutdown_ready_check(move || {
        let flag = Arc::clone(&flag);
        async move { Ok(flag.load(Ordering::SeqCst)) }
    });

    orchestrator.start_shutdown().await;
    advance(3_000).await;
    assert_eq!(orchestrator.phase(), Phase::Draining);

    // The gate keeps the drain open across several polls.
    for _ in 0..3 {
        advance(1_000).await;
        assert_eq!(orchestrator.phase(), Phase::Draining);
    }

    gate.store(true, Ordering::SeqCst);
    advance(1_000).await;
    assert_eq!(orchestrator.phase(), Phase::Final);
}

#[tokio::test(start_paused = true)]
async fn drain_deadline_force_closes_stuck_connection() {
    let config = LifecycleConfig::default()
        .with_ready_probe_interval(Duration::from_secs(2))
        .with_drain_timeout(Duration::from_secs(1));
    let (orchestrator, _exits) = orchestrator_with_exit(config);
    let server = MockServer::new();
    let tracker = orchestrator.add_http_server(Arc::clone(&server) as Arc<dyn HostedServer>);

    let destroyed = active_connection(&tracker);
    assert_eq!(tracker.active_connection_count(), 1);

    orchestrator.start_shutdown().await;
    advance(3_000).await;
    assert_eq!(orchestrator.phase(), Phase::Draining);
    // The active request survives the drain request itself.
    assert_eq!(tracker.active_connection_count(), 1);

    advance(1_000).await;
    assert_eq!(orchestrator.phase(), Phase::Final);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.connection_count(), 0);
    assert!(!server.is_listening());
}

#[tokio::test(start_paused = true)]
async fn failing_shutdown_handler_does_not_block_peers() {
    let config = LifecycleConfig::default()
        .with_ready_probe_interval(Duration::from_secs(1));
    let (orchestrator, _exits) = orchestrator_with_exit(config);
    orchestrator.add_http_server(MockServer::new());
    let entries = recording_sink(&orchestrator);

    let second_ran = Arc::new(AtomicBool::new(false));
    orchestrator.on_shutdown(|| async { Err::<(), BoxError>("db".into()) });
    let flag = Arc::clone(&second_ran);
    orchestrator.on_shutdown(move || {
        let flag = Arc::clone(&flag);
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });

    orchestrator.start_shutdown().await;
    advance(1_500).await;
    advance(1_000).await;
    assert_eq!(orchestrator.phase(), Phase::Final);
    assert!(second_ran.load(Ordering::SeqCst));

    let entries = entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains("#0"));
    assert!(entries[0].contains("db"));
}

#[tokio::test(start_paused = true)]
async fn second_shutdown_call_terminates_immediately() {
    let (orchestrator, exits) = orchestrator_with_exit(LifecycleConfig::default());
    orchestrator.add_http_server(MockServer::new());

    let transitions = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&transitions);
    orchestrator.on_state_change(move |_, _| {
        let count = Arc::clone(&count);
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    orchestrator.start_shutdown().await;
    orchestrator.start_shutdown().await;

    assert_eq!(exits.lock().unwrap().as_slice(), &[-127]);
    // No second phase-1 transition happened.
    assert_eq!(transitions.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.phase(), Phase::ShutdownRequested);
}

#[tokio::test(start_paused = true)]
async fn stuck_shutdown_handler_cannot_prevent_exit() {
    let config = LifecycleConfig::default()
        .with_ready_probe_interval(Duration::from_secs(1));
    let (orchestrator, exits) = orchestrator_with_exit(config);
    orchestrator.add_http_server(MockServer::new());

    orchestrator.on_shutdown(|| async {
        std::future::pending::<()>().await;
        Ok(())
    });

    orchestrator.start_shutdown().await;
    advance(1_500).await;
    advance(1_000).await;
    assert_eq!(orchestrator.phase(), Phase::Final);
    assert!(exits.lock().unwrap().is_empty());

    advance(5_000).await;
    assert_eq!(exits.lock().unwrap().as_slice(), &[0]);
}

#[tokio::test(start_paused = true)]
async fn readiness_flips_instantly_on_shutdown() {
    let (orchestrator, _exits) = orchestrator_with_exit(LifecycleConfig::default());
    orchestrator.add_http_server(MockServer::new());
    orchestrator.on_ready_check(|| async { Ok(true) });

    assert!(orchestrator.is_ready().await);
    assert_eq!(orchestrator.phase(), Phase::Running);

    orchestrator.start_shutdown().await;
    assert!(!orchestrator.is_ready().await);
    assert!(orchestrator.is_healthy());
}

#[tokio::test(start_paused = true)]
async fn health_check_traffic_does_not_hold_drain() {
    let config = LifecycleConfig::default()
        .with_ready_probe_interval(Duration::from_secs(1));
    let (orchestrator, _exits) = orchestrator_with_exit(config);
    let tracker = orchestrator.add_http_server(MockServer::new());

    orchestrator.start_shutdown().await;
    advance(1_500).await;
    assert_eq!(orchestrator.phase(), Phase::Draining);

    // A probe request during the drain is served and never counts as
    // active work.
    let id = tracker.on_connection(|| {});
    match tracker.on_request(id, "/api/probe/ready") {
        tokio_lifecycle::RequestOutcome::Serve { health_check } => assert!(health_check),
        tokio_lifecycle::RequestOutcome::Reject { .. } => panic!("probe request refused"),
    }
    assert_eq!(tracker.active_connection_count(), 0);

    advance(1_000).await;
    assert_eq!(orchestrator.phase(), Phase::Final);
}
