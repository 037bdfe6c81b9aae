//! tokio_lifecycle - Kubernetes-aware lifecycle orchestration for
//! long-running Tokio services.
//!
//! This crate coordinates the lifecycle of a pod that the platform drives
//! through readiness/liveness probes and a signalled graceful shutdown:
//!
//! - **Phase state machine**: `startup → running → shutdown-requested →
//!   draining → final`, strictly forward, with ordered transition
//!   listeners.
//! - **Connection tracking**: a per-server registry distinguishing idle,
//!   active, and health-check traffic, so the drain gate counts only real
//!   in-flight work.
//! - **Shutdown sequencing**: readiness fails first so the load balancer
//!   drops the pod, then idle connections die and new work is refused,
//!   then teardown hooks run under a force-exit deadline. No request is
//!   refused before the pod left rotation; no in-flight request is cut
//!   off early.
//! - **Probe surface**: a small hyper server answering the ready/live
//!   probes with fixed plain-text reasons.
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_lifecycle::{LifecycleConfig, Orchestrator, ProbeServer};
//!
//! let config = LifecycleConfig::from_env()?;
//! let paths = config.probe_paths.clone();
//! let orchestrator = Orchestrator::new(config);
//!
//! let tracker = orchestrator.add_http_server(my_server);
//! orchestrator.on_ready_check(|| async { Ok(true) });
//! orchestrator.on_shutdown(|| async { Ok(()) });
//! tokio_lifecycle::shutdown::bind_termination_signal(&orchestrator);
//!
//! let probes = ProbeServer::bind("0.0.0.0:8080".parse()?, orchestrator, paths).await?;
//! probes.serve().await?;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod clock;
pub mod config;
pub mod hooks;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod probe;
pub mod server;
pub mod shutdown;
pub mod tracker;

// Re-exports for convenience
pub use config::{ConfigError, LifecycleConfig, ProbePaths};
pub use hooks::{BoxError, ExceptionSink};
pub use orchestrator::Orchestrator;
pub use phase::Phase;
pub use probe::ProbeReport;
pub use server::{run_probe_server, ProbeServer};
pub use tracker::{ConnectionId, HostedServer, RequestOutcome, ServerTracker};
