//! Lifecycle phases.

use std::fmt;

/// Lifecycle phase of the orchestrated process.
///
/// Phases are strictly ordered and only ever move forward:
/// `Startup → Running → ShutdownRequested → Draining → Final`.
/// `Startup → ShutdownRequested` is also legal (shutdown before the
/// service ever became ready).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Process started, readiness not yet confirmed.
    Startup,
    /// Readiness confirmed at least once; serving traffic.
    Running,
    /// Termination requested; readiness fails, traffic still served.
    ShutdownRequested,
    /// Idle connections closed, new work refused, in-flight work draining.
    Draining,
    /// Drain complete or deadline hit; teardown hooks run, process exits.
    Final,
}

impl Phase {
    /// Short lowercase name used in log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Startup => "startup",
            Phase::Running => "running",
            Phase::ShutdownRequested => "shutdown-requested",
            Phase::Draining => "draining",
            Phase::Final => "final",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
