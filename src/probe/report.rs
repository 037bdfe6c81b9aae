//! Probe decision type.
//!
//! The status code is the machine contract; the message is a fixed
//! human-readable reason so framework adapters need no translation table.

use http::StatusCode;

pub(crate) const MSG_READY: &str = "ready";
pub(crate) const MSG_ALIVE: &str = "alive";
pub(crate) const MSG_CLOSING: &str = "Service is closing";
pub(crate) const MSG_NO_SERVERS: &str = "Server not ready";
pub(crate) const MSG_CHECKS_FAILED: &str = "Ready check(s) failed";
pub(crate) const MSG_NOT_LISTENING: &str = "HTTP server not ready";

/// Outcome of a readiness or liveness evaluation.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// Canonical HTTP status: 200 on success, 503 on failure.
    pub status: StatusCode,
    /// Human-readable reason.
    pub message: String,
}

impl ProbeReport {
    pub(crate) fn ok(message: &str) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.to_string(),
        }
    }

    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }

    /// Whether the probe passed.
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}
