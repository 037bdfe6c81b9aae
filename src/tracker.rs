//! Per-server connection tracking.
//!
//! Each hosted server gets a [`ServerTracker`]: a side table of live
//! connections keyed by an opaque id, with every record tagged idle /
//! active / health-check. The tracker gives the shutdown sequencer a
//! reliable count of connections that must drain, and enforces graceful
//! behaviour on in-flight traffic once shutdown starts (idle connections
//! die, new non-probe requests are refused, keep-alive reuse is denied).
//!
//! The server adapter feeds three event channels into the tracker:
//! connection open, request begin/finish, and connection close. Nothing
//! else may mutate the per-connection flags.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::hooks::{self, BoxError, SharedSink};

/// Opaque connection identifier. Assigned once per connection and never
/// reassigned.
pub type ConnectionId = u64;

/// Capability to force-close a tracked connection's transport.
pub type DestroyFn = Arc<dyn Fn() + Send + Sync>;

/// Body the adapter must send when a request is refused during shutdown.
pub const CLOSING_BODY: &str = "Closing";

/// What the server adapter should do with a request that just began.
pub enum RequestOutcome {
    /// Serve the request normally.
    Serve {
        /// The request targets a probe endpoint and is excluded from the
        /// active-connection drain gate.
        health_check: bool,
    },
    /// Shutting down: answer `503` with body [`CLOSING_BODY`] and a
    /// `Connection: close` header, then invoke `destroy` once the
    /// response has flushed. The tracker has already dropped the record.
    Reject {
        destroy: Option<DestroyFn>,
    },
}

/// What the orchestrator requires of a hosted server.
pub trait HostedServer: Send + Sync {
    /// Whether the server is currently accepting connections.
    fn is_listening(&self) -> bool;

    /// Stop accepting new connections. Existing connections are the
    /// tracker's concern.
    fn stop_listening(&self) -> Result<(), BoxError>;
}

struct ConnectionRecord {
    /// True from accept until a request begins; back to true on response
    /// finish.
    idle: bool,
    /// Set from the matched URL each time a request begins.
    is_health_check: bool,
    destroy: DestroyFn,
}

/// Registry of live connections for one hosted server.
pub struct ServerTracker {
    server: Arc<dyn HostedServer>,
    connections: Mutex<HashMap<ConnectionId, ConnectionRecord>>,
    health_check_urls: HashSet<String>,
    shutting_down: AtomicBool,
    next_id: AtomicU64,
    sink: SharedSink,
}

impl ServerTracker {
    pub(crate) fn new(
        server: Arc<dyn HostedServer>,
        health_check_urls: HashSet<String>,
        sink: SharedSink,
    ) -> Self {
        Self {
            server,
            connections: Mutex::new(HashMap::new()),
            health_check_urls,
            shutting_down: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            sink,
        }
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionRecord>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a newly accepted connection. `destroy` must force-close
    /// the underlying transport when invoked.
    pub fn on_connection<F>(&self, destroy: F) -> ConnectionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.locked().insert(
            id,
            ConnectionRecord {
                idle: true,
                is_health_check: false,
                destroy: Arc::new(destroy),
            },
        );
        id
    }

    /// A request began on connection `id` for `path`.
    pub fn on_request(&self, id: ConnectionId, path: &str) -> RequestOutcome {
        let health_check = self.health_check_urls.contains(path);
        let shutting_down = self.is_shutting_down();

        let mut connections = self.locked();
        if !connections.contains_key(&id) {
            drop(connections);
            let err: BoxError = format!("request on untracked connection {}", id).into();
            hooks::emit(&self.sink, "connection tracker", err.as_ref());
            return if shutting_down && !health_check {
                RequestOutcome::Reject { destroy: None }
            } else {
                RequestOutcome::Serve { health_check }
            };
        }

        if shutting_down && !health_check {
            // Refused requests leave the table immediately; the close
            // event for the destroyed socket finds nothing.
            let destroy = connections.remove(&id).map(|record| record.destroy);
            return RequestOutcome::Reject { destroy };
        }

        if let Some(record) = connections.get_mut(&id) {
            record.is_health_check = health_check;
            record.idle = false;
        }
        RequestOutcome::Serve { health_check }
    }

    /// The response for connection `id` finished flushing.
    pub fn on_response_finished(&self, id: ConnectionId) {
        let destroy = {
            let mut connections = self.locked();
            match connections.get_mut(&id) {
                Some(record) => {
                    record.idle = true;
                    // Deny keep-alive reuse during shutdown; the close
                    // event removes the record.
                    self.is_shutting_down().then(|| Arc::clone(&record.destroy))
                }
                None => None,
            }
        };
        if let Some(destroy) = destroy {
            destroy();
        }
    }

    /// Connection `id` closed; drop its record.
    pub fn on_close(&self, id: ConnectionId) {
        self.locked().remove(&id);
    }

    /// Enter drain mode: refuse new non-probe requests and destroy every
    /// currently idle connection.
    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let doomed: Vec<DestroyFn> = {
            let mut connections = self.locked();
            let mut doomed = Vec::new();
            connections.retain(|_, record| {
                if record.idle {
                    doomed.push(Arc::clone(&record.destroy));
                    false
                } else {
                    true
                }
            });
            doomed
        };
        for destroy in doomed {
            destroy();
        }
    }

    /// Tear everything down: stop listening and destroy every remaining
    /// connection regardless of state. A server-close failure is reported
    /// to the caller but never skips the connection teardown.
    pub fn force_close(&self) -> Result<(), BoxError> {
        self.shutting_down.store(true, Ordering::SeqCst);
        let stop_result = if self.server.is_listening() {
            self.server.stop_listening()
        } else {
            Ok(())
        };
        let doomed: Vec<DestroyFn> = {
            let mut connections = self.locked();
            connections.drain().map(|(_, record)| record.destroy).collect()
        };
        for destroy in doomed {
            destroy();
        }
        stop_result
    }

    /// Total tracked connections.
    pub fn connection_count(&self) -> usize {
        self.locked().len()
    }

    /// Connections currently serving a non-probe request. This is the
    /// count the drain gate waits on.
    pub fn active_connection_count(&self) -> usize {
        self.locked()
            .values()
            .filter(|r| !r.idle && !r.is_health_check)
            .count()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.server.is_listening()
    }
}
