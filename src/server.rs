//! Probe HTTP surface.
//!
//! A small HTTP/1.1 server exposing the three probe endpoints for the
//! platform to poll. Bodies are plain text; the status code is the only
//! machine contract.
//!
//! | Path (default)     | 200 body | failure |
//! |--------------------|----------|---------|
//! | `/api/probe/ready` | `ready`  | `503` + reason, `500` on internal error |
//! | `/api/probe/live`  | `alive`  | `503` + `Unrecoverable error: <msg>` |
//! | `/api/probe/test`  | streams `Waiting for N ...\n` then `Done` after `t` ms | none |

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming as IncomingBody};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use crate::clock;
use crate::config::ProbePaths;
use crate::orchestrator::Orchestrator;

/// Default wait for the latency-test endpoint.
const DEFAULT_TEST_WAIT_MS: u64 = 10_000;

type ProbeBody = BoxBody<Bytes, Infallible>;

/// HTTP server for the probe endpoints.
pub struct ProbeServer {
    listener: TcpListener,
    orchestrator: Arc<Orchestrator>,
    paths: ProbePaths,
}

impl ProbeServer {
    /// Bind the probe listener. Use port 0 for an ephemeral port.
    pub async fn bind(
        addr: SocketAddr,
        orchestrator: Arc<Orchestrator>,
        paths: ProbePaths,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            orchestrator,
            paths,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve probe requests until the process exits.
    pub async fn serve(self) -> std::io::Result<()> {
        loop {
            let (stream, _) = self.listener.accept().await?;
            let _ = stream.set_nodelay(true);
            let orchestrator = Arc::clone(&self.orchestrator);
            let paths = self.paths.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let orchestrator = Arc::clone(&orchestrator);
                    let paths = paths.clone();
                    async move { handle_probe_request(req, orchestrator, paths).await }
                });

                let io = TokioIo::new(stream);
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    }
}

/// Bind and serve in one call.
pub async fn run_probe_server(
    addr: SocketAddr,
    orchestrator: Arc<Orchestrator>,
    paths: ProbePaths,
) -> std::io::Result<()> {
    ProbeServer::bind(addr, orchestrator, paths)
        .await?
        .serve()
        .await
}

async fn handle_probe_request(
    req: Request<IncomingBody>,
    orchestrator: Arc<Orchestrator>,
    paths: ProbePaths,
) -> Result<Response<ProbeBody>, Infallible> {
    if req.method() != Method::GET {
        return Ok(plain_text(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed",
        ));
    }

    let path = req.uri().path();

    let response = if enabled(&paths.ready, path) {
        readiness_response(&orchestrator).await
    } else if enabled(&paths.live, path) {
        let report = orchestrator.check_liveness();
        plain_text(report.status, &report.message)
    } else if enabled(&paths.test, path) {
        test_response(req.uri().query())
    } else {
        plain_text(StatusCode::NOT_FOUND, "Not Found")
    };

    Ok(response)
}

/// Evaluate readiness, containing panics from user checks at this
/// boundary: they surface as `500 Unexpected error` instead of tearing
/// down the connection task.
async fn readiness_response(orchestrator: &Arc<Orchestrator>) -> Response<ProbeBody> {
    let evaluation = std::panic::AssertUnwindSafe(orchestrator.check_readiness())
        .catch_unwind()
        .await;

    match evaluation {
        Ok(report) => plain_text(report.status, &report.message),
        Err(panic) => {
            let detail = panic_message(panic);
            error!(detail = %detail, "Readiness evaluation failed");
            plain_text(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Unexpected error: {}", detail),
            )
        }
    }
}

/// Latency-test endpoint: emits a banner immediately and `Done` after the
/// requested wait, so probe plumbing and timeouts can be exercised
/// end-to-end.
fn test_response(query: Option<&str>) -> Response<ProbeBody> {
    let wait_ms = query
        .and_then(|q| query_param(q, "t"))
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TEST_WAIT_MS);
    debug!(wait_ms, "Probe test request");

    let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, Infallible>>(2);
    tokio::spawn(async move {
        let banner = format!("Waiting for {} ...\n", wait_ms);
        if tx.send(Ok(Frame::data(Bytes::from(banner)))).await.is_err() {
            return;
        }
        clock::sleep(Duration::from_millis(wait_ms)).await;
        let _ = tx.send(Ok(Frame::data(Bytes::from_static(b"Done")))).await;
    });

    let body = StreamBody::new(ReceiverStream::new(rx)).boxed();
    match Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain")
        .body(body)
    {
        Ok(response) => response,
        Err(_) => plain_text(StatusCode::INTERNAL_SERVER_ERROR, "response build failed"),
    }
}

fn enabled(configured: &str, path: &str) -> bool {
    !configured.is_empty() && configured == path
}

fn plain_text(status: StatusCode, body: &str) -> Response<ProbeBody> {
    let full = Full::new(Bytes::from(body.to_string())).boxed();
    match Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(full)
    {
        Ok(response) => response,
        // Static parts; construction cannot fail in practice.
        Err(_) => Response::new(Full::new(Bytes::new()).boxed()),
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then_some(v)
    })
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
