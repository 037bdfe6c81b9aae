//! Tracing subscriber bootstrap for host binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install an env-filtered fmt subscriber. Hosts embedding the
/// orchestrator call this once at startup; the default filter is
/// `tokio_lifecycle=info`.
pub fn init() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokio_lifecycle=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
