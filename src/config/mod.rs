//! Configuration module.
//!
//! Lifecycle timing is loaded from environment variables with builder-style
//! overrides for embedding and tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_lifecycle::LifecycleConfig;
//!
//! let config = LifecycleConfig::from_env()?;
//! println!("Drain deadline: {:?}", config.drain_timeout);
//! ```

mod error;
mod parse;

pub use error::ConfigError;

use std::collections::HashSet;
use std::time::Duration;

use parse::{env_or, env_secs};

// Default values as constants
const DEFAULT_READY_PROBE_INTERVAL_SECS: u64 = 30;
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 540;
const DEFAULT_CONNECTION_POLL_MS: u64 = 1000;
const DEFAULT_FORCE_EXIT_GRACE_MS: u64 = 5000;

const DEFAULT_READY_PATH: &str = "/api/probe/ready";
const DEFAULT_LIVE_PATH: &str = "/api/probe/live";
const DEFAULT_TEST_PATH: &str = "/api/probe/test";

/// Probe endpoint paths. Setting a path to the empty string disables the
/// endpoint entirely: it is never routed and never counted as health-check
/// traffic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbePaths {
    /// Readiness probe path.
    pub ready: String,
    /// Liveness probe path.
    pub live: String,
    /// Latency-test probe path.
    pub test: String,
}

impl Default for ProbePaths {
    fn default() -> Self {
        Self {
            ready: DEFAULT_READY_PATH.to_string(),
            live: DEFAULT_LIVE_PATH.to_string(),
            test: DEFAULT_TEST_PATH.to_string(),
        }
    }
}

impl ProbePaths {
    /// The set of enabled probe paths, used to classify incoming requests
    /// as health-check traffic.
    pub fn health_check_urls(&self) -> HashSet<String> {
        [&self.ready, &self.live, &self.test]
            .into_iter()
            .filter(|p| !p.is_empty())
            .cloned()
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (key, path) in [
            ("probe_paths.ready", &self.ready),
            ("probe_paths.live", &self.live),
            ("probe_paths.test", &self.test),
        ] {
            if !path.is_empty() && !path.starts_with('/') {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    message: format!("path '{}' must start with '/'", path),
                });
            }
        }
        Ok(())
    }
}

/// Lifecycle timing and mode configuration.
#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    /// How long readiness keeps failing before the drain phase starts.
    /// Derived as 1.5x the readiness probe interval so the load balancer
    /// has seen at least one failed probe before connections are refused.
    pub phase1_duration: Duration,
    /// Hard deadline for the drain phase.
    pub drain_timeout: Duration,
    /// Interval between drain-gate polls.
    pub connection_poll: Duration,
    /// Grace period after teardown hooks start before the process is
    /// terminated unconditionally.
    pub force_exit_grace: Duration,
    /// Development mode: an unrecoverable fault exits the process
    /// immediately instead of waiting for the platform to restart it.
    pub dev_mode: bool,
    /// Probe endpoint paths.
    pub probe_paths: ProbePaths,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            phase1_duration: Duration::from_millis(DEFAULT_READY_PROBE_INTERVAL_SECS * 1500),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
            connection_poll: Duration::from_millis(DEFAULT_CONNECTION_POLL_MS),
            force_exit_grace: Duration::from_millis(DEFAULT_FORCE_EXIT_GRACE_MS),
            dev_mode: true,
            probe_paths: ProbePaths::default(),
        }
    }
}

impl LifecycleConfig {
    /// Load configuration from environment variables.
    ///
    /// - `READYPROBE_INTERVAL`: readiness probe period in seconds
    ///   (default 30); the pre-drain delay is 1.5x this value.
    /// - `SHUTDOWN_TIMEOUT`: drain deadline in seconds (default 540).
    /// - `NODE_ENV`: anything other than `"production"` enables dev mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        let interval_secs = env_secs("READYPROBE_INTERVAL", DEFAULT_READY_PROBE_INTERVAL_SECS)?;
        let drain_secs = env_secs("SHUTDOWN_TIMEOUT", DEFAULT_DRAIN_TIMEOUT_SECS)?;
        let dev_mode = env_or("NODE_ENV", "") != "production";

        Ok(Self {
            phase1_duration: Duration::from_millis(interval_secs * 1500),
            drain_timeout: Duration::from_secs(drain_secs),
            dev_mode,
            ..Self::default()
        })
    }

    /// Set the pre-drain delay from a readiness probe interval.
    pub fn with_ready_probe_interval(mut self, interval: Duration) -> Self {
        self.phase1_duration = interval + interval / 2;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_connection_poll(mut self, poll: Duration) -> Self {
        self.connection_poll = poll;
        self
    }

    pub fn with_force_exit_grace(mut self, grace: Duration) -> Self {
        self.force_exit_grace = grace;
        self
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    /// Set probe endpoint paths. Fails if a non-empty path does not start
    /// with `/`.
    pub fn with_probe_paths(mut self, paths: ProbePaths) -> Result<Self, ConfigError> {
        paths.validate()?;
        self.probe_paths = paths;
        Ok(self)
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Lifecycle configuration:");
        info!("Pre-drain delay: {:?}", self.phase1_duration);
        info!("Drain timeout: {:?}", self.drain_timeout);
        info!("Connection poll: {:?}", self.connection_poll);
        info!("Force-exit grace: {:?}", self.force_exit_grace);
        info!("Dev mode: {}", self.dev_mode);
    }
}
