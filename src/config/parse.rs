//! Environment variable parsing utilities.

use super::ConfigError;

/// Get environment variable with default value.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get optional environment variable (None if empty or missing).
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

/// Parse environment variable as whole seconds, falling back to a default.
pub fn env_secs(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env_opt(key) {
        None => Ok(default),
        Some(value) => value.parse::<u64>().map_err(|e| ConfigError::Parse {
            key: key.to_string(),
            value,
            error: e.to_string(),
        }),
    }
}
