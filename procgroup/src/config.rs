//! Runtime-configurable parameters for process groups.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `PROCGROUP_`) or by constructing a custom `ProcessGroupConfig`.

use std::time::Duration;

/// Tuning parameters shared by every process group of a [`CommContext`](crate::CommContext).
#[derive(Debug, Clone)]
pub struct ProcessGroupConfig {
    /// How long a non-root rank waits for rank 0 to publish a unique id.
    pub store_timeout: Duration,

    /// Whether `WorkHandle::wait` also blocks the host until the device work
    /// retires. When false, `wait` only orders the caller's compute streams
    /// after the collective.
    pub blocking_wait: bool,
}

impl Default for ProcessGroupConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(300),
            blocking_wait: true,
        }
    }
}

impl ProcessGroupConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `PROCGROUP_STORE_TIMEOUT_SECS`
    /// - `PROCGROUP_BLOCKING_WAIT` (`0`/`1`/`true`/`false`)
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("PROCGROUP_STORE_TIMEOUT_SECS") {
            if let Ok(s) = v.parse::<u64>() {
                cfg.store_timeout = Duration::from_secs(s);
            }
        }
        if let Ok(v) = std::env::var("PROCGROUP_BLOCKING_WAIT") {
            if let Some(b) = parse_flag(&v) {
                cfg.blocking_wait = b;
            }
        }

        cfg
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_blocking_wait(mut self, blocking_wait: bool) -> Self {
        self.blocking_wait = blocking_wait;
        self
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
