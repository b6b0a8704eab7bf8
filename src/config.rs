//! Runtime configuration.
//!
//! Configuration is plain serde data so it can be embedded in whatever file
//! format the hosting process already loads.

use serde::Deserialize;
use std::time::Duration;

/// Configuration for the worker pool that runs asynchronous actions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PoolConfig {
    /// Number of worker threads.
    #[serde(default = "PoolConfig::default_workers")]
    pub workers: usize,

    /// Whether `stop` runs the remaining queued tasks before joining.
    #[serde(default = "PoolConfig::default_run_until_queue_empty")]
    pub run_until_queue_empty: bool,

    /// Prefix of worker thread names.
    #[serde(default = "PoolConfig::default_thread_name")]
    pub thread_name: String,

    /// How long a resource shutdown waits for in-flight actions, in milliseconds.
    #[serde(default = "PoolConfig::default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

impl PoolConfig {
    const fn default_workers() -> usize {
        4
    }

    const fn default_run_until_queue_empty() -> bool {
        true
    }

    fn default_thread_name() -> String {
        "actionable-worker".to_string()
    }

    const fn default_shutdown_timeout() -> u64 {
        10_000
    }

    /// Builder-style override of the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Get the shutdown timeout as a `Duration`.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Reject configurations the pool cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("worker pool needs at least one worker".to_string());
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
            run_until_queue_empty: Self::default_run_until_queue_empty(),
            thread_name: Self::default_thread_name(),
            shutdown_timeout_ms: Self::default_shutdown_timeout(),
        }
    }
}
