//! Registry configuration.

use std::time::Duration;

/// Default base name of I/O worker threads.
pub const DEFAULT_THREAD_NAME: &str = "PG I/O";

/// Timing and naming for shared I/O pools.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RegistryConfig {
    /// Base name of worker threads; each thread is named `"<base> (<n>)"`.
    pub thread_name: String,

    /// Quiet period a pool keeps running after teardown begins.
    pub quiet_period: Duration,

    /// Upper bound on a graceful pool teardown, quiet period included.
    pub shutdown_timeout: Duration,

    /// How long [`wait_for_shutdown`](crate::SharedRegistry::wait_for_shutdown)
    /// waits on each pool's termination.
    pub entry_drain: Duration,

    /// How long `wait_for_shutdown` waits for worker threads and in-flight
    /// teardowns to finish.
    pub facility_drain: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            quiet_period: Duration::from_millis(10),
            shutdown_timeout: Duration::from_millis(100),
            entry_drain: Duration::from_millis(150),
            facility_drain: Duration::from_secs(5),
        }
    }
}

impl RegistryConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker thread base name.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the graceful teardown quiet period and cap.
    ///
    /// A cap shorter than the quiet period is raised to it.
    #[must_use]
    pub fn graceful_shutdown(mut self, quiet_period: Duration, timeout: Duration) -> Self {
        self.quiet_period = quiet_period;
        self.shutdown_timeout = timeout.max(quiet_period);
        self
    }

    /// Set the per-pool drain wait used at process shutdown.
    #[must_use]
    pub fn entry_drain(mut self, timeout: Duration) -> Self {
        self.entry_drain = timeout;
        self
    }

    /// Set the facility drain wait used at process shutdown.
    #[must_use]
    pub fn facility_drain(mut self, timeout: Duration) -> Self {
        self.facility_drain = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.thread_name, "PG I/O");
        assert_eq!(config.quiet_period, Duration::from_millis(10));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(100));
        assert_eq!(config.entry_drain, Duration::from_millis(150));
        assert_eq!(config.facility_drain, Duration::from_secs(5));
    }

    #[test]
    fn test_cap_not_below_quiet_period() {
        let config = RegistryConfig::new()
            .graceful_shutdown(Duration::from_millis(50), Duration::from_millis(10));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(50));
    }
}
