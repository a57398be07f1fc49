//! Session configuration.

use std::time::Duration;

use pg_io::PoolKey;

use crate::error::{Error, Result};

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Session settings.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Write SQL trace lines to stdout.
    pub sql_trace: bool,
    /// Write protocol message trace lines to stdout.
    pub protocol_trace: bool,
    /// Which shared I/O pool sessions run on.
    pub pool_kind: PoolKey,
    /// Thread budget of the I/O pool, used by the first session to acquire it.
    pub max_io_threads: usize,
    /// Time to establish the TCP connection.
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sql_trace: false,
            protocol_trace: false,
            pool_kind: PoolKey::default(),
            max_io_threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Config {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string.
    ///
    /// Format: `key=value` pairs separated by `;`. Keys are
    /// case-insensitive; unknown keys are ignored.
    ///
    /// ```
    /// use pg_client::Config;
    ///
    /// let config = Config::from_connection_string("sqlTrace=true;ioThreads=4").unwrap();
    /// assert!(config.sql_trace);
    /// assert_eq!(config.max_io_threads, 4);
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "sqltrace" => config.sql_trace = parse_bool(&key, value)?,
                "protocoltrace" => config.protocol_trace = parse_bool(&key, value)?,
                "iothreads" => {
                    config.max_io_threads = value
                        .parse()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| Error::Config(format!("invalid ioThreads: {value}")))?;
                }
                "iopool" => {
                    if value.is_empty() {
                        return Err(Error::Config("ioPool must not be empty".to_string()));
                    }
                    config.pool_kind = PoolKey::named(value);
                }
                "connecttimeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))?;
                    config.connect_timeout = Duration::from_secs(secs);
                }
                _ => tracing::debug!(key = %key, "ignoring unknown connection string key"),
            }
        }

        Ok(config)
    }

    /// Enable or disable SQL tracing.
    #[must_use]
    pub fn sql_trace(mut self, enabled: bool) -> Self {
        self.sql_trace = enabled;
        self
    }

    /// Enable or disable protocol message tracing.
    #[must_use]
    pub fn protocol_trace(mut self, enabled: bool) -> Self {
        self.protocol_trace = enabled;
        self
    }

    /// Select the shared I/O pool.
    #[must_use]
    pub fn pool_kind(mut self, key: PoolKey) -> Self {
        self.pool_kind = key;
        self
    }

    /// Set the I/O pool thread budget.
    #[must_use]
    pub fn max_io_threads(mut self, threads: usize) -> Self {
        self.max_io_threads = threads;
        self
    }

    /// Set the TCP connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") || value == "1" {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("no") || value == "0"
    {
        Ok(false)
    } else {
        Err(Error::Config(format!("invalid boolean for {key}: {value}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.sql_trace);
        assert!(!config.protocol_trace);
        assert_eq!(config.pool_kind, PoolKey::EVENT_LOOP);
        assert!(config.max_io_threads >= 1);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_connection_string_parsing() {
        let config = Config::from_connection_string(
            "sqlTrace=true; PROTOCOLTRACE=no ;ioThreads=4;ioPool=custom;connectTimeout=10;",
        )
        .unwrap();
        assert!(config.sql_trace);
        assert!(!config.protocol_trace);
        assert_eq!(config.max_io_threads, 4);
        assert_eq!(config.pool_kind, PoolKey::named("custom"));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_connection_string_rejects_malformed() {
        assert!(matches!(
            Config::from_connection_string("sqlTrace"),
            Err(Error::Config(_))
        ));
        assert!(Config::from_connection_string("sqlTrace=maybe").is_err());
        assert!(Config::from_connection_string("ioThreads=0").is_err());
        assert!(Config::from_connection_string("connectTimeout=soon").is_err());
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = Config::from_connection_string("applicationName=demo").unwrap();
        assert!(!config.sql_trace);
    }

    #[test]
    fn test_builder() {
        let config = Config::new()
            .sql_trace(true)
            .protocol_trace(true)
            .max_io_threads(2)
            .connect_timeout(Duration::from_secs(1));
        assert!(config.sql_trace && config.protocol_trace);
        assert_eq!(config.max_io_threads, 2);
    }
}
