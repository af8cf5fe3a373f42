//! # Loader Configuration
//!
//! Defaults cover a local run against the standard table. Every knob can be
//! overridden from the environment:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `BULKLOAD_TENANT` | `tenant` | `default_tenant` |
//! | `BULKLOAD_TABLE` | `table` | `bigdata` |
//! | `BULKLOAD_QUEUE_CAPACITY` | `queue_capacity` | 1000 |
//! | `BULKLOAD_PROGRESS_INTERVAL` | `progress_interval` | 10000 |
//! | `BULKLOAD_MAX_RETRIES` | `retry.max_retries` | 16 |
//! | `BULKLOAD_BASE_BACKOFF_MS` | `retry.base_backoff` | 2 |
//! | `BULKLOAD_MAX_BACKOFF_MS` | `retry.max_backoff` | 500 |
//! | `BULKLOAD_OP_TIMEOUT_MS` | `retry.op_timeout` | 10000 |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_TENANT: &str = "default_tenant";
pub const DEFAULT_TABLE: &str = "bigdata";

/// Operations allowed in flight at once.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Records between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

/// Rejected conditional writes tolerated per record.
pub const DEFAULT_MAX_RETRIES: u32 = 16;

pub const DEFAULT_BASE_BACKOFF_MS: u64 = 2;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 500;
pub const DEFAULT_OP_TIMEOUT_MS: u64 = 10_000;

const ENV_PREFIX: &str = "BULKLOAD_";

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounds on the compare-and-swap loop of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt before giving up.
    pub max_retries: u32,

    /// Backoff before the first retry; doubles on each retry after that.
    pub base_backoff: Duration,

    /// Upper bound of a single backoff.
    pub max_backoff: Duration,

    /// Deadline of a single storage operation.
    pub op_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            op_timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

// =============================================================================
// Loader Configuration
// =============================================================================

/// Configuration of a [`BulkLoader`](crate::loader::BulkLoader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    pub tenant: String,
    pub table: String,
    pub queue_capacity: usize,
    pub progress_interval: u64,
    pub retry: RetryPolicy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            tenant: DEFAULT_TENANT.to_string(),
            table: DEFAULT_TABLE.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

impl LoaderConfig {
    /// Defaults overlaid with `BULKLOAD_*` environment variables.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] if a variable is set but unparsable or zero.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |suffix: &str| {
            let name = format!("{}{}", ENV_PREFIX, suffix);
            lookup(&name).map(|value| (name, value))
        };

        if let Some((_, tenant)) = var("TENANT") {
            config.tenant = non_empty("BULKLOAD_TENANT", tenant)?;
        }
        if let Some((_, table)) = var("TABLE") {
            config.table = non_empty("BULKLOAD_TABLE", table)?;
        }
        if let Some((name, value)) = var("QUEUE_CAPACITY") {
            config.queue_capacity = positive(&name, &value)?;
        }
        if let Some((name, value)) = var("PROGRESS_INTERVAL") {
            config.progress_interval = positive(&name, &value)?;
        }
        if let Some((name, value)) = var("MAX_RETRIES") {
            config.retry.max_retries = parse(&name, &value)?;
        }
        if let Some((name, value)) = var("BASE_BACKOFF_MS") {
            config.retry.base_backoff = Duration::from_millis(positive(&name, &value)?);
        }
        if let Some((name, value)) = var("MAX_BACKOFF_MS") {
            config.retry.max_backoff = Duration::from_millis(positive(&name, &value)?);
        }
        if let Some((name, value)) = var("OP_TIMEOUT_MS") {
            config.retry.op_timeout = Duration::from_millis(positive(&name, &value)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks values that would stall or misconfigure a load.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Schema("queue capacity must be at least 1".into()));
        }
        if self.retry.op_timeout.is_zero() {
            return Err(Error::Schema("operation timeout must be positive".into()));
        }
        if self.retry.max_backoff < self.retry.base_backoff {
            return Err(Error::Schema(format!(
                "max backoff {:?} is below base backoff {:?}",
                self.retry.max_backoff, self.retry.base_backoff
            )));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Schema(format!("invalid {}='{}': {}", name, value, e)))
}

fn positive<T: FromStr + Default + PartialEq>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let parsed: T = parse(name, value)?;
    if parsed == T::default() {
        return Err(Error::Schema(format!("{} must be greater than zero", name)));
    }
    Ok(parsed)
}

fn non_empty(name: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::Schema(format!("{} must not be empty", name)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.tenant, "default_tenant");
        assert_eq!(config.table, "bigdata");
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.retry.max_retries, 16);
        assert_eq!(config.retry.op_timeout, Duration::from_secs(10));
        config.validate().unwrap();
    }

    #[test]
    fn test_overrides() {
        let config = LoaderConfig::from_lookup(lookup(&[
            ("BULKLOAD_TENANT", "acme"),
            ("BULKLOAD_QUEUE_CAPACITY", "8"),
            ("BULKLOAD_MAX_RETRIES", "0"),
            ("BULKLOAD_OP_TIMEOUT_MS", " 250 "),
        ]))
        .unwrap();
        assert_eq!(config.tenant, "acme");
        assert_eq!(config.table, "bigdata");
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.op_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_bad_values() {
        for (name, value) in [
            ("BULKLOAD_QUEUE_CAPACITY", "0"),
            ("BULKLOAD_QUEUE_CAPACITY", "many"),
            ("BULKLOAD_OP_TIMEOUT_MS", "-1"),
            ("BULKLOAD_TABLE", "  "),
            ("BULKLOAD_BASE_BACKOFF_MS", "1000"),
        ] {
            let result = LoaderConfig::from_lookup(lookup(&[(name, value)]));
            assert!(matches!(result, Err(Error::Schema(_))), "{}={}", name, value);
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(2));
        assert_eq!(retry.backoff(2), Duration::from_millis(4));
        assert_eq!(retry.backoff(5), Duration::from_millis(32));
        assert_eq!(retry.backoff(20), Duration::from_millis(500));
        assert_eq!(retry.backoff(u32::MAX), Duration::from_millis(500));
    }
}
