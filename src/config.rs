//! Operator configuration
//!
//! Read once at startup from environment variables. Every setting has a
//! default so the operator runs without any configuration at all.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default interval between data mover status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default time a single data mover resource may take to complete
pub const DEFAULT_MOVER_TIMEOUT: Duration = Duration::from_secs(600);

/// Default mount point of filesystem backup storage locations
pub const DEFAULT_BACKUP_STORE_ROOT: &str = "/data/backups";

/// Runtime configuration for the operator
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Port for the metrics and health HTTP server
    pub metrics_port: u16,
    /// Data mover poll interval
    pub poll_interval: Duration,
    /// Per-resource data mover completion timeout
    pub mover_timeout: Duration,
    /// Root directory for filesystem backup stores
    pub backup_store_root: PathBuf,
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            mover_timeout: DEFAULT_MOVER_TIMEOUT,
            backup_store_root: PathBuf::from(DEFAULT_BACKUP_STORE_ROOT),
            watch_namespace: None,
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let metrics_port = parse_var(&lookup, "METRICS_PORT")?.unwrap_or(defaults.metrics_port);

        let poll_interval = parse_var::<u64, _>(&lookup, "DATAMOVER_POLL_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);
        if poll_interval.is_zero() {
            return Err(Error::config(
                "DATAMOVER_POLL_INTERVAL_SECS must be greater than zero",
            ));
        }

        let mover_timeout = parse_var::<u64, _>(&lookup, "DATAMOVER_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.mover_timeout);
        if mover_timeout < poll_interval {
            return Err(Error::config(format!(
                "DATAMOVER_TIMEOUT_SECS ({}s) must not be shorter than the poll interval ({}s)",
                mover_timeout.as_secs(),
                poll_interval.as_secs()
            )));
        }

        let backup_store_root = lookup("BACKUP_STORE_ROOT")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.backup_store_root);

        let watch_namespace = lookup("WATCH_NAMESPACE").filter(|v| !v.is_empty());

        Ok(Self {
            metrics_port,
            poll_interval,
            mover_timeout,
            backup_store_root,
            watch_namespace,
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::config(format!("Invalid value '{}' for {}: {}", raw, key, e))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = OperatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.metrics_port, 8080);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.mover_timeout, Duration::from_secs(600));
        assert_eq!(config.backup_store_root, PathBuf::from("/data/backups"));
        assert!(config.watch_namespace.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = OperatorConfig::from_lookup(lookup(&[
            ("METRICS_PORT", "9090"),
            ("DATAMOVER_POLL_INTERVAL_SECS", "2"),
            ("DATAMOVER_TIMEOUT_SECS", "30"),
            ("WATCH_NAMESPACE", "velero"),
        ]))
        .unwrap();
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.mover_timeout, Duration::from_secs(30));
        assert_eq!(config.watch_namespace.as_deref(), Some("velero"));
    }

    #[test]
    fn invalid_number_is_config_error() {
        let err = OperatorConfig::from_lookup(lookup(&[("METRICS_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("METRICS_PORT"));
    }

    #[test]
    fn timeout_shorter_than_interval_is_rejected() {
        let err = OperatorConfig::from_lookup(lookup(&[
            ("DATAMOVER_POLL_INTERVAL_SECS", "10"),
            ("DATAMOVER_TIMEOUT_SECS", "5"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DATAMOVER_TIMEOUT_SECS"));
    }
}
