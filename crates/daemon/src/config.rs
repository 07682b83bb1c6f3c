//! Daemon configuration from `ORDERQ_*` environment variables

use orderq_api_rpc::server::{DEFAULT_RPC_HOST, DEFAULT_RPC_PORT};
use orderq_core::application::worker::constants::DEFAULT_LEASE_MS;
use orderq_core::application::RedeliveryDelay;
use orderq_core::domain::{Destinations, DEFAULT_DEAD_LETTER_QUEUE, DEFAULT_MAIN_QUEUE};
use orderq_core::error::AppError;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_DB_PATH: &str = "~/.orderq/broker.db";
/// Matches the common broker default of six redeliveries
pub const DEFAULT_MAX_REDELIVERIES: u32 = 6;
pub const DEFAULT_REDELIVERY_DELAY_MS: i64 = 1_000;
pub const DEFAULT_REDELIVERY_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_REDELIVERY_MAX_DELAY_MS: i64 = 60_000;
pub const DEFAULT_WORKERS: usize = 2;
/// Upper bound for the lease and for redelivery delays (one day)
pub const MAX_DURATION_MS: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}' (expected pretty or json)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub destinations: Destinations,
    pub max_redeliveries: u32,
    pub redelivery_delay_ms: i64,
    pub redelivery_multiplier: f64,
    pub redelivery_max_delay_ms: i64,
    pub workers: usize,
    pub lease_ms: i64,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl DaemonConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; unset keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("ORDERQ_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_path = PathBuf::from(shellexpand::tilde(&db_path).into_owned());

        let main = lookup("ORDERQ_MAIN_QUEUE").unwrap_or_else(|| DEFAULT_MAIN_QUEUE.to_string());
        let dead_letter =
            lookup("ORDERQ_DLQ").unwrap_or_else(|| DEFAULT_DEAD_LETTER_QUEUE.to_string());
        let destinations = Destinations::new(main, dead_letter)
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config = Self {
            db_path,
            rpc_host: lookup("ORDERQ_RPC_HOST").unwrap_or_else(|| DEFAULT_RPC_HOST.to_string()),
            rpc_port: parse_var(&lookup, "ORDERQ_RPC_PORT", DEFAULT_RPC_PORT)?,
            destinations,
            max_redeliveries: parse_var(&lookup, "ORDERQ_MAX_REDELIVERIES", DEFAULT_MAX_REDELIVERIES)?,
            redelivery_delay_ms: parse_var(
                &lookup,
                "ORDERQ_REDELIVERY_DELAY_MS",
                DEFAULT_REDELIVERY_DELAY_MS,
            )?,
            redelivery_multiplier: parse_var(
                &lookup,
                "ORDERQ_REDELIVERY_MULTIPLIER",
                DEFAULT_REDELIVERY_MULTIPLIER,
            )?,
            redelivery_max_delay_ms: parse_var(
                &lookup,
                "ORDERQ_REDELIVERY_MAX_DELAY_MS",
                DEFAULT_REDELIVERY_MAX_DELAY_MS,
            )?,
            workers: parse_var(&lookup, "ORDERQ_WORKERS", DEFAULT_WORKERS)?,
            lease_ms: parse_var(&lookup, "ORDERQ_LEASE_MS", DEFAULT_LEASE_MS)?,
            log_format: parse_var(&lookup, "ORDERQ_LOG_FORMAT", LogFormat::Pretty)?,
            log_dir: lookup("ORDERQ_LOG_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(|dir| PathBuf::from(shellexpand::tilde(&dir).into_owned())),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.workers == 0 {
            return Err(AppError::Config("ORDERQ_WORKERS must be at least 1".to_string()));
        }
        if self.lease_ms <= 0 || self.lease_ms > MAX_DURATION_MS {
            return Err(AppError::Config(format!(
                "ORDERQ_LEASE_MS must be in 1..={}",
                MAX_DURATION_MS
            )));
        }
        for (key, value) in [
            ("ORDERQ_REDELIVERY_DELAY_MS", self.redelivery_delay_ms),
            ("ORDERQ_REDELIVERY_MAX_DELAY_MS", self.redelivery_max_delay_ms),
        ] {
            if !(0..=MAX_DURATION_MS).contains(&value) {
                return Err(AppError::Config(format!(
                    "{} must be in 0..={}",
                    key, MAX_DURATION_MS
                )));
            }
        }
        if !self.redelivery_multiplier.is_finite() || self.redelivery_multiplier < 1.0 {
            return Err(AppError::Config(
                "ORDERQ_REDELIVERY_MULTIPLIER must be a finite value >= 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn redelivery_delay(&self) -> RedeliveryDelay {
        RedeliveryDelay::new(
            self.redelivery_delay_ms,
            self.redelivery_multiplier,
            self.redelivery_max_delay_ms,
        )
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{}={:?}: {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<DaemonConfig, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DaemonConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.destinations.main, "orders.queue");
        assert_eq!(config.destinations.dead_letter, "ActiveMQ.DLQ");
        assert_eq!(config.max_redeliveries, 6);
        assert_eq!(config.rpc_host, "127.0.0.1");
        assert_eq!(config.rpc_port, 9531);
        assert_eq!(config.workers, 2);
        assert_eq!(config.lease_ms, 30_000);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.log_dir.is_none());
        assert!(config.db_path.ends_with(".orderq/broker.db"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("ORDERQ_MAIN_QUEUE", "orders.in"),
            ("ORDERQ_DLQ", "orders.dead"),
            ("ORDERQ_MAX_REDELIVERIES", "3"),
            ("ORDERQ_WORKERS", "4"),
            ("ORDERQ_LOG_FORMAT", "JSON"),
            ("ORDERQ_DB_PATH", "/tmp/orderq-test.db"),
            ("ORDERQ_REDELIVERY_DELAY_MS", "0"),
        ])
        .unwrap();
        assert_eq!(config.destinations.main, "orders.in");
        assert_eq!(config.destinations.dead_letter, "orders.dead");
        assert_eq!(config.max_redeliveries, 3);
        assert_eq!(config.workers, 4);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.db_path, PathBuf::from("/tmp/orderq-test.db"));
        assert_eq!(config.redelivery_delay().delay_ms(3), 0);
    }

    #[test]
    fn test_unparseable_value_is_config_error() {
        let err = config_from(&[("ORDERQ_MAX_REDELIVERIES", "six")]).unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("ORDERQ_MAX_REDELIVERIES")));

        let err = config_from(&[("ORDERQ_LOG_FORMAT", "xml")]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(config_from(&[("ORDERQ_WORKERS", "0")]).is_err());
        assert!(config_from(&[("ORDERQ_LEASE_MS", "0")]).is_err());
        assert!(config_from(&[("ORDERQ_REDELIVERY_MULTIPLIER", "0.5")]).is_err());
        assert!(config_from(&[("ORDERQ_DLQ", "orders.queue")]).is_err());
        assert!(config_from(&[("ORDERQ_MAIN_QUEUE", "")]).is_err());
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let err = config_from(&[("ORDERQ_LEASE_MS", "9223372036854775807")]).unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("ORDERQ_LEASE_MS")));

        let err =
            config_from(&[("ORDERQ_REDELIVERY_MAX_DELAY_MS", "9223372036854775807")]).unwrap_err();
        assert!(
            matches!(err, AppError::Config(ref msg) if msg.contains("ORDERQ_REDELIVERY_MAX_DELAY_MS"))
        );

        assert!(config_from(&[("ORDERQ_REDELIVERY_DELAY_MS", "86400001")]).is_err());
        let config = config_from(&[("ORDERQ_LEASE_MS", "86400000")]).unwrap();
        assert_eq!(config.lease_ms, MAX_DURATION_MS);
    }
}
