//! Checkout configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! All optional:
//! - `CHECKOUT_DB_PATH` - sled database directory (default: checkout.db)
//! - `CHECKOUT_LOCK_LEASE_MS` - per-user checkout lease (default: 2000)
//! - `CHECKOUT_LOCK_RETRY_COUNT` - extra acquisition attempts while the lock is busy (default: 10)
//! - `CHECKOUT_LOCK_RETRY_DELAY_MS` - pause between attempts (default: 200)
//! - `CHECKOUT_MILESTONE_INTERVAL` - every Nth order earns a coupon (default: 5)
//! - `CHECKOUT_MILESTONE_PERCENT` - discount of the milestone coupon (default: 10)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use super::lock::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub db_path: PathBuf,
    pub lock_lease: Duration,
    pub lock_retry: RetryPolicy,
    pub milestone_interval: u64,
    pub milestone_percent: u8,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("checkout.db"),
            lock_lease: Duration::from_millis(2_000),
            lock_retry: RetryPolicy::default(),
            milestone_interval: 5,
            milestone_percent: 10,
        }
    }
}

impl CheckoutConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = lookup("CHECKOUT_DB_PATH").map_or(defaults.db_path, PathBuf::from);
        let lease_ms = parse_or(&lookup, "CHECKOUT_LOCK_LEASE_MS", 2_000u64)?;
        let retry_count = parse_or(
            &lookup,
            "CHECKOUT_LOCK_RETRY_COUNT",
            defaults.lock_retry.retry_count,
        )?;
        let retry_delay_ms = parse_or(&lookup, "CHECKOUT_LOCK_RETRY_DELAY_MS", 200u64)?;
        let milestone_interval = parse_or(
            &lookup,
            "CHECKOUT_MILESTONE_INTERVAL",
            defaults.milestone_interval,
        )?;
        let milestone_percent = parse_or(
            &lookup,
            "CHECKOUT_MILESTONE_PERCENT",
            defaults.milestone_percent,
        )?;

        if lease_ms == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "CHECKOUT_LOCK_LEASE_MS".into(),
                "lease must be longer than zero".into(),
            ));
        }
        if milestone_interval == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "CHECKOUT_MILESTONE_INTERVAL".into(),
                "interval must be at least 1".into(),
            ));
        }
        if milestone_percent > 100 {
            return Err(ConfigError::InvalidEnvVar(
                "CHECKOUT_MILESTONE_PERCENT".into(),
                format!("{milestone_percent} is above 100"),
            ));
        }

        Ok(Self {
            db_path,
            lock_lease: Duration::from_millis(lease_ms),
            lock_retry: RetryPolicy {
                retry_count,
                retry_delay: Duration::from_millis(retry_delay_ms),
            },
            milestone_interval,
            milestone_percent,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidEnvVar(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}
