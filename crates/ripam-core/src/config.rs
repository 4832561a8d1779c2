//! Runtime configuration
//!
//! Settings come from `RIPAM_*` environment variables, with defaults suitable
//! for a single-node deployment. The CLI layers its flags on top.

use ripam_cidr::GenerationPolicy;
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

pub const ENV_DATA_DIR: &str = "RIPAM_DATA_DIR";
pub const ENV_BIND: &str = "RIPAM_BIND";
pub const ENV_MAX_GENERATED_HOSTS: &str = "RIPAM_MAX_GENERATED_HOSTS";
pub const ENV_MIN_PREFIX: &str = "RIPAM_MIN_PREFIX";
pub const ENV_MAX_PREFIX: &str = "RIPAM_MAX_PREFIX";
pub const ENV_BATCH_SIZE: &str = "RIPAM_BATCH_SIZE";
pub const ENV_ONE_ACTIVE_SERVICE: &str = "RIPAM_ONE_ACTIVE_SERVICE";

/// Configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Variable present but unparsable
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    /// Values parse but contradict each other
    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Result type for configuration loading
pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// RocksDB directory
    pub data_dir: PathBuf,
    /// HTTP listen address
    pub bind: SocketAddr,
    pub policy: GenerationPolicy,
    /// Rows per generation transaction
    pub batch_size: usize,
    /// Reject provisioning while the customer has a non-terminated service
    pub one_active_service_per_customer: bool,
}

impl Config {
    pub const DEFAULT_DATA_DIR: &'static str = "./data/ripam";
    pub const DEFAULT_BIND: &'static str = "0.0.0.0:8080";
    pub const DEFAULT_BATCH_SIZE: usize = 500;

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an explicit variable map
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(bind) = lookup(ENV_BIND) {
            config.bind = parse_var(ENV_BIND, &bind)?;
        }
        if let Some(hosts) = lookup(ENV_MAX_GENERATED_HOSTS) {
            config.policy.max_hosts = parse_var(ENV_MAX_GENERATED_HOSTS, &hosts)?;
        }
        if let Some(prefix) = lookup(ENV_MIN_PREFIX) {
            config.policy.min_prefix = parse_var(ENV_MIN_PREFIX, &prefix)?;
        }
        if let Some(prefix) = lookup(ENV_MAX_PREFIX) {
            config.policy.max_prefix = parse_var(ENV_MAX_PREFIX, &prefix)?;
        }
        if let Some(size) = lookup(ENV_BATCH_SIZE) {
            config.batch_size = parse_var(ENV_BATCH_SIZE, &size)?;
        }
        if let Some(flag) = lookup(ENV_ONE_ACTIVE_SERVICE) {
            config.one_active_service_per_customer = parse_bool(ENV_ONE_ACTIVE_SERVICE, &flag)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let policy = &self.policy;
        if policy.max_prefix > 30 {
            return Err(ConfigError::Inconsistent(format!(
                "max prefix /{} leaves no usable hosts (narrowest is /30)",
                policy.max_prefix
            )));
        }
        if policy.min_prefix > policy.max_prefix {
            return Err(ConfigError::Inconsistent(format!(
                "min prefix /{} is narrower than max prefix /{}",
                policy.min_prefix, policy.max_prefix
            )));
        }
        if policy.max_hosts == 0 {
            return Err(ConfigError::Inconsistent(
                "max generated hosts must be > 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Inconsistent(
                "batch size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(Self::DEFAULT_DATA_DIR),
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            policy: GenerationPolicy::default(),
            batch_size: Self::DEFAULT_BATCH_SIZE,
            one_active_service_per_customer: true,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        })
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}
