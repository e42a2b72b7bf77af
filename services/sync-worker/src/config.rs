//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! NPSSO tokens are loaded from the PSN_NPSSO_TOKENS env var or from
//! npsso_file, never stored in the TOML directly to avoid leaking secrets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use credential_pool::PoolConfig;
use dispatch::{DispatcherConfig, RetryPolicy};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub pool: PoolSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub retry: RetrySection,
}

/// Service-level settings
#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub listen_addr: std::net::SocketAddr,
    #[serde(default = "default_workers_per_credential")]
    pub workers_per_credential: usize,
    #[serde(default = "default_checkout_timeout")]
    pub checkout_timeout_secs: u64,
}

/// Credential pool settings
#[derive(Debug, Deserialize)]
pub struct PoolSection {
    /// Exact number of NPSSO tokens the deployment is provisioned for.
    pub credentials: usize,
    #[serde(default = "default_window")]
    pub window_secs: u64,
    #[serde(default = "default_max_calls")]
    pub max_calls_per_window: u64,
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_pace_ms")]
    pub pace_ms: u64,
    /// Path to a file with one NPSSO token per line (alternative to the
    /// PSN_NPSSO_TOKENS env var)
    #[serde(default)]
    pub npsso_file: Option<PathBuf>,
    #[serde(skip)]
    pub npsso: Vec<Secret<String>>,
}

/// Dispatcher settings
#[derive(Debug, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_max_jobs_per_subject")]
    pub max_jobs_per_subject: u64,
    #[serde(default = "default_affinity_ttl")]
    pub affinity_ttl_secs: u64,
    #[serde(default = "default_penalty_window")]
    pub penalty_window_secs: u64,
    #[serde(default = "default_penalty_weight")]
    pub penalty_weight: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_jobs_per_subject: default_max_jobs_per_subject(),
            affinity_ttl_secs: default_affinity_ttl(),
            penalty_window_secs: default_penalty_window(),
            penalty_weight: default_penalty_weight(),
        }
    }
}

/// Retry/backoff settings
#[derive(Debug, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay(),
        }
    }
}

fn default_workers_per_credential() -> usize {
    2
}
fn default_checkout_timeout() -> u64 {
    30
}
fn default_window() -> u64 {
    900
}
fn default_max_calls() -> u64 {
    300
}
fn default_lease_ttl() -> u64 {
    120
}
fn default_health_interval() -> u64 {
    60
}
fn default_refresh_threshold() -> u64 {
    300
}
fn default_cooldown() -> u64 {
    300
}
fn default_pace_ms() -> u64 {
    250
}
fn default_max_jobs_per_subject() -> u64 {
    20
}
fn default_affinity_ttl() -> u64 {
    3600
}
fn default_penalty_window() -> u64 {
    60
}
fn default_penalty_weight() -> u64 {
    50
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    4
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay() -> u64 {
    60
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment
    /// variables.
    ///
    /// NPSSO resolution order:
    /// 1. PSN_NPSSO_TOKENS env var (comma-separated)
    /// 2. npsso_file path from config, one token per line
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.pool.credentials == 0 {
            return Err(common::Error::Config(
                "pool.credentials must be greater than 0".into(),
            ));
        }
        if config.service.workers_per_credential == 0 {
            return Err(common::Error::Config(
                "workers_per_credential must be greater than 0".into(),
            ));
        }
        if config.dispatch.max_jobs_per_subject == 0 {
            return Err(common::Error::Config(
                "max_jobs_per_subject must be greater than 0".into(),
            ));
        }
        if config.retry.max_attempts == 0 {
            return Err(common::Error::Config(
                "retry.max_attempts must be greater than 0".into(),
            ));
        }

        // Resolve tokens: env var takes precedence over file
        if let Ok(raw) = std::env::var("PSN_NPSSO_TOKENS") {
            config.pool.npsso = raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| Secret::new(t.to_owned()))
                .collect();
        } else if let Some(ref token_file) = config.pool.npsso_file {
            let raw = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Credentials(format!(
                    "failed to read npsso_file {}: {e}",
                    token_file.display()
                ))
            })?;
            config.pool.npsso = raw
                .lines()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| Secret::new(t.to_owned()))
                .collect();
        }

        if config.pool.npsso.len() != config.pool.credentials {
            return Err(common::Error::Credentials(format!(
                "pool.credentials is {} but {} NPSSO tokens were provided",
                config.pool.credentials,
                config.pool.npsso.len()
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("psn-sync-worker.toml")
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            expected_credentials: self.pool.credentials,
            window: Duration::from_secs(self.pool.window_secs),
            max_calls_per_window: self.pool.max_calls_per_window,
            lease_ttl: Duration::from_secs(self.pool.lease_ttl_secs),
            health_interval: Duration::from_secs(self.pool.health_interval_secs),
            refresh_threshold: Duration::from_secs(self.pool.refresh_threshold_secs),
            cooldown: Duration::from_secs(self.pool.cooldown_secs),
            pace: Duration::from_millis(self.pool.pace_ms),
            ..PoolConfig::default()
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_jobs_per_subject: self.dispatch.max_jobs_per_subject,
            affinity_ttl: Duration::from_secs(self.dispatch.affinity_ttl_secs),
            penalty_window: Duration::from_secs(self.dispatch.penalty_window_secs),
            penalty_weight: self.dispatch.penalty_weight,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_secs(self.retry.base_delay_secs),
            multiplier: self.retry.multiplier,
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
        }
    }
}
