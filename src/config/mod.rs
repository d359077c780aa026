//! Typed configuration.
//!
//! Loads from environment variables (`Config::from_env`) or a TOML file
//! (`Config::from_file`). Anything unset falls back to the defaults below.
//! In local dev, call `dotenvy::dotenv().ok()` before `from_env`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::TimeDelta;
use serde::Deserialize;

use crate::balancer::{Balancer, Fairness};
use crate::error::{Error, Result};

/// Longest lease or retention the config accepts, one year in seconds.
pub const MAX_TTL: u64 = 365 * 24 * 60 * 60;

/// Which balancer implementation the engine uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancerKind {
    #[default]
    Fairness,
}

impl BalancerKind {
    pub fn build(self) -> Arc<dyn Balancer> {
        match self {
            BalancerKind::Fairness => Arc::new(Fairness),
        }
    }
}

impl FromStr for BalancerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fairness" => Ok(BalancerKind::Fairness),
            _ => Err(Error::Config(format!("unknown balancer: {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker identity. Random when unset.
    pub worker: String,
    /// Lease duration in seconds.
    pub ttl: u64,
    /// Seconds a broadcast stays stored before expire removes it.
    pub retention: u64,
    /// Queue namespace inside the store.
    pub queue: String,
    /// SQLite database file. `None` keeps tasks in process memory.
    pub database: Option<PathBuf>,
    pub balancer: BalancerKind,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: random_worker(),
            ttl: 30,
            retention: 3600,
            queue: "rescue".to_string(),
            database: None,
            balancer: BalancerKind::default(),
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `RESCUE_*`, `OTEL_ENDPOINT` and `LOG_LEVEL`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(worker) = var("RESCUE_WORKER") {
            config.worker = worker;
        }
        if let Some(ttl) = var("RESCUE_TTL") {
            config.ttl = ttl
                .parse()
                .map_err(|_| Error::Config(format!("RESCUE_TTL must be seconds, got {ttl:?}")))?;
        }
        if let Some(retention) = var("RESCUE_RETENTION") {
            config.retention = retention.parse().map_err(|_| {
                Error::Config(format!("RESCUE_RETENTION must be seconds, got {retention:?}"))
            })?;
        }
        if let Some(queue) = var("RESCUE_QUEUE") {
            config.queue = queue;
        }
        config.database = var("RESCUE_DATABASE").map(PathBuf::from);
        if let Some(balancer) = var("RESCUE_BALANCER") {
            config.balancer = balancer.parse()?;
        }
        config.otel_endpoint = var("OTEL_ENDPOINT");
        if let Some(level) = var("LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        config.validate()
    }

    /// Lease duration, clamped to [`MAX_TTL`].
    pub fn ttl(&self) -> TimeDelta {
        seconds(self.ttl)
    }

    /// Broadcast retention, clamped to [`MAX_TTL`].
    pub fn retention(&self) -> TimeDelta {
        seconds(self.retention)
    }

    fn validate(self) -> Result<Self> {
        if self.worker.is_empty() {
            return Err(Error::Config("worker must not be empty".into()));
        }
        if self.queue.is_empty() {
            return Err(Error::Config("queue must not be empty".into()));
        }
        if self.ttl == 0 {
            return Err(Error::Config("ttl must be at least one second".into()));
        }
        if self.ttl > MAX_TTL {
            return Err(Error::Config(format!(
                "ttl must be at most {MAX_TTL} seconds, got {}",
                self.ttl
            )));
        }
        if self.retention < self.ttl || self.retention > MAX_TTL {
            return Err(Error::Config(format!(
                "retention must lie between ttl and {MAX_TTL} seconds, got {}",
                self.retention
            )));
        }
        Ok(self)
    }
}

fn seconds(secs: u64) -> TimeDelta {
    TimeDelta::seconds(secs.min(MAX_TTL) as i64)
}

/// Short random worker name.
pub fn random_worker() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
