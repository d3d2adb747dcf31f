use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::blockchain::pow::DIFFICULTY;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings of a node.
///
/// Read from `NODE_*` environment variables, optionally seeded from a `.env`
/// file.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub difficulty: usize,
    pub mine_interval: Duration,
    pub peer_timeout: Duration,
    pub reconcile_before_mining: bool,
    pub storage_retries: usize,
    pub peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            data_dir: PathBuf::from("data/5000"),
            difficulty: DIFFICULTY,
            mine_interval: Duration::from_secs(60),
            peer_timeout: Duration::from_millis(5000),
            reconcile_before_mining: true,
            storage_retries: 2,
            peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Loads `.env` if present, then reads the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("NODE_HOST").unwrap_or(defaults.host);
        let port = parse_or(&lookup, "NODE_PORT", defaults.port)?;
        let data_dir = lookup("NODE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("data/{}", port)));
        let difficulty = parse_or(&lookup, "NODE_DIFFICULTY", defaults.difficulty)?;
        if difficulty > 64 {
            return Err(ConfigError::InvalidValue {
                key: "NODE_DIFFICULTY",
                value: difficulty.to_string(),
                reason: "a SHA-256 hex digest has 64 characters".to_string(),
            });
        }

        let mine_interval = Duration::from_secs(non_zero(
            "NODE_MINE_INTERVAL_SECS",
            parse_or(&lookup, "NODE_MINE_INTERVAL_SECS", defaults.mine_interval.as_secs())?,
        )?);
        let peer_timeout = Duration::from_millis(non_zero(
            "NODE_PEER_TIMEOUT_MS",
            parse_or(&lookup, "NODE_PEER_TIMEOUT_MS", defaults.peer_timeout.as_millis() as u64)?,
        )?);
        let reconcile_before_mining = parse_or(
            &lookup,
            "NODE_RECONCILE_BEFORE_MINING",
            defaults.reconcile_before_mining,
        )?;
        let storage_retries = parse_or(&lookup, "NODE_STORAGE_RETRIES", defaults.storage_retries)?;

        let peers = lookup("NODE_PEERS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|peer| !peer.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            data_dir,
            difficulty,
            mine_interval,
            peer_timeout,
            reconcile_before_mining,
            storage_retries,
            peers,
        })
    }

    /// `host:port` under which peers know this node
    pub fn identity(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::InvalidValue {
                key,
                value,
                reason: e.to_string(),
            })
        }
        None => Ok(default),
    }
}

fn non_zero(key: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
