use serde::Deserialize;
use shared::limiter::DEFAULT_MAX_CONCURRENT;
use std::time::Duration;
use url::Url;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("max_concurrent_fetches must be greater than 0")]
    InvalidConcurrency,

    #[error("fetch_timeout_secs must be greater than 0")]
    InvalidTimeout,

    #[error("Node name cannot be empty")]
    EmptyNodeName,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 9000,
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 9001,
    }
}

fn default_max_concurrent_fetches() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

/// A node known before any node announces itself.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct SeedNode {
    pub name: String,
    pub address: Url,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default = "default_listener")]
    pub listener: Listener,
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub nodes: Vec<SeedNode>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.max_concurrent_fetches == 0 {
            return Err(ValidationError::InvalidConcurrency);
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.nodes.iter().any(|node| node.name.trim().is_empty()) {
            return Err(ValidationError::EmptyNodeName);
        }

        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
