//! Configuration management for Blitz.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Main configuration for the Blitz proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlitzConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Upstream URL admitted requests are proxied to
    #[serde(default)]
    pub upstream: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            upstream: None,
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Burst size per queue, lowest priority first
    #[serde(default = "default_queues")]
    pub queues: Vec<u64>,

    /// Refill interval E in milliseconds; a queue refills fully over E and
    /// minted tokens stay valid for E past their due time
    #[serde(default = "default_refill_interval")]
    pub refill_interval_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            queues: default_queues(),
            refill_interval_ms: default_refill_interval(),
        }
    }
}

fn default_queues() -> Vec<u64> {
    vec![10]
}

fn default_refill_interval() -> u64 {
    1000
}

impl BlitzConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::BlitzError::Config(e.to_string()))
    }
}
