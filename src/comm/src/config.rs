use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Sizing knobs for the reusable payload buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommConfig {
    /// Initial capacity of the incoming and outgoing data buffers, in
    /// 64-bit words. Buffers double on demand and never shrink.
    #[serde(default = "default_data_capacity")]
    pub initial_data_capacity: usize,
}

fn default_data_capacity() -> usize {
    128
}

impl Default for CommConfig {
    fn default() -> Self {
        CommConfig {
            initial_data_capacity: default_data_capacity(),
        }
    }
}

/// Static description of a TCP cluster: one listen address per rank, shared
/// by every node. All nodes must agree on `addrs` ordering and `magic`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpClusterConfig {
    /// This node's rank, an index into `addrs`.
    pub rank: usize,
    pub addrs: Vec<SocketAddr>,
    /// Connection preamble filtering out stray connections to the listen
    /// port. Every rank of one cluster uses the same value.
    #[serde(default = "default_magic")]
    pub magic: u64,
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: i32,
}

fn default_magic() -> u64 {
    0x7061_7267_636f_6d6d
}

fn default_listen_backlog() -> i32 {
    1024
}

/// Fresh magic for tooling that writes cluster configs.
pub fn random_magic() -> u64 {
    rand::random()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub comm: CommConfig,
    pub tcp: Option<TcpClusterConfig>,
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}
