//! Client configuration

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;
use visionary_core::AUTOIP_PORT;

/// AutoIP client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoIpConfig {
    /// Remote UDP port, also the local bind port unless `local_port` is set
    #[serde(default = "default_port")]
    pub port: u16,
    /// Destination of requests; the limited broadcast address selects a broadcast session
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Overall time a scan or assignment waits for replies
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Time a single receive blocks before the deadline is checked again
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Local bind port override (0 picks an ephemeral port)
    #[serde(default)]
    pub local_port: Option<u16>,
}

impl Default for AutoIpConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            remote: default_remote(),
            timeout_ms: default_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            local_port: None,
        }
    }
}

impl AutoIpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn default_port() -> u16 {
    AUTOIP_PORT
}

fn default_remote() -> String {
    Ipv4Addr::BROADCAST.to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    100
}
