use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub helper: HelperConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed to fetch streams cross-origin. Empty disables CORS.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// External streaming helper invocation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HelperConfig {
    /// Helper executable, resolved through `PATH` when not absolute.
    #[serde(default = "default_program")]
    pub program: PathBuf,
    /// Arguments appended after `--select <n> --stdout`.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            extra_args: Vec::new(),
        }
    }
}

fn default_program() -> PathBuf {
    PathBuf::from("webtorrent")
}

/// Stream relay limits and timings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Maximum number of helper processes alive at once.
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: usize,
    /// How long a request waits for a free slot. 0 means fail immediately.
    #[serde(default)]
    pub admission_timeout_ms: u64,
    /// Time between SIGTERM and SIGKILL when tearing down a helper.
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,
    /// Upper bound for a single pipe read.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Number of trailing stderr lines kept for failure reports.
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: default_max_concurrent_streams(),
            admission_timeout_ms: 0,
            termination_grace_ms: default_termination_grace_ms(),
            chunk_size: default_chunk_size(),
            stderr_tail_lines: default_stderr_tail_lines(),
        }
    }
}

impl RelayConfig {
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    /// Sets the concurrent stream limit.
    pub fn with_max_concurrent_streams(mut self, max: usize) -> Self {
        self.max_concurrent_streams = max;
        self
    }

    /// Sets the termination grace period in milliseconds.
    pub fn with_termination_grace_ms(mut self, grace_ms: u64) -> Self {
        self.termination_grace_ms = grace_ms;
        self
    }
}

fn default_max_concurrent_streams() -> usize {
    8
}

fn default_termination_grace_ms() -> u64 {
    1000
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_stderr_tail_lines() -> usize {
    20
}
