//! Benchmark parameters

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default parameter values
///
/// These match the sizing the runner has always shipped with, so results
/// from runs without explicit flags stay comparable.
pub mod defaults {
    /// Watchdog deadline: 300 seconds
    pub const TIMEOUT_SECS: u64 = 300;

    /// Remote backend host
    pub const fn remote_host() -> &'static str {
        "127.0.0.1"
    }

    /// Remote backend port
    pub const REMOTE_PORT: u16 = 12345;

    pub const NUM_EPOCHS: u32 = 8;

    /// Keys written per rank per epoch: 1024
    pub const KEYS_PER_EPOCH: u32 = 1 << 10;

    /// Engine I/O buffer size: 2MB
    pub const IO_SIZE: u32 = 2 << 20;

    pub const FILTER_BITS: u32 = 10;

    pub const KEY_SIZE: u32 = 8;

    pub const VALUE_SIZE: u32 = 32;

    /// No background worker pool
    pub const BG_THREADS: u32 = 0;

    /// Default log level
    pub const fn default_log_level() -> &'static str {
        "info"
    }
}

/// Process-wide benchmark parameters
///
/// Built once at startup (defaults, then an optional TOML file, then CLI
/// flags) and never mutated afterwards. `rank` and `world_size` always
/// come from the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkParameters {
    /// plfsdir path
    pub dir: PathBuf,

    #[serde(skip)]
    pub rank: u32,

    #[serde(skip)]
    pub world_size: u32,

    /// Number of epochs to write
    pub epochs: u32,

    /// Keys written per epoch (per rank)
    pub keys_per_epoch: u32,

    /// Key size hint passed to the engine
    pub key_size: u32,

    /// Value size in bytes (0 is allowed)
    pub value_size: u32,

    /// Engine data/index buffer size in bytes
    pub io_size: u32,

    /// Bloom filter bits per key
    pub filter_bits: u32,

    /// Rotate the data log at every epoch
    pub log_rotation: bool,

    /// Background worker threads (0 = no pool)
    pub bg_threads: u32,

    /// Watchdog deadline in seconds (0 = disabled)
    pub timeout_secs: u64,

    /// Write through the remote backend instead of local storage
    pub remote_backend: bool,

    pub remote_host: String,

    pub remote_port: u16,

    pub verbose: bool,
}

impl Default for BenchmarkParameters {
    fn default() -> Self {
        Self {
            dir: PathBuf::new(),
            rank: 0,
            world_size: 1,
            epochs: defaults::NUM_EPOCHS,
            keys_per_epoch: defaults::KEYS_PER_EPOCH,
            key_size: defaults::KEY_SIZE,
            value_size: defaults::VALUE_SIZE,
            io_size: defaults::IO_SIZE,
            filter_bits: defaults::FILTER_BITS,
            log_rotation: false,
            bg_threads: defaults::BG_THREADS,
            timeout_secs: defaults::TIMEOUT_SECS,
            remote_backend: false,
            remote_host: defaults::remote_host().to_string(),
            remote_port: defaults::REMOTE_PORT,
            verbose: false,
        }
    }
}

impl BenchmarkParameters {
    /// Load parameters from a TOML file
    ///
    /// Missing keys keep their defaults. The result is validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadError(format!("{}: {}", path.display(), e))
        })?;

        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let params: BenchmarkParameters = toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        params.validate()?;

        Ok(params)
    }

    /// Render the parameters (without rank/world size) as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Validate the parameter invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.io_size == 0 {
            return Err(ConfigError::ValidationError("bad io size".to_string()));
        }

        if self.key_size == 0 {
            return Err(ConfigError::ValidationError("bad key size".to_string()));
        }

        if self.remote_port == 0 {
            return Err(ConfigError::ValidationError("bad bbos port".to_string()));
        }

        if self.remote_backend && self.remote_host.is_empty() {
            return Err(ConfigError::ValidationError(
                "bbos hostname cannot be empty".to_string(),
            ));
        }

        if self.world_size == 0 || self.rank >= self.world_size {
            return Err(ConfigError::ValidationError(format!(
                "rank {} outside of world size {}",
                self.rank, self.world_size
            )));
        }

        Ok(())
    }

    /// Bind the parameters to a rank of the process group
    pub fn with_rank(mut self, rank: u32, world_size: u32) -> Self {
        self.rank = rank;
        self.world_size = world_size;
        self
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    /// Log the resolved options, one per line
    pub fn print_options(&self, argv0: &str) {
        tracing::info!("{}", argv0);
        tracing::info!("==options:");
        tracing::info!("\ttimeout: {}", self.timeout_secs);
        tracing::info!("\tnum bg threads: {}", self.bg_threads);
        tracing::info!("\tnum epochs: {}", self.epochs);
        tracing::info!("\tnum keys per epoch: {} (per rank)", self.keys_per_epoch);
        tracing::info!("\tplfsdir: {}", self.dir.display());
        tracing::info!("\tkey size: {}", self.key_size);
        tracing::info!("\tvalue size: {}", self.value_size);
        tracing::info!("\tfilter bits per key: {}", self.filter_bits);
        tracing::info!("\tio size: {}", self.io_size);
        tracing::info!("\tlog rotation: {}", self.log_rotation as i32);
        tracing::info!("\tbbos: {}", self.remote_backend as i32);
        tracing::info!("\tbbos hostname: {}", self.remote_host);
        tracing::info!("\tbbos port: {}", self.remote_port);
        tracing::info!("\tmpi comm size: {}", self.world_size);
        tracing::info!("\tverbose: {}", self.verbose as i32);
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
