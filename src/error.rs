//! Error types for the benchmark harness.
//!
//! Every variant is fatal: the driver stops at the first error and the
//! runner turns it into a single diagnostic line and exit status 1.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("plfsdir conf too long: {len} bytes rendered, capacity {capacity}")]
    ConfigOverflow { len: usize, capacity: usize },

    #[error("error opening dir {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error writing {key} (epoch {epoch}): {source}")]
    Write {
        key: String,
        epoch: u32,
        #[source]
        source: io::Error,
    },

    #[error("error flushing dir (epoch {epoch}): {source}")]
    Flush {
        epoch: u32,
        #[source]
        source: io::Error,
    },

    #[error("error finalizing dir: {source}")]
    Finish {
        #[source]
        source: io::Error,
    },

    #[error("coordination failure: {0}")]
    Coordination(String),

    #[error("fail to init {name} env: {reason}")]
    EnvInit { name: String, reason: String },

    #[error("usage: {0}")]
    Usage(String),

    #[error("timeout: deadline of {secs}s exceeded")]
    TimeoutExceeded { secs: u64 },

    #[error("run interrupted by signal")]
    Interrupted,

    #[error("invalid session operation: {op} while {state}")]
    InvalidState { op: &'static str, state: String },
}

impl From<ConfigError> for BenchError {
    fn from(e: ConfigError) -> Self {
        BenchError::Usage(e.to_string())
    }
}

pub type BenchResult<T> = Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_source_is_preserved() {
        let err = BenchError::Flush {
            epoch: 3,
            source: io::Error::new(io::ErrorKind::Other, "disk gone"),
        };

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "disk gone");
        assert_eq!(err.to_string(), "error flushing dir (epoch 3): disk gone");
    }

    #[test]
    fn test_config_error_is_usage() {
        let err: BenchError = ConfigError::ValidationError("bad io size".to_string()).into();
        assert!(matches!(err, BenchError::Usage(ref msg) if msg.contains("bad io size")));
    }
}
