//! Global constants for the plfsdir benchmark
//!
//! This module centralizes the fixed sizes and names shared between the
//! session descriptor builder, the storage engine binding and the driver.

/// Reserved capacity of the session descriptor, in bytes
///
/// The rendered `key=value&...` descriptor must fit in this many bytes
/// (including the terminating NUL the engine ABI expects), otherwise the
/// descriptor is rejected instead of being truncated.
pub const CONF_BUFFER_CAPACITY: usize = 500;

/// Trailing padding flag always requested from the engine
pub const TAIL_PADDING: u32 = 1;

/// Block padding flag always requested from the engine
pub const BLOCK_PADDING: u32 = 1;

/// Number of log2 partitions requested from the engine (one partition per rank)
pub const LG_PARTS: u32 = 0;

/// Byte used to fill synthetic record values
pub const VALUE_FILLER: u8 = b'.';

/// Name of the remote storage environment
pub const REMOTE_ENV_NAME: &str = "bbos";

/// Transport prefix of the remote storage environment URIs
pub const REMOTE_ENV_TRANSPORT: &str = "bmi+tcp";

/// Maximum length of a remote environment URI
///
/// Longer host names are rejected when the binding is constructed.
pub const MAX_REMOTE_URI_LEN: usize = 50;

/// Grace period between a watchdog expiry and the forced process exit (2s)
///
/// The driver gets this long to observe the cancellation at an epoch
/// boundary before the process is terminated anyway.
pub const WATCHDOG_GRACE_MS: u64 = 2000;

/// Unit used for block padding in the local log directory (4KB)
pub const LOG_BLOCK_SIZE: u64 = 4096;

/// Unit used for tail padding in the local log directory (64KB)
pub const LOG_TAIL_ALIGNMENT: u64 = 64 * 1024;

/// Largest bloom filter a single epoch index block may carry (64MB)
pub const MAX_FILTER_BYTES: usize = 64 << 20;

/// Determine whether an environment variable holds a truthy value
pub fn is_env_truthy(key: &str) -> bool {
    use std::env;

    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
